//! Circuit breakers guarding calls to external dependencies
//! (price feed, weather service, heating device).

pub mod adaptive;
pub mod breaker;
pub mod error;
pub mod events;
pub mod registry;

pub use adaptive::AdaptiveThreshold;
pub use breaker::{BreakerConfig, BreakerStats, CircuitBreaker, CircuitState};
pub use error::BreakerError;
pub use events::{BreakerEvent, BreakerEventSink, RecentEvents, TimedEvent};
pub use registry::{BreakerRegistry, DependencyHealth};
