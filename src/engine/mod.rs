//! Pure decision engines. Every function here is synchronous, free of I/O
//! and safe to call concurrently.

pub mod config;
pub mod dhw;
pub mod heating;
pub mod price;
pub mod tuning;

pub use config::{ComfortBand, EngineConfig, PreheatConfig, SafetyConfig, ThermalPriors};
pub use dhw::compute_dhw_decision;
pub use heating::{compute_heating_decision, lockout_active};
pub use price::{current_period_price, price_percentile, NEUTRAL_PERCENTILE};
pub use tuning::apply_thermal_model;
