use std::time::Duration;
use thiserror::Error;

/// Result of a call routed through a circuit breaker
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without invoking the operation
    #[error("circuit '{name}' is open (retry in {}s)", .retry_in.as_secs())]
    Open { name: String, retry_in: Duration },

    /// The operation ran and failed
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

impl BreakerError<anyhow::Error> {
    /// Flatten into `anyhow`, keeping the operation's error chain intact
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            BreakerError::Operation(e) => e,
            open @ BreakerError::Open { .. } => anyhow::anyhow!(open.to_string()),
        }
    }
}
