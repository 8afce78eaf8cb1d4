use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::breaker::CircuitState;

/// Something a circuit breaker wants an operator to know about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakerEvent {
    StateChanged {
        breaker: String,
        from: CircuitState,
        to: CircuitState,
        reason: String,
    },
    CallFailed {
        breaker: String,
        error: String,
        consecutive_failures: u32,
        threshold: u32,
    },
    CallRejected {
        breaker: String,
        retry_in_ms: u64,
    },
    ThresholdAdjusted {
        breaker: String,
        from: u32,
        to: u32,
        failure_rate: f64,
    },
}

impl BreakerEvent {
    pub fn breaker(&self) -> &str {
        match self {
            BreakerEvent::StateChanged { breaker, .. }
            | BreakerEvent::CallFailed { breaker, .. }
            | BreakerEvent::CallRejected { breaker, .. }
            | BreakerEvent::ThresholdAdjusted { breaker, .. } => breaker,
        }
    }
}

/// Optional receiver for breaker events.
///
/// Breakers call `record` after releasing their own lock, so a sink may
/// query breaker state. Implementations must not block.
pub trait BreakerEventSink: Send + Sync {
    fn record(&self, event: &BreakerEvent);
}

/// An event with the wall-clock time it was recorded
#[derive(Debug, Clone, Serialize)]
pub struct TimedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: BreakerEvent,
}

/// Sink keeping the most recent events in memory for the status API
pub struct RecentEvents {
    capacity: usize,
    events: Mutex<VecDeque<TimedEvent>>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<TimedEvent> {
        self.events.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl BreakerEventSink for RecentEvents {
    fn record(&self, event: &BreakerEvent) {
        // per-call failures and rejections are already in the logs
        if matches!(event, BreakerEvent::CallRejected { .. }) {
            return;
        }
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(TimedEvent {
            at: Utc::now(),
            event: event.clone(),
        });
    }
}
