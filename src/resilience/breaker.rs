use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use super::adaptive::AdaptiveThreshold;
use super::error::BreakerError;
use super::events::{BreakerEvent, BreakerEventSink};
use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open a fresh breaker
    #[validate(range(min = 1))]
    pub failure_threshold: u32,
    #[validate(range(min = 1))]
    pub min_failure_threshold: u32,
    #[validate(range(min = 1))]
    pub max_failure_threshold: u32,
    /// Time an open breaker waits before admitting trial calls
    #[validate(range(min = 1))]
    pub cooldown_seconds: u64,
    /// Consecutive trial successes that close a half-open breaker
    #[validate(range(min = 1))]
    pub success_threshold: u32,
    /// Trial calls allowed in flight while half-open
    #[validate(range(min = 1))]
    pub half_open_max_calls: u32,
    /// Outcomes kept for threshold adaptation
    #[validate(range(min = 1))]
    pub history_size: usize,
    /// Outcomes required before the threshold adapts, and between two steps
    pub adapt_min_samples: usize,
    #[validate(range(min = 0.0, max = 1.0))]
    pub tighten_failure_rate: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub relax_failure_rate: f64,
    /// How often the monitor moves cooled-down breakers to half-open
    #[validate(range(min = 1))]
    pub monitor_interval_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            min_failure_threshold: 2,
            max_failure_threshold: 10,
            cooldown_seconds: 30,
            success_threshold: 1,
            half_open_max_calls: 1,
            history_size: 20,
            adapt_min_samples: 10,
            tighten_failure_rate: 0.5,
            relax_failure_rate: 0.1,
            monitor_interval_seconds: 5,
        }
    }
}

impl BreakerConfig {
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        if !self.tighten_failure_rate.is_finite() {
            return Err(ConfigError::NonFinite("breaker.tighten_failure_rate"));
        }
        if !self.relax_failure_rate.is_finite() {
            return Err(ConfigError::NonFinite("breaker.relax_failure_rate"));
        }
        if self.min_failure_threshold > self.failure_threshold
            || self.failure_threshold > self.max_failure_threshold
        {
            return Err(ConfigError::Invalid(format!(
                "breaker thresholds must satisfy min <= base <= max, got {} <= {} <= {}",
                self.min_failure_threshold, self.failure_threshold, self.max_failure_threshold
            )));
        }
        if self.relax_failure_rate >= self.tighten_failure_rate {
            return Err(ConfigError::Invalid(format!(
                "relax_failure_rate ({}) must be below tighten_failure_rate ({})",
                self.relax_failure_rate, self.tighten_failure_rate
            )));
        }
        Ok(self)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds)
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub failure_threshold: u32,
    pub success_rate: f64,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub seconds_in_state: f64,
}

#[derive(Debug, Clone, Copy)]
enum Admission {
    Normal,
    /// Half-open trial, tagged with the state generation that admitted it
    Trial(u64),
}

struct Inner {
    state: CircuitState,
    /// Bumped on every transition so stale trial outcomes are ignored
    generation: u64,
    last_transition: Instant,
    consecutive_failures: u32,
    consecutive_successes: u32,
    trials_in_flight: u32,
    threshold: AdaptiveThreshold,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
}

/// Per-dependency circuit breaker.
///
/// closed → open after `threshold` consecutive failures, open → half-open
/// once the cooldown has elapsed (observed by a call or by the monitor),
/// half-open → closed after `success_threshold` trial successes and
/// half-open → open on any trial failure. All state lives behind one lock.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    sink: Option<Arc<dyn BreakerEventSink>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let threshold = AdaptiveThreshold::new(&config);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                last_transition: Instant::now(),
                consecutive_failures: 0,
                consecutive_successes: 0,
                trials_in_flight: 0,
                threshold,
                total_calls: 0,
                total_failures: 0,
                rejected_calls: 0,
            }),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Option<Arc<dyn BreakerEventSink>>) -> Self {
        self.sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `operation` if the breaker admits it.
    ///
    /// A rejected call returns [`BreakerError::Open`] without invoking the
    /// operation. If the returned future is dropped mid-call, a half-open
    /// trial slot is released and no outcome is recorded.
    #[instrument(level = "trace", skip_all, fields(breaker = %self.name))]
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let admission = self.admit().map_err(|retry_in| BreakerError::Open {
            name: self.name.clone(),
            retry_in,
        })?;
        let call = InFlight {
            breaker: self,
            admission,
            settled: false,
        };

        let result = operation().await;
        call.settle(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        result.map_err(BreakerError::Operation)
    }

    /// Move an open breaker to half-open if its cooldown has elapsed
    pub fn poll(&self) -> CircuitState {
        let mut events = Vec::new();
        let state = {
            let mut inner = self.inner.lock();
            self.check_cooldown(&mut inner, &mut events);
            inner.state
        };
        self.dispatch(events);
        state
    }

    /// Force the breaker closed and forget its history
    pub fn reset(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            self.transition(&mut inner, CircuitState::Closed, "manual reset".to_string(), &mut events);
            inner.consecutive_failures = 0;
            inner.consecutive_successes = 0;
            inner.trials_in_flight = 0;
            inner.threshold.reset();
        }
        self.dispatch(events);
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            failure_threshold: inner.threshold.current(),
            success_rate: inner.threshold.success_rate(),
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            seconds_in_state: inner.last_transition.elapsed().as_secs_f64(),
        }
    }

    fn admit(&self) -> Result<Admission, Duration> {
        let mut events = Vec::new();
        let admission = {
            let mut inner = self.inner.lock();
            self.check_cooldown(&mut inner, &mut events);

            let admission = match inner.state {
                CircuitState::Closed => Ok(Admission::Normal),
                CircuitState::HalfOpen if inner.trials_in_flight < self.config.half_open_max_calls => {
                    inner.trials_in_flight += 1;
                    Ok(Admission::Trial(inner.generation))
                }
                CircuitState::HalfOpen => Err(Duration::ZERO),
                CircuitState::Open => Err(self
                    .config
                    .cooldown()
                    .saturating_sub(inner.last_transition.elapsed())),
            };

            if let Err(retry_in) = admission {
                inner.rejected_calls += 1;
                debug!(breaker = %self.name, state = %inner.state, ?retry_in, "call rejected");
                events.push(BreakerEvent::CallRejected {
                    breaker: self.name.clone(),
                    retry_in_ms: retry_in.as_millis() as u64,
                });
            }
            admission
        };
        self.dispatch(events);
        admission
    }

    fn settle(&self, admission: Admission, outcome: Result<(), String>) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.total_calls += 1;
            if outcome.is_err() {
                inner.total_failures += 1;
            }

            if let Some(change) = inner.threshold.record(outcome.is_ok()) {
                let failure_rate = inner.threshold.failure_rate();
                debug!(
                    breaker = %self.name,
                    from = change.from,
                    to = change.to,
                    failure_rate,
                    "failure threshold adjusted"
                );
                events.push(BreakerEvent::ThresholdAdjusted {
                    breaker: self.name.clone(),
                    from: change.from,
                    to: change.to,
                    failure_rate,
                });
            }

            let current_trial = matches!(admission, Admission::Trial(generation) if generation == inner.generation);
            match (inner.state, current_trial) {
                (CircuitState::Closed, _) => match &outcome {
                    Ok(()) => inner.consecutive_failures = 0,
                    Err(_) => inner.consecutive_failures += 1,
                },
                (CircuitState::HalfOpen, true) => {
                    inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                    if outcome.is_ok() {
                        inner.consecutive_successes += 1;
                    } else {
                        inner.consecutive_failures += 1;
                    }
                }
                // outcome of a call admitted under an earlier state
                _ => {}
            }

            let threshold = inner.threshold.current();
            if let Err(error) = &outcome {
                warn!(
                    breaker = %self.name,
                    error = %error,
                    consecutive_failures = inner.consecutive_failures,
                    threshold,
                    "call failed"
                );
                events.push(BreakerEvent::CallFailed {
                    breaker: self.name.clone(),
                    error: error.clone(),
                    consecutive_failures: inner.consecutive_failures,
                    threshold,
                });
            }

            match (inner.state, current_trial, outcome.is_ok()) {
                (CircuitState::Closed, _, false) if inner.consecutive_failures >= threshold => {
                    let reason = format!("{} consecutive failures", inner.consecutive_failures);
                    self.transition(&mut inner, CircuitState::Open, reason, &mut events);
                }
                (CircuitState::HalfOpen, true, false) => {
                    self.transition(&mut inner, CircuitState::Open, "trial call failed".to_string(), &mut events);
                }
                (CircuitState::HalfOpen, true, true)
                    if inner.consecutive_successes >= self.config.success_threshold =>
                {
                    let reason = format!("{} trial calls succeeded", inner.consecutive_successes);
                    self.transition(&mut inner, CircuitState::Closed, reason, &mut events);
                    inner.consecutive_failures = 0;
                }
                _ => {}
            }
        }
        self.dispatch(events);
    }

    fn release_trial(&self, admission: Admission) {
        if let Admission::Trial(generation) = admission {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::HalfOpen && inner.generation == generation {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            }
        }
    }

    fn check_cooldown(&self, inner: &mut Inner, events: &mut Vec<BreakerEvent>) {
        if inner.state == CircuitState::Open && inner.last_transition.elapsed() >= self.config.cooldown() {
            self.transition(inner, CircuitState::HalfOpen, "cooldown elapsed".to_string(), events);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, reason: String, events: &mut Vec<BreakerEvent>) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.generation += 1;
        inner.last_transition = Instant::now();
        inner.consecutive_successes = 0;
        inner.trials_in_flight = 0;

        match to {
            CircuitState::Open => warn!(breaker = %self.name, %from, %to, %reason, "circuit breaker opened"),
            CircuitState::HalfOpen => info!(breaker = %self.name, %from, %to, %reason, "circuit breaker half-open"),
            CircuitState::Closed => info!(breaker = %self.name, %from, %to, %reason, "circuit breaker closed"),
        }
        events.push(BreakerEvent::StateChanged {
            breaker: self.name.clone(),
            from,
            to,
            reason,
        });
    }

    fn dispatch(&self, events: Vec<BreakerEvent>) {
        if let Some(sink) = &self.sink {
            for event in &events {
                sink.record(event);
            }
        }
    }
}

/// Admitted call; releases its half-open slot if dropped before settling
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self, outcome: Result<(), String>) {
        self.settled = true;
        self.breaker.settle(self.admission, outcome);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_trial(self.admission);
        }
    }
}
