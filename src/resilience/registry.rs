use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use strum::Display;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::breaker::{BreakerConfig, BreakerStats, CircuitBreaker, CircuitState};
use super::events::BreakerEventSink;
use crate::config::ConfigError;

/// Health of one external dependency as seen through its breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DependencyHealth {
    Connected,
    Degraded,
    Disconnected,
}

impl DependencyHealth {
    pub fn from_stats(stats: &BreakerStats) -> Self {
        match stats.state {
            CircuitState::Open => DependencyHealth::Disconnected,
            CircuitState::HalfOpen => DependencyHealth::Degraded,
            CircuitState::Closed if stats.consecutive_failures > 0 => DependencyHealth::Degraded,
            CircuitState::Closed => DependencyHealth::Connected,
        }
    }
}

/// Named circuit breakers, one per external dependency
pub struct BreakerRegistry {
    defaults: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    sink: Option<Arc<dyn BreakerEventSink>>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerConfig, sink: Option<Arc<dyn BreakerEventSink>>) -> Result<Self, ConfigError> {
        Ok(Self {
            defaults: defaults.validated()?,
            overrides: HashMap::new(),
            sink,
            breakers: RwLock::new(HashMap::new()),
        })
    }

    /// Use a dedicated configuration for one dependency
    pub fn with_override(mut self, name: impl Into<String>, cfg: BreakerConfig) -> Result<Self, ConfigError> {
        self.overrides.insert(name.into(), cfg.validated()?);
        Ok(self)
    }

    /// Breaker for `name`, created on first use
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let cfg = self.overrides.get(name).unwrap_or(&self.defaults).clone();
                debug!(breaker = name, "creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, cfg).with_sink(self.sink.clone()))
            })
            .clone()
    }

    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<_> = self.breakers.read().values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Health per dependency, ordered by name
    pub fn health(&self) -> BTreeMap<String, DependencyHealth> {
        self.stats()
            .iter()
            .map(|s| (s.name.clone(), DependencyHealth::from_stats(s)))
            .collect()
    }

    /// Worst health across all dependencies (connected when there are none)
    pub fn overall_health(&self) -> DependencyHealth {
        self.health()
            .into_values()
            .max()
            .unwrap_or(DependencyHealth::Connected)
    }

    pub fn all_closed(&self) -> bool {
        self.breakers
            .read()
            .values()
            .all(|b| b.state() == CircuitState::Closed)
    }

    /// Move every cooled-down breaker to half-open
    pub fn poll_all(&self) {
        let breakers: Vec<_> = self.breakers.read().values().cloned().collect();
        for breaker in breakers {
            breaker.poll();
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }

    /// Periodically poll all breakers until `cancel` fires
    pub fn spawn_monitor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = registry.defaults.monitor_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("circuit breaker monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => registry.poll_all(),
                }
            }
        })
    }
}
