use std::collections::VecDeque;

use super::breaker::BreakerConfig;

/// Failure threshold that follows the recent outcome history.
///
/// Sustained failures tighten the threshold (the breaker trips sooner),
/// sustained success relaxes it. Only a failure can tighten and only a
/// success can relax. After a step, at least `adapt_min_samples` further
/// outcomes must be recorded before the next one, and the threshold never
/// leaves `[min, max]`.
#[derive(Debug, Clone)]
pub struct AdaptiveThreshold {
    base: u32,
    min: u32,
    max: u32,
    current: u32,
    history: VecDeque<bool>,
    capacity: usize,
    min_samples: usize,
    /// Outcomes recorded since the last step
    since_step: usize,
    tighten_failure_rate: f64,
    relax_failure_rate: f64,
}

/// A change of the threshold caused by one outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdChange {
    pub from: u32,
    pub to: u32,
}

impl AdaptiveThreshold {
    pub fn new(cfg: &BreakerConfig) -> Self {
        let base = cfg.failure_threshold.clamp(cfg.min_failure_threshold, cfg.max_failure_threshold);
        Self {
            base,
            min: cfg.min_failure_threshold,
            max: cfg.max_failure_threshold,
            current: base,
            history: VecDeque::with_capacity(cfg.history_size),
            capacity: cfg.history_size.max(1),
            min_samples: cfg.adapt_min_samples,
            since_step: 0,
            tighten_failure_rate: cfg.tighten_failure_rate,
            relax_failure_rate: cfg.relax_failure_rate,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn samples(&self) -> usize {
        self.history.len()
    }

    /// Failure fraction of the rolling window, 0.0 when empty
    pub fn failure_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let failures = self.history.iter().filter(|&&ok| !ok).count();
        failures as f64 / self.history.len() as f64
    }

    pub fn success_rate(&self) -> f64 {
        if self.history.is_empty() {
            1.0
        } else {
            1.0 - self.failure_rate()
        }
    }

    /// Record one call outcome and adapt the threshold
    pub fn record(&mut self, success: bool) -> Option<ThresholdChange> {
        self.history.push_back(success);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }

        self.since_step = self.since_step.saturating_add(1);

        if self.history.len() < self.min_samples || self.since_step < self.min_samples {
            return None;
        }

        let from = self.current;
        let rate = self.failure_rate();
        if !success && rate >= self.tighten_failure_rate && self.current > self.min {
            self.current -= 1;
        } else if success && rate <= self.relax_failure_rate && self.current < self.max {
            self.current += 1;
        } else {
            return None;
        }

        self.since_step = 0;
        Some(ThresholdChange {
            from,
            to: self.current,
        })
    }

    /// Forget the history and return to the base threshold
    pub fn reset(&mut self) {
        self.history.clear();
        self.since_step = 0;
        self.current = self.base;
    }
}
