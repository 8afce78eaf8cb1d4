use chrono::{DateTime, FixedOffset};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::calibration::{self, CalibrationError, CalibrationSettings, ThermalFit};
use super::rc::FirstOrderModel;
use crate::domain::TelemetrySample;
use crate::engine::ThermalPriors;

/// Current thermal parameters of the building.
///
/// Only a successful calibration run writes this record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalModelState {
    /// Heat-loss coefficient (1/h)
    pub k: f64,
    /// Gain coefficient (1/h)
    pub s: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Sample intervals behind the current fit
    pub data_points: usize,
    pub last_update: Option<DateTime<FixedOffset>>,
}

impl ThermalModelState {
    /// Uncalibrated state seeded from the configured priors
    pub fn from_priors(priors: &ThermalPriors, prior_gain_per_hour: f64) -> Self {
        Self {
            k: priors.heat_loss_coefficient(),
            s: prior_gain_per_hour,
            confidence: 0.0,
            data_points: 0,
            last_update: None,
        }
    }

    pub fn as_model(&self) -> FirstOrderModel {
        FirstOrderModel::new(self.k, self.s)
    }

    /// Envelope time constant 1/K (hours)
    pub fn time_constant_hours(&self) -> f64 {
        self.as_model().time_constant_hours()
    }

    /// Expected indoor temperature after `hours` at constant conditions
    pub fn predict_indoor_c(&self, indoor_c: f64, outdoor_c: f64, setpoint_c: f64, hours: f64) -> f64 {
        self.as_model().predict(indoor_c, outdoor_c, setpoint_c, hours)
    }

    pub fn is_calibrated(&self) -> bool {
        self.last_update.is_some()
    }
}

/// Summary of a calibration run that updated the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub previous: ThermalModelState,
    pub current: ThermalModelState,
    pub rmse: f64,
    pub samples_consumed: usize,
}

/// Buffered telemetry plus a running count of samples removed from its front
#[derive(Debug, Default)]
struct SampleBuffer {
    samples: Vec<TelemetrySample>,
    removed: u64,
}

impl SampleBuffer {
    fn drain_front(&mut self, n: usize) {
        let n = n.min(self.samples.len());
        self.samples.drain(..n);
        self.removed += n as u64;
    }
}

/// Samples handed to one calibration run
struct Snapshot {
    samples: Vec<TelemetrySample>,
    removed_at: u64,
}

/// Adaptive thermal model: buffers telemetry and periodically refits K/S.
///
/// Ingestion and calibration may run concurrently. A calibration works on
/// a snapshot of the buffer, and at most one calibration runs at a time.
pub struct ThermalModel {
    priors: ThermalPriors,
    settings: CalibrationSettings,
    state: RwLock<ThermalModelState>,
    samples: Mutex<SampleBuffer>,
    calibration_guard: tokio::sync::Mutex<()>,
}

impl ThermalModel {
    pub fn new(priors: ThermalPriors, settings: CalibrationSettings) -> Self {
        let state = ThermalModelState::from_priors(&priors, settings.prior_gain_per_hour);
        Self::with_state(priors, settings, state)
    }

    /// Resume from a previously stored state
    pub fn with_state(priors: ThermalPriors, settings: CalibrationSettings, state: ThermalModelState) -> Self {
        Self {
            priors,
            settings,
            state: RwLock::new(state),
            samples: Mutex::new(SampleBuffer::default()),
            calibration_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> ThermalModelState {
        *self.state.read()
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    pub fn pending_samples(&self) -> usize {
        self.samples.lock().samples.len()
    }

    /// Buffer one telemetry sample for the next calibration
    pub fn ingest(&self, sample: TelemetrySample) {
        if !sample.is_finite() {
            debug!(?sample, "dropping non-finite telemetry sample");
            return;
        }
        let mut buffer = self.samples.lock();
        buffer.samples.push(sample);
        let overflow = buffer.samples.len().saturating_sub(self.settings.max_buffered_samples);
        if overflow > 0 {
            buffer.drain_front(overflow);
            warn!(
                dropped = overflow,
                capacity = self.settings.max_buffered_samples,
                "telemetry buffer full, dropping oldest samples"
            );
        }
    }

    /// Refit K/S/confidence from the buffered samples.
    ///
    /// On any error the previous parameters and the buffer are kept. On
    /// success the consumed samples are removed; samples ingested while the
    /// fit was running stay for the next run.
    pub async fn calibrate(
        &self,
        now: DateTime<FixedOffset>,
        cancel: &CancellationToken,
    ) -> Result<CalibrationReport, CalibrationError> {
        let _guard = self.calibration_guard.lock().await;

        let snapshot = self.snapshot();
        let result = calibration::fit(&snapshot.samples, &self.priors, &self.settings, cancel);
        let fit: ThermalFit = match result {
            Ok(fit) => fit,
            Err(CalibrationError::InsufficientData { usable, required }) => {
                warn!(usable, required, "thermal calibration skipped: insufficient data");
                return Err(CalibrationError::InsufficientData { usable, required });
            }
            Err(err) => {
                warn!(error = %err, "thermal calibration did not update the model");
                return Err(err);
            }
        };

        let previous = self.state();
        let current = ThermalModelState {
            k: fit.k_per_hour,
            s: fit.s_per_hour,
            confidence: fit.confidence,
            data_points: fit.intervals,
            last_update: Some(now),
        };
        *self.state.write() = current;

        let samples_consumed = self.release(&snapshot);

        info!(
            k = current.k,
            s = current.s,
            confidence = current.confidence,
            data_points = current.data_points,
            rmse = fit.rmse,
            previous_k = previous.k,
            previous_s = previous.s,
            "thermal model calibrated"
        );

        Ok(CalibrationReport {
            previous,
            current,
            rmse: fit.rmse,
            samples_consumed,
        })
    }

    fn snapshot(&self) -> Snapshot {
        let buffer = self.samples.lock();
        Snapshot {
            samples: buffer.samples.clone(),
            removed_at: buffer.removed,
        }
    }

    /// Drop the snapshotted prefix of the buffer. Samples ingested after the
    /// snapshot stay whatever their timestamp; snapshot samples the overflow
    /// trim already removed are not counted twice.
    fn release(&self, snapshot: &Snapshot) -> usize {
        let mut buffer = self.samples.lock();
        let trimmed_since = (buffer.removed - snapshot.removed_at) as usize;
        let remaining = snapshot.samples.len().saturating_sub(trimmed_since);
        let before = buffer.samples.len();
        buffer.drain_front(remaining);
        before - buffer.samples.len()
    }
}
