//! Least-squares calibration of the first-order thermal model.
//!
//! Every pair of consecutive samples gives one observation of the indoor
//! temperature slope:
//!
//! ```text
//! (T_in[i+1] - T_in[i]) / dt = K * (T_out[i] - T_in[i]) + S * (T_set[i] - T_in[i])
//! ```
//!
//! K and S are solved from the 2x2 normal equations with a ridge penalty
//! pulling them towards the configured priors. The priors come from
//! configuration only, so a fit is a pure function of the samples.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::config::ConfigError;
use crate::domain::TelemetrySample;
use crate::engine::ThermalPriors;

/// How often the fit loop polls for cancellation
const CANCEL_CHECK_EVERY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Minimum usable sample intervals for a fit
    #[validate(range(min = 2))]
    pub min_samples: usize,
    /// Intervals longer than this are treated as gaps and skipped
    #[validate(range(min = 1))]
    pub max_sample_gap_minutes: i64,
    /// Ridge weight towards the priors, in (°C)²
    #[validate(range(min = 0.0))]
    pub prior_weight: f64,
    /// Prior for S (1/h)
    #[validate(range(min = 0.0))]
    pub prior_gain_per_hour: f64,
    /// Interval count at which the sample factor of the confidence reaches 1 - 1/e
    #[validate(range(exclusive_min = 0.0))]
    pub confidence_sample_scale: f64,
    /// Residual RMSE (°C/h) at which the residual factor of the confidence halves
    #[validate(range(exclusive_min = 0.0))]
    pub confidence_residual_scale: f64,
    /// Upper bound on buffered samples between calibrations
    #[validate(range(min = 2))]
    pub max_buffered_samples: usize,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            min_samples: 48,
            max_sample_gap_minutes: 90,
            prior_weight: 1.0,
            prior_gain_per_hour: 0.1,
            confidence_sample_scale: 300.0,
            confidence_residual_scale: 0.2,
            // four weeks of 5-minute cycles
            max_buffered_samples: 4 * 7 * 24 * 12,
        }
    }
}

impl CalibrationSettings {
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        let finite = [
            ("thermal.prior_weight", self.prior_weight),
            ("thermal.prior_gain_per_hour", self.prior_gain_per_hour),
            ("thermal.confidence_sample_scale", self.confidence_sample_scale),
            ("thermal.confidence_residual_scale", self.confidence_residual_scale),
        ];
        if let Some((field, _)) = finite.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ConfigError::NonFinite(*field));
        }
        Ok(self)
    }
}

/// Why a calibration run left the model untouched
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("insufficient data: {usable} usable intervals, {required} required")]
    InsufficientData { usable: usize, required: usize },

    #[error("fit rejected: {0}")]
    Rejected(String),

    #[error("calibration cancelled")]
    Cancelled,
}

/// Result of a successful fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalFit {
    pub k_per_hour: f64,
    pub s_per_hour: f64,
    /// Root mean square slope residual (°C/h)
    pub rmse: f64,
    pub intervals: usize,
    pub confidence: f64,
}

/// One regression row: slope and the two regressors
#[derive(Debug, Clone, Copy)]
struct Observation {
    slope: f64,
    loss: f64,
    drive: f64,
}

fn observations(
    samples: &[TelemetrySample],
    settings: &CalibrationSettings,
    cancel: &CancellationToken,
) -> Result<Vec<Observation>, CalibrationError> {
    let mut sorted: Vec<TelemetrySample> = samples.iter().copied().filter(TelemetrySample::is_finite).collect();
    sorted.sort_by_key(|s| s.time);

    let max_gap_h = settings.max_sample_gap_minutes as f64 / 60.0;
    let mut rows = Vec::with_capacity(sorted.len().saturating_sub(1));
    for (i, pair) in sorted.windows(2).enumerate() {
        if i % CANCEL_CHECK_EVERY == 0 && cancel.is_cancelled() {
            return Err(CalibrationError::Cancelled);
        }
        let (a, b) = (pair[0], pair[1]);
        let dt_h = (b.time - a.time).num_seconds() as f64 / 3600.0;
        if dt_h <= 0.0 || dt_h > max_gap_h {
            continue;
        }
        rows.push(Observation {
            slope: (b.indoor_c - a.indoor_c) / dt_h,
            loss: a.outdoor_c - a.indoor_c,
            drive: a.setpoint_c - a.indoor_c,
        });
    }
    Ok(rows)
}

/// Confidence in [0, 1] from interval count and residual size
pub fn confidence(intervals: usize, rmse: f64, settings: &CalibrationSettings) -> f64 {
    if intervals == 0 || !rmse.is_finite() {
        return 0.0;
    }
    let sample_factor = 1.0 - (-(intervals as f64) / settings.confidence_sample_scale).exp();
    let residual_factor = 1.0 / (1.0 + (rmse / settings.confidence_residual_scale).powi(2));
    (sample_factor * residual_factor).clamp(0.0, 1.0)
}

/// Fit K and S to the given samples.
///
/// Samples may arrive in any order and may contain gaps; non-finite samples
/// are dropped. Fewer than `min_samples` usable intervals is reported as
/// [`CalibrationError::InsufficientData`].
pub fn fit(
    samples: &[TelemetrySample],
    priors: &ThermalPriors,
    settings: &CalibrationSettings,
    cancel: &CancellationToken,
) -> Result<ThermalFit, CalibrationError> {
    if cancel.is_cancelled() {
        return Err(CalibrationError::Cancelled);
    }

    let rows = observations(samples, settings, cancel)?;
    if rows.len() < settings.min_samples {
        return Err(CalibrationError::InsufficientData {
            usable: rows.len(),
            required: settings.min_samples,
        });
    }

    let lambda = settings.prior_weight;
    let k0 = priors.heat_loss_coefficient();
    let s0 = settings.prior_gain_per_hour;

    let (mut a00, mut a01, mut a11, mut b0, mut b1) = (lambda, 0.0, lambda, lambda * k0, lambda * s0);
    for r in &rows {
        a00 += r.loss * r.loss;
        a01 += r.loss * r.drive;
        a11 += r.drive * r.drive;
        b0 += r.loss * r.slope;
        b1 += r.drive * r.slope;
    }

    let det = a00 * a11 - a01 * a01;
    if !det.is_finite() || det.abs() < 1e-12 {
        return Err(CalibrationError::Rejected(
            "singular normal equations (no variation in temperatures)".to_string(),
        ));
    }
    let k = (b0 * a11 - a01 * b1) / det;
    let s = (a00 * b1 - a01 * b0) / det;

    if !k.is_finite() || k <= 0.0 {
        return Err(CalibrationError::Rejected(format!(
            "non-physical heat-loss coefficient K={k:.5}"
        )));
    }
    if !s.is_finite() || s < 0.0 {
        return Err(CalibrationError::Rejected(format!(
            "non-physical gain coefficient S={s:.5}"
        )));
    }

    if cancel.is_cancelled() {
        return Err(CalibrationError::Cancelled);
    }

    let sse: f64 = rows
        .iter()
        .map(|r| (r.slope - k * r.loss - s * r.drive).powi(2))
        .sum();
    let rmse = (sse / rows.len() as f64).sqrt();

    Ok(ThermalFit {
        k_per_hour: k,
        s_per_hour: s,
        rmse,
        intervals: rows.len(),
        confidence: confidence(rows.len(), rmse, settings),
    })
}
