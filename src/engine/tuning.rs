//! Feeds a calibrated thermal model back into the engine configuration.

use super::config::EngineConfig;
use crate::config::ConfigError;
use crate::thermal::ThermalModelState;

/// Shortest and longest preheat horizon derived from the building (hours)
pub const MIN_DERIVED_HORIZON_H: f64 = 3.0;
pub const MAX_DERIVED_HORIZON_H: f64 = 24.0;
/// A building can bank heat for roughly this fraction of its time constant
pub const HORIZON_FRACTION_OF_TIME_CONSTANT: f64 = 0.25;

/// Derive an updated engine configuration from a calibrated thermal model.
///
/// Returns `Ok(None)` when the model is uncalibrated or its confidence is
/// below `min_confidence`. The derived configuration is re-validated
/// before it is handed back.
pub fn apply_thermal_model(
    cfg: &EngineConfig,
    model: &ThermalModelState,
    min_confidence: f64,
) -> Result<Option<EngineConfig>, ConfigError> {
    if !model.is_calibrated() || model.confidence < min_confidence {
        return Ok(None);
    }
    if !model.k.is_finite() || model.k <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "calibrated heat-loss coefficient {} is not usable",
            model.k
        )));
    }

    let mut tuned = cfg.clone();
    tuned.thermal.r_thermal = 1.0 / (model.k * cfg.thermal.c_thermal);
    tuned.preheat.horizon_hours = (model.time_constant_hours() * HORIZON_FRACTION_OF_TIME_CONSTANT)
        .clamp(MIN_DERIVED_HORIZON_H, MAX_DERIVED_HORIZON_H)
        .round();

    tuned.validated().map(Some)
}
