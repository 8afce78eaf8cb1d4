use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::ConfigError;

/// Acceptable indoor temperature range for one occupancy state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComfortBand {
    pub lower_c: f64,
    pub upper_c: f64,
}

impl ComfortBand {
    pub fn new(lower_c: f64, upper_c: f64) -> Self {
        Self { lower_c, upper_c }
    }

    pub fn width(&self) -> f64 {
        self.upper_c - self.lower_c
    }

    pub fn contains(&self, temp_c: f64) -> bool {
        temp_c >= self.lower_c && temp_c <= self.upper_c
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PreheatConfig {
    pub enable: bool,
    /// Forward price window in hours
    #[validate(range(min = 0.0, max = 168.0))]
    pub horizon_hours: f64,
    /// Percentile at or below which an hour counts as cheap
    #[validate(range(min = 0.0, max = 1.0))]
    pub cheap_percentile: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SafetyConfig {
    /// Minimum setpoint delta that triggers a change (°C)
    #[validate(range(min = 0.0, max = 5.0))]
    pub deadband_c: f64,
    /// Minimum time between two setpoint changes
    pub min_setpoint_change_minutes: u32,
    /// Setpoint floor applied when it is -15°C or colder outside
    #[serde(default)]
    pub extreme_weather_min_c: Option<f64>,
}

/// First-order RC priors of the building
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct ThermalPriors {
    /// Envelope resistance (K/kW)
    #[validate(range(exclusive_min = 0.0))]
    pub r_thermal: f64,
    /// Effective heat capacity (kWh/K)
    #[validate(range(exclusive_min = 0.0))]
    pub c_thermal: f64,
}

impl ThermalPriors {
    /// Time constant R·C in hours
    pub fn time_constant_hours(&self) -> f64 {
        self.r_thermal * self.c_thermal
    }

    /// Heat-loss coefficient implied by the priors (1/h)
    pub fn heat_loss_coefficient(&self) -> f64 {
        1.0 / self.time_constant_hours()
    }
}

/// Tuning of the heating and hot-water engines.
///
/// Created from stored settings and only replaced wholesale by an explicit
/// reconfiguration (e.g. after calibration). Always pass a configuration
/// through [`EngineConfig::validated`] before computing decisions with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EngineConfig {
    pub comfort_occupied: ComfortBand,
    pub comfort_away: ComfortBand,
    pub min_setpoint_c: f64,
    pub max_setpoint_c: f64,
    #[validate(nested)]
    pub preheat: PreheatConfig,
    #[validate(nested)]
    pub safety: SafetyConfig,
    #[validate(nested)]
    pub thermal: ThermalPriors,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            comfort_occupied: ComfortBand::new(20.5, 22.5),
            comfort_away: ComfortBand::new(18.0, 20.0),
            min_setpoint_c: 16.0,
            max_setpoint_c: 26.0,
            preheat: PreheatConfig {
                enable: true,
                horizon_hours: 12.0,
                cheap_percentile: 0.35,
            },
            safety: SafetyConfig {
                deadband_c: 0.3,
                min_setpoint_change_minutes: 30,
                extreme_weather_min_c: Some(20.0),
            },
            thermal: ThermalPriors {
                r_thermal: 15.0,
                c_thermal: 6.0,
            },
        }
    }
}

impl EngineConfig {
    /// Check every invariant and hand the configuration back.
    ///
    /// Fails on the first violation rather than clamping, so that a bad
    /// setting surfaces before any decision is computed with it.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;

        let finite = [
            ("min_setpoint_c", self.min_setpoint_c),
            ("max_setpoint_c", self.max_setpoint_c),
            ("comfort_occupied.lower_c", self.comfort_occupied.lower_c),
            ("comfort_occupied.upper_c", self.comfort_occupied.upper_c),
            ("comfort_away.lower_c", self.comfort_away.lower_c),
            ("comfort_away.upper_c", self.comfort_away.upper_c),
            ("preheat.horizon_hours", self.preheat.horizon_hours),
            ("preheat.cheap_percentile", self.preheat.cheap_percentile),
            ("safety.deadband_c", self.safety.deadband_c),
            ("thermal.r_thermal", self.thermal.r_thermal),
            ("thermal.c_thermal", self.thermal.c_thermal),
        ];
        if let Some((field, _)) = finite.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ConfigError::NonFinite(*field));
        }

        if self.min_setpoint_c >= self.max_setpoint_c {
            return Err(ConfigError::InvertedSetpointLimits {
                min: self.min_setpoint_c,
                max: self.max_setpoint_c,
            });
        }

        for (name, band) in [("occupied", &self.comfort_occupied), ("away", &self.comfort_away)] {
            if band.lower_c >= band.upper_c {
                return Err(ConfigError::InvertedBand {
                    band: name,
                    lower: band.lower_c,
                    upper: band.upper_c,
                });
            }
            if band.lower_c < self.min_setpoint_c || band.upper_c > self.max_setpoint_c {
                return Err(ConfigError::BandOutsideLimits {
                    band: name,
                    lower: band.lower_c,
                    upper: band.upper_c,
                    min: self.min_setpoint_c,
                    max: self.max_setpoint_c,
                });
            }
        }

        if let Some(floor) = self.safety.extreme_weather_min_c {
            if !floor.is_finite() {
                return Err(ConfigError::NonFinite("safety.extreme_weather_min_c"));
            }
            if floor < self.min_setpoint_c || floor > self.max_setpoint_c {
                return Err(ConfigError::Invalid(format!(
                    "extreme_weather_min_c {floor} outside setpoint limits [{}, {}]",
                    self.min_setpoint_c, self.max_setpoint_c
                )));
            }
        }

        Ok(self)
    }

    /// Comfort band for the given occupancy state
    pub fn band(&self, occupied: bool) -> &ComfortBand {
        if occupied {
            &self.comfort_occupied
        } else {
            &self.comfort_away
        }
    }

    pub fn clamp_setpoint(&self, temp_c: f64) -> f64 {
        temp_c.clamp(self.min_setpoint_c, self.max_setpoint_c)
    }
}
