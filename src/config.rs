use std::net::SocketAddr;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::domain::PriceArea;
use crate::engine::EngineConfig;
use crate::resilience::BreakerConfig;
use crate::thermal::CalibrationSettings;

/// Invalid configuration value
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be a finite number")]
    NonFinite(&'static str),

    #[error("setpoint limits inverted: min {min} >= max {max}")]
    InvertedSetpointLimits { min: f64, max: f64 },

    #[error("{band} comfort band inverted: lower {lower} >= upper {upper}")]
    InvertedBand { band: &'static str, lower: f64, upper: f64 },

    #[error("{band} comfort band [{lower}, {upper}] outside setpoint limits [{min}, {max}]")]
    BandOutsideLimits {
        band: &'static str,
        lower: f64,
        upper: f64,
        min: f64,
        max: f64,
    },

    #[error("validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub controller: ControllerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub thermal: CalibrationSettings,
    pub prices: PricesConfig,
    pub weather: WeatherConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ControllerConfig {
    /// Seconds between control cycles
    #[validate(range(min = 10))]
    pub tick_seconds: u64,
    #[validate(range(min = 1))]
    pub calibration_interval_hours: u64,
    pub price_area: PriceArea,
    /// Occupancy assumed when no schedule says otherwise
    pub default_occupied: bool,
    pub dhw_enabled: bool,
    /// Calibrations below this confidence do not retune the engine
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_tuning_confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricesConfig {
    /// "elpriset" or "sim"
    pub provider: String,
    pub base_url: String,
    pub http_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherConfig {
    /// "smhi" or "sim"
    pub provider: String,
    pub base_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub http_timeout_seconds: u64,
}

impl Config {
    /// `config/default.toml` overlaid with `SHC__SECTION__KEY` environment variables
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("SHC__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract()?;
        cfg.validated()
    }

    fn validated(mut self) -> Result<Self> {
        self.controller.validate().map_err(ConfigError::from)?;
        if !self.controller.min_tuning_confidence.is_finite() {
            return Err(ConfigError::NonFinite("controller.min_tuning_confidence").into());
        }
        self.engine = self.engine.validated()?;
        self.breaker = self.breaker.validated()?;
        self.thermal = self.thermal.validated()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const MINIMAL: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 8080

        [controller]
        tick_seconds = 300
        calibration_interval_hours = 168
        price_area = "SE3"
        default_occupied = true
        dhw_enabled = true
        min_tuning_confidence = 0.5

        [prices]
        provider = "sim"
        base_url = "https://www.elprisetjustnu.se"
        http_timeout_seconds = 10
        cache_ttl_seconds = 900

        [weather]
        provider = "sim"
        base_url = "https://opendata-download-metfcst.smhi.se/api"
        latitude = 59.3293
        longitude = 18.0686
        http_timeout_seconds = 10
    "#;

    #[test]
    fn test_minimal_file_uses_section_defaults() {
        let cfg = Config::from_figment(Figment::new().merge(Toml::string(MINIMAL))).unwrap();
        assert_eq!(cfg.controller.price_area, PriceArea::SE3);
        assert_eq!(cfg.engine, EngineConfig::default());
        assert_eq!(cfg.breaker, BreakerConfig::default());
        assert_eq!(cfg.server.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.set_env("SHC__CONTROLLER__PRICE_AREA", "SE4");
            jail.set_env("SHC__BREAKER__COOLDOWN_SECONDS", "120");
            let figment = Figment::new()
                .merge(Toml::string(MINIMAL))
                .merge(Env::prefixed("SHC__").split("__"));
            let cfg = Config::from_figment(figment).map_err(|e| e.to_string())?;
            assert_eq!(cfg.controller.price_area, PriceArea::SE4);
            assert_eq!(cfg.breaker.cooldown_seconds, 120);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_engine_section_rejected() {
        let toml = format!(
            "{MINIMAL}\n[engine]\nmin_setpoint_c = 26.0\nmax_setpoint_c = 16.0\n\
             comfort_occupied = {{ lower_c = 20.5, upper_c = 22.5 }}\n\
             comfort_away = {{ lower_c = 18.0, upper_c = 20.0 }}\n\
             preheat = {{ enable = true, horizon_hours = 12.0, cheap_percentile = 0.35 }}\n\
             safety = {{ deadband_c = 0.3, min_setpoint_change_minutes = 30 }}\n\
             thermal = {{ r_thermal = 15.0, c_thermal = 6.0 }}\n"
        );
        let err = Config::from_figment(Figment::new().merge(Toml::string(&toml))).unwrap_err();
        assert!(err.to_string().contains("setpoint limits inverted"), "{err}");
    }

    #[test]
    fn test_too_fast_tick_rejected() {
        let toml = MINIMAL.replace("tick_seconds = 300", "tick_seconds = 1");
        assert!(Config::from_figment(Figment::new().merge(Toml::string(&toml))).is_err());
    }

    #[test]
    fn test_nan_in_file_rejected() {
        let toml = format!("{MINIMAL}\n[thermal]\nprior_weight = nan\n");
        assert!(Config::from_figment(Figment::new().merge(Toml::string(&toml))).is_err());

        let toml = MINIMAL.replace("min_tuning_confidence = 0.5", "min_tuning_confidence = nan");
        assert!(Config::from_figment(Figment::new().merge(Toml::string(&toml))).is_err());
    }

    #[test]
    fn test_shipped_default_file_loads() {
        let cfg = Config::from_figment(Figment::new().merge(Toml::file("config/default.toml"))).unwrap();
        assert_eq!(cfg.engine, EngineConfig::default());
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert_eq!(cfg.prices.provider, "sim");
    }
}
