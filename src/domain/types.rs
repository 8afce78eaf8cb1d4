use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

// ============================================================================
// Price Types
// ============================================================================

/// Nordic day-ahead bidding zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceArea {
    SE1,
    SE2,
    SE3,
    SE4,
    NO1,
    NO2,
    NO3,
    NO4,
    NO5,
    FI,
    DK1,
    DK2,
}

impl std::fmt::Display for PriceArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SE1 => "SE1",
            Self::SE2 => "SE2",
            Self::SE3 => "SE3",
            Self::SE4 => "SE4",
            Self::NO1 => "NO1",
            Self::NO2 => "NO2",
            Self::NO3 => "NO3",
            Self::NO4 => "NO4",
            Self::NO5 => "NO5",
            Self::FI => "FI",
            Self::DK1 => "DK1",
            Self::DK2 => "DK2",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PriceArea {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SE1" => Ok(Self::SE1),
            "SE2" => Ok(Self::SE2),
            "SE3" => Ok(Self::SE3),
            "SE4" => Ok(Self::SE4),
            "NO1" => Ok(Self::NO1),
            "NO2" => Ok(Self::NO2),
            "NO3" => Ok(Self::NO3),
            "NO4" => Ok(Self::NO4),
            "NO5" => Ok(Self::NO5),
            "FI" => Ok(Self::FI),
            "DK1" => Ok(Self::DK1),
            "DK2" => Ok(Self::DK2),
            _ => Err("invalid area; expected SE1..SE4, NO1..NO5, FI, DK1 or DK2"),
        }
    }
}

impl PriceArea {
    /// Only the Swedish zones are served by the elprisetjustnu.se API
    pub fn is_swedish(&self) -> bool {
        matches!(self, Self::SE1 | Self::SE2 | Self::SE3 | Self::SE4)
    }
}

/// One period of the day-ahead price series.
///
/// The series is ordered by `time`; one entry per period is assumed and
/// duplicates are not removed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub time: DateTime<FixedOffset>,
    /// Price in SEK/kWh
    pub price: f64,
}

impl PricePoint {
    pub fn new(time: DateTime<FixedOffset>, price: f64) -> Self {
        Self { time, price }
    }
}

// ============================================================================
// Telemetry Types
// ============================================================================

/// Indoor state reported by the heating appliance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndoorTelemetry {
    /// Measured indoor temperature (°C)
    pub indoor_c: f64,
    /// Setpoint currently held by the appliance (°C)
    pub target_c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    /// Outdoor temperature (°C)
    pub outdoor_c: f64,
}

/// Everything the heating and hot-water engines need for one control cycle.
///
/// Built fresh every cycle and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionInputs {
    pub now: DateTime<FixedOffset>,
    pub occupied: bool,
    pub prices: Vec<PricePoint>,
    /// Price of the current period in SEK/kWh
    pub current_price: f64,
    pub telemetry: IndoorTelemetry,
    pub weather: WeatherReading,
    /// When the setpoint was last changed, `None` if never
    pub last_setpoint_change: Option<DateTime<FixedOffset>>,
}

impl DecisionInputs {
    /// True when every numeric input is finite and a price series exists
    pub fn is_well_formed(&self) -> bool {
        !self.prices.is_empty()
            && self.current_price.is_finite()
            && self.telemetry.indoor_c.is_finite()
            && self.telemetry.target_c.is_finite()
            && self.weather.outdoor_c.is_finite()
    }
}

/// One historical observation used to calibrate the thermal model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub time: DateTime<FixedOffset>,
    pub indoor_c: f64,
    pub outdoor_c: f64,
    /// Setpoint held from this sample until the next one (°C)
    pub setpoint_c: f64,
}

impl TelemetrySample {
    pub fn is_finite(&self) -> bool {
        self.indoor_c.is_finite() && self.outdoor_c.is_finite() && self.setpoint_c.is_finite()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
