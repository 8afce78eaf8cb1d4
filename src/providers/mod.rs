//! External dependencies of the controller: price feed, weather and the
//! heating appliance. Every call made through these traits is wrapped in a
//! circuit breaker by the controller.

pub mod elpriset;
#[cfg(feature = "sim")]
pub mod sim;
pub mod smhi;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{DhwAction, IndoorTelemetry, PriceArea, PricePoint, WeatherReading};

pub use elpriset::ElprisetPriceProvider;
pub use smhi::SmhiWeatherProvider;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Day-ahead prices ordered by time, covering at least the current period
    async fn prices(&self, area: PriceArea) -> Result<Vec<PricePoint>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self) -> Result<WeatherReading>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HeatingDevice: Send + Sync {
    async fn read_telemetry(&self) -> Result<IndoorTelemetry>;
    async fn set_target(&self, target_c: f64) -> Result<()>;
    async fn set_dhw_mode(&self, action: DhwAction) -> Result<()>;
}
