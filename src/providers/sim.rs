//! Deterministic stand-ins for the price feed, weather and heating
//! appliance, sharing one clock. Used for local runs without hardware and
//! for end-to-end tests.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Local, TimeZone, Timelike};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{HeatingDevice, PriceProvider, WeatherProvider};
use crate::domain::{DhwAction, IndoorTelemetry, PriceArea, PricePoint, WeatherReading};
use crate::thermal::FirstOrderModel;

/// Integration step of the simulated house (hours)
const SIM_STEP_HOURS: f64 = 1.0 / 60.0;

/// Wall clock or a manually advanced one
pub struct SimClock {
    manual: Mutex<Option<DateTime<FixedOffset>>>,
}

impl SimClock {
    pub fn wall() -> Arc<Self> {
        Arc::new(Self {
            manual: Mutex::new(None),
        })
    }

    pub fn manual(start: DateTime<FixedOffset>) -> Arc<Self> {
        Arc::new(Self {
            manual: Mutex::new(Some(start)),
        })
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        let manual = *self.manual.lock();
        manual.unwrap_or_else(|| Local::now().fixed_offset())
    }

    /// Move a manual clock forward; no effect on the wall clock
    pub fn advance(&self, by: Duration) {
        if let Some(t) = self.manual.lock().as_mut() {
            *t += by;
        }
    }
}

/// Sinusoidal outdoor temperature with its minimum at `coldest_hour`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiurnalWeather {
    pub mean_c: f64,
    pub amplitude_c: f64,
    pub coldest_hour: f64,
}

impl Default for DiurnalWeather {
    fn default() -> Self {
        // Stockholm, January
        Self {
            mean_c: -3.0,
            amplitude_c: 3.0,
            coldest_hour: 5.0,
        }
    }
}

impl DiurnalWeather {
    pub fn outdoor_at(&self, time: DateTime<FixedOffset>) -> f64 {
        let hour = time.hour() as f64 + time.minute() as f64 / 60.0;
        self.mean_c - self.amplitude_c * ((hour - self.coldest_hour) / 24.0 * TAU).cos()
    }
}

pub struct SimulatedWeather {
    clock: Arc<SimClock>,
    profile: DiurnalWeather,
}

impl SimulatedWeather {
    pub fn new(clock: Arc<SimClock>, profile: DiurnalWeather) -> Self {
        Self { clock, profile }
    }
}

#[async_trait]
impl WeatherProvider for SimulatedWeather {
    async fn current(&self) -> Result<WeatherReading> {
        Ok(WeatherReading {
            outdoor_c: self.profile.outdoor_at(self.clock.now()),
        })
    }
}

/// Synthetic day-ahead curve: cheap nights, morning and evening peaks
pub struct SimulatedPrices {
    clock: Arc<SimClock>,
    base_sek: f64,
    amplitude_sek: f64,
    outage: AtomicBool,
}

impl SimulatedPrices {
    pub fn new(clock: Arc<SimClock>, base_sek: f64, amplitude_sek: f64) -> Self {
        Self {
            clock,
            base_sek,
            amplitude_sek,
            outage: AtomicBool::new(false),
        }
    }

    /// Make every call fail until cleared
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    pub fn price_at_hour(&self, hour: u32) -> f64 {
        let h = hour as f64;
        // peaks at 06 and 18, troughs at 00 and 12
        let shape = -(h / 12.0 * TAU).cos();
        let night = if hour < 5 { -0.3 } else { 0.0 };
        (self.base_sek + self.amplitude_sek * (shape + night)).max(0.0)
    }

    /// Hourly prices from midnight today through tomorrow
    pub fn series(&self) -> Vec<PricePoint> {
        let now = self.clock.now();
        let offset = *now.offset();
        let midnight = now.date_naive().and_hms_opt(0, 0, 0).and_then(|t| offset.from_local_datetime(&t).single());
        let Some(midnight) = midnight else {
            return Vec::new();
        };
        (0..48)
            .map(|i| {
                let time = midnight + Duration::hours(i);
                PricePoint::new(time, self.price_at_hour(time.hour()))
            })
            .collect()
    }
}

#[async_trait]
impl PriceProvider for SimulatedPrices {
    async fn prices(&self, _area: PriceArea) -> Result<Vec<PricePoint>> {
        if self.outage.load(Ordering::SeqCst) {
            anyhow::bail!("simulated price feed outage");
        }
        Ok(self.series())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HouseState {
    pub indoor_c: f64,
    pub target_c: f64,
    pub dhw: DhwAction,
    pub time: DateTime<FixedOffset>,
}

/// Heat pump and building following a first-order thermal model
pub struct SimulatedHouse {
    clock: Arc<SimClock>,
    model: FirstOrderModel,
    weather: DiurnalWeather,
    state: Mutex<HouseState>,
    offline: AtomicBool,
}

impl SimulatedHouse {
    pub fn new(clock: Arc<SimClock>, model: FirstOrderModel, weather: DiurnalWeather, indoor_c: f64, target_c: f64) -> Self {
        let time = clock.now();
        Self {
            clock,
            model,
            weather,
            state: Mutex::new(HouseState {
                indoor_c,
                target_c,
                dhw: DhwAction::Maintain,
                time,
            }),
            offline: AtomicBool::new(false),
        }
    }

    /// Make the appliance unreachable until cleared
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Integrate the building up to the clock's current time
    pub fn sync(&self) -> HouseState {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let mut elapsed_h = (now - state.time).num_seconds() as f64 / 3600.0;
        while elapsed_h > 0.0 {
            let dt = elapsed_h.min(SIM_STEP_HOURS);
            let at = state.time;
            let outdoor = self.weather.outdoor_at(at);
            state.indoor_c = self.model.step(state.indoor_c, outdoor, state.target_c, dt);
            state.time = at + Duration::milliseconds((dt * 3_600_000.0) as i64);
            elapsed_h -= dt;
        }
        state.time = state.time.max(now);
        *state
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("simulated heat pump unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl HeatingDevice for SimulatedHouse {
    async fn read_telemetry(&self) -> Result<IndoorTelemetry> {
        self.ensure_online()?;
        let state = self.sync();
        Ok(IndoorTelemetry {
            indoor_c: state.indoor_c,
            target_c: state.target_c,
        })
    }

    async fn set_target(&self, target_c: f64) -> Result<()> {
        self.ensure_online()?;
        self.sync();
        self.state.lock().target_c = target_c;
        Ok(())
    }

    async fn set_dhw_mode(&self, action: DhwAction) -> Result<()> {
        self.ensure_online()?;
        self.state.lock().dhw = action;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 15, 0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = SimClock::manual(start());
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now(), start() + Duration::minutes(90));
    }

    #[test]
    fn test_weather_coldest_at_configured_hour() {
        let w = DiurnalWeather::default();
        let coldest = w.outdoor_at(start() + Duration::hours(5));
        let warmest = w.outdoor_at(start() + Duration::hours(17));
        assert!((coldest - -6.0).abs() < 1e-9);
        assert!((warmest - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_series_shape() {
        let prices = SimulatedPrices::new(SimClock::manual(start() + Duration::hours(9)), 1.5, 0.8);
        let series = prices.series();
        assert_eq!(series.len(), 48);
        assert_eq!(series[0].time, start());
        assert!(series[18].price > series[12].price);
        assert!(series[3].price < series[6].price);
        assert!(series.iter().all(|p| p.price >= 0.0));
    }

    #[tokio::test]
    async fn test_price_outage() {
        let prices = SimulatedPrices::new(SimClock::manual(start()), 1.5, 0.8);
        prices.set_outage(true);
        assert!(prices.prices(PriceArea::SE3).await.is_err());
        prices.set_outage(false);
        assert_eq!(prices.prices(PriceArea::SE3).await.unwrap().len(), 48);
    }

    #[tokio::test]
    async fn test_house_follows_setpoint_and_weather() {
        let clock = SimClock::manual(start());
        let house = SimulatedHouse::new(clock.clone(), FirstOrderModel::default(), DiurnalWeather::default(), 19.0, 22.0);
        clock.advance(Duration::hours(6));
        let t = house.read_telemetry().await.unwrap();
        assert!(t.indoor_c > 19.0 && t.indoor_c < 22.0, "indoor={}", t.indoor_c);
        assert_eq!(t.target_c, 22.0);

        house.set_target(20.0).await.unwrap();
        assert_eq!(house.read_telemetry().await.unwrap().target_c, 20.0);
    }

    #[tokio::test]
    async fn test_offline_house_errors() {
        let house = SimulatedHouse::new(
            SimClock::manual(start()),
            FirstOrderModel::default(),
            DiurnalWeather::default(),
            21.0,
            21.0,
        );
        house.set_offline(true);
        assert!(house.read_telemetry().await.is_err());
        assert!(house.set_dhw_mode(DhwAction::HeatNow).await.is_err());
    }
}
