pub mod heating;

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::providers::{ElprisetPriceProvider, HeatingDevice, PriceProvider, SmhiWeatherProvider, WeatherProvider};
use crate::resilience::{BreakerEventSink, BreakerRegistry, RecentEvents};
use crate::thermal::ThermalModel;

pub use heating::{ControllerSettings, CycleReport, HeatingController, DEVICE_BREAKER, PRICE_BREAKER, WEATHER_BREAKER};

/// Breaker events kept for the status endpoint
const RECENT_EVENT_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub controller: Arc<HeatingController>,
    pub breakers: Arc<BreakerRegistry>,
    pub events: Arc<RecentEvents>,
    pub started_at: Instant,
    /// Cancelled on shutdown; background tasks and API calibrations observe it
    pub cancel: CancellationToken,
}

impl AppState {
    pub fn new(cfg: Config) -> Result<Self> {
        let events = Arc::new(RecentEvents::new(RECENT_EVENT_CAPACITY));
        let sink: Arc<dyn BreakerEventSink> = events.clone();
        let breakers = Arc::new(BreakerRegistry::new(cfg.breaker.clone(), Some(sink))?);

        #[cfg(feature = "sim")]
        let sim = sim::SimWorld::new();

        let prices: Arc<dyn PriceProvider> = match cfg.prices.provider.as_str() {
            "elpriset" => Arc::new(ElprisetPriceProvider::new(
                cfg.prices.base_url.clone(),
                Duration::from_secs(cfg.prices.http_timeout_seconds),
                Duration::from_secs(cfg.prices.cache_ttl_seconds),
            )?),
            #[cfg(feature = "sim")]
            "sim" => sim.prices.clone(),
            other => anyhow::bail!("unknown price provider '{other}'"),
        };

        let weather: Arc<dyn WeatherProvider> = match cfg.weather.provider.as_str() {
            "smhi" => Arc::new(SmhiWeatherProvider::new(
                cfg.weather.base_url.clone(),
                cfg.weather.latitude,
                cfg.weather.longitude,
                Duration::from_secs(cfg.weather.http_timeout_seconds),
            )?),
            #[cfg(feature = "sim")]
            "sim" => sim.weather.clone(),
            other => anyhow::bail!("unknown weather provider '{other}'"),
        };

        #[cfg(feature = "sim")]
        let device: Arc<dyn HeatingDevice> = sim.house.clone();
        #[cfg(not(feature = "sim"))]
        let device: Arc<dyn HeatingDevice> = anyhow::bail!("no heating device driver available; build with the `sim` feature");

        let thermal = Arc::new(ThermalModel::new(cfg.engine.thermal, cfg.thermal.clone()));
        let controller = Arc::new(HeatingController::new(
            cfg.engine.clone(),
            ControllerSettings {
                area: cfg.controller.price_area,
                occupied: cfg.controller.default_occupied,
                dhw_enabled: cfg.controller.dhw_enabled,
                min_tuning_confidence: cfg.controller.min_tuning_confidence,
            },
            prices,
            weather,
            device,
            breakers.clone(),
            thermal,
        ));

        Ok(Self {
            cfg,
            controller,
            breakers,
            events,
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
        })
    }
}

/// Start the control loop, the calibration loop and the breaker monitor
pub fn spawn_controller_tasks(state: &AppState, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let tick = Duration::from_secs(state.cfg.controller.tick_seconds);
    let calibration = Duration::from_secs(state.cfg.controller.calibration_interval_hours * 3600);
    info!(
        tick_seconds = tick.as_secs(),
        calibration_hours = state.cfg.controller.calibration_interval_hours,
        area = %state.cfg.controller.price_area,
        "starting controller tasks"
    );

    vec![
        tokio::spawn(state.controller.clone().run(tick, cancel.clone())),
        tokio::spawn(state.controller.clone().calibration_loop(calibration, cancel.clone())),
        state.breakers.spawn_monitor(cancel),
    ]
}

#[cfg(feature = "sim")]
mod sim {
    use std::sync::Arc;

    use crate::providers::sim::{DiurnalWeather, SimClock, SimulatedHouse, SimulatedPrices, SimulatedWeather};
    use crate::thermal::FirstOrderModel;

    /// Simulated house, weather and price feed on the wall clock
    pub(super) struct SimWorld {
        pub prices: Arc<SimulatedPrices>,
        pub weather: Arc<SimulatedWeather>,
        pub house: Arc<SimulatedHouse>,
    }

    impl SimWorld {
        pub fn new() -> Self {
            let clock = SimClock::wall();
            let profile = DiurnalWeather::default();
            // heat pump strong enough to hold ~21°C in a Nordic winter
            let building = FirstOrderModel::new(1.0 / 90.0, 0.6);
            Self {
                prices: Arc::new(SimulatedPrices::new(clock.clone(), 1.2, 0.6)),
                weather: Arc::new(SimulatedWeather::new(clock.clone(), profile)),
                house: Arc::new(SimulatedHouse::new(clock, building, profile, 20.5, 21.0)),
            }
        }
    }
}
