use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    Decision, DecisionInputs, DecisionReason, DhwAction, DhwDecision, PriceArea, PricePoint, TelemetrySample,
    WeatherReading,
};
use crate::engine::{self, EngineConfig};
use crate::providers::{HeatingDevice, PriceProvider, WeatherProvider};
use crate::resilience::BreakerRegistry;
use crate::thermal::{CalibrationError, CalibrationReport, ThermalModel};

pub const PRICE_BREAKER: &str = "prices";
pub const WEATHER_BREAKER: &str = "weather";
pub const DEVICE_BREAKER: &str = "device";

/// Outcome of one control cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub at: DateTime<FixedOffset>,
    pub decision: Decision,
    pub dhw: Option<DhwDecision>,
    pub indoor_c: f64,
    /// `None` when the weather could not be read
    pub outdoor_c: Option<f64>,
    /// The new setpoint reached the device
    pub applied: bool,
    /// Prices came from the last successful fetch
    pub stale_prices: bool,
    /// Dependencies that failed or were short-circuited this cycle
    pub degraded: Vec<&'static str>,
}

pub struct ControllerSettings {
    pub area: PriceArea,
    pub occupied: bool,
    pub dhw_enabled: bool,
    pub min_tuning_confidence: f64,
}

/// Gathers inputs, runs the engines and applies their decisions.
///
/// Every provider call goes through its own circuit breaker. A failed or
/// short-circuited price or weather call degrades the cycle to
/// "insufficient input" (or to the last known prices) instead of failing it.
pub struct HeatingController {
    engine: RwLock<EngineConfig>,
    area: PriceArea,
    occupied: AtomicBool,
    dhw_enabled: bool,
    min_tuning_confidence: f64,
    prices: Arc<dyn PriceProvider>,
    weather: Arc<dyn WeatherProvider>,
    device: Arc<dyn HeatingDevice>,
    breakers: Arc<BreakerRegistry>,
    thermal: Arc<ThermalModel>,
    last_prices: Mutex<Vec<PricePoint>>,
    last_setpoint_change: Mutex<Option<DateTime<FixedOffset>>>,
    last_dhw: Mutex<Option<DhwAction>>,
    last_cycle: RwLock<Option<CycleReport>>,
}

impl HeatingController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: EngineConfig,
        settings: ControllerSettings,
        prices: Arc<dyn PriceProvider>,
        weather: Arc<dyn WeatherProvider>,
        device: Arc<dyn HeatingDevice>,
        breakers: Arc<BreakerRegistry>,
        thermal: Arc<ThermalModel>,
    ) -> Self {
        Self {
            engine: RwLock::new(engine),
            area: settings.area,
            occupied: AtomicBool::new(settings.occupied),
            dhw_enabled: settings.dhw_enabled,
            min_tuning_confidence: settings.min_tuning_confidence,
            prices,
            weather,
            device,
            breakers,
            thermal,
            last_prices: Mutex::new(Vec::new()),
            last_setpoint_change: Mutex::new(None),
            last_dhw: Mutex::new(None),
            last_cycle: RwLock::new(None),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        self.engine.read().clone()
    }

    pub fn set_occupied(&self, occupied: bool) {
        self.occupied.store(occupied, Ordering::SeqCst);
    }

    pub fn occupied(&self) -> bool {
        self.occupied.load(Ordering::SeqCst)
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.read().clone()
    }

    pub fn last_setpoint_change(&self) -> Option<DateTime<FixedOffset>> {
        *self.last_setpoint_change.lock()
    }

    pub fn thermal(&self) -> &Arc<ThermalModel> {
        &self.thermal
    }

    async fn fetch_prices(&self, now: DateTime<FixedOffset>, degraded: &mut Vec<&'static str>) -> (Vec<PricePoint>, bool) {
        let breaker = self.breakers.get(PRICE_BREAKER);
        match breaker.execute(|| self.prices.prices(self.area)).await {
            Ok(prices) => {
                *self.last_prices.lock() = prices.clone();
                (prices, false)
            }
            Err(e) => {
                degraded.push(PRICE_BREAKER);
                let cached = self.last_prices.lock().clone();
                // day-ahead prices stay valid while they still cover now
                let usable = engine::current_period_price(&cached, now).is_some();
                warn!(error = %e, cached = usable, "price fetch failed");
                if usable {
                    (cached, true)
                } else {
                    (Vec::new(), false)
                }
            }
        }
    }

    async fn fetch_weather(&self, degraded: &mut Vec<&'static str>) -> WeatherReading {
        let breaker = self.breakers.get(WEATHER_BREAKER);
        match breaker.execute(|| self.weather.current()).await {
            Ok(reading) => reading,
            Err(e) => {
                degraded.push(WEATHER_BREAKER);
                warn!(error = %e, "weather fetch failed");
                WeatherReading { outdoor_c: f64::NAN }
            }
        }
    }

    /// Run one control cycle at `now`.
    ///
    /// Fails only when the heating device cannot be read.
    pub async fn run_cycle(&self, now: DateTime<FixedOffset>) -> Result<CycleReport> {
        let mut degraded = Vec::new();
        let device = self.breakers.get(DEVICE_BREAKER);

        let telemetry = match device.execute(|| self.device.read_telemetry()).await {
            Ok(t) => t,
            Err(e) => return Err(e.into_anyhow().context("reading heating device telemetry")),
        };
        let (prices, stale_prices) = self.fetch_prices(now, &mut degraded).await;
        let weather = self.fetch_weather(&mut degraded).await;

        let cfg = self.engine_config();
        let inputs = DecisionInputs {
            now,
            occupied: self.occupied(),
            current_price: engine::current_period_price(&prices, now).unwrap_or(f64::NAN),
            prices,
            telemetry,
            weather,
            last_setpoint_change: self.last_setpoint_change(),
        };

        let decision = engine::compute_heating_decision(&cfg, &inputs);
        info!(
            action = %decision.action,
            from_c = decision.from_c,
            to_c = decision.to_c,
            reason = decision.reason.as_str(),
            driver = ?decision.driver,
            percentile = decision.percentile,
            comfort_risk = %decision.comfort_risk,
            delta_cost_sek_per_h = decision.expected_delta_cost_per_hour_sek,
            "heating decision"
        );

        let mut applied = false;
        if decision.is_change() {
            match device.execute(|| self.device.set_target(decision.to_c)).await {
                Ok(()) => {
                    *self.last_setpoint_change.lock() = Some(now);
                    applied = true;
                }
                Err(e) => {
                    if !degraded.contains(&DEVICE_BREAKER) {
                        degraded.push(DEVICE_BREAKER);
                    }
                    warn!(error = %e, to_c = decision.to_c, "failed to apply setpoint");
                }
            }
        }

        let dhw = if self.dhw_enabled {
            let dhw = engine::compute_dhw_decision(&cfg, &inputs);
            // without usable inputs the tank keeps its current mode
            if dhw.reason != DecisionReason::InsufficientInput {
                self.apply_dhw(&dhw, &mut degraded).await;
            }
            Some(dhw)
        } else {
            None
        };

        if inputs.weather.outdoor_c.is_finite() {
            self.thermal.ingest(TelemetrySample {
                time: now,
                indoor_c: inputs.telemetry.indoor_c,
                outdoor_c: inputs.weather.outdoor_c,
                setpoint_c: if applied { decision.to_c } else { inputs.telemetry.target_c },
            });
        }

        let report = CycleReport {
            at: now,
            indoor_c: inputs.telemetry.indoor_c,
            outdoor_c: Some(inputs.weather.outdoor_c).filter(|t| t.is_finite()),
            decision,
            dhw,
            applied,
            stale_prices,
            degraded,
        };
        *self.last_cycle.write() = Some(report.clone());
        Ok(report)
    }

    async fn apply_dhw(&self, dhw: &DhwDecision, degraded: &mut Vec<&'static str>) {
        if *self.last_dhw.lock() == Some(dhw.action) {
            return;
        }
        let device = self.breakers.get(DEVICE_BREAKER);
        match device.execute(|| self.device.set_dhw_mode(dhw.action)).await {
            Ok(()) => {
                info!(action = %dhw.action, reason = dhw.reason.as_str(), percentile = dhw.percentile, "hot water mode set");
                *self.last_dhw.lock() = Some(dhw.action);
            }
            Err(e) => {
                if !degraded.contains(&DEVICE_BREAKER) {
                    degraded.push(DEVICE_BREAKER);
                }
                warn!(error = %e, action = %dhw.action, "failed to set hot water mode");
            }
        }
    }

    /// Recalibrate the thermal model and, when confident enough, retune the
    /// engine configuration from it
    pub async fn calibrate_and_tune(
        &self,
        now: DateTime<FixedOffset>,
        cancel: &CancellationToken,
    ) -> Result<CalibrationReport, CalibrationError> {
        let report = self.thermal.calibrate(now, cancel).await?;

        let current = self.engine_config();
        match engine::apply_thermal_model(&current, &report.current, self.min_tuning_confidence) {
            Ok(Some(tuned)) => {
                info!(
                    r_thermal = tuned.thermal.r_thermal,
                    horizon_hours = tuned.preheat.horizon_hours,
                    confidence = report.current.confidence,
                    "engine retuned from thermal model"
                );
                *self.engine.write() = tuned;
            }
            Ok(None) => debug!(
                confidence = report.current.confidence,
                required = self.min_tuning_confidence,
                "thermal model not confident enough to retune"
            ),
            Err(e) => warn!(error = %e, "derived engine configuration rejected"),
        }
        Ok(report)
    }

    /// Control loop; runs until `cancel` fires
    pub async fn run(self: Arc<Self>, tick: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle(Local::now().fixed_offset()).await {
                        warn!(error = %e, "control cycle failed");
                    }
                }
            }
        }
        info!("control loop stopped");
    }

    /// Calibration loop; first run one `period` after start
    pub async fn calibration_loop(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.calibrate_and_tune(Local::now().fixed_offset(), &cancel).await {
                        Ok(_) | Err(CalibrationError::InsufficientData { .. }) | Err(CalibrationError::Rejected(_)) => {}
                        Err(CalibrationError::Cancelled) => break,
                    }
                }
            }
        }
        info!("calibration loop stopped");
    }
}
