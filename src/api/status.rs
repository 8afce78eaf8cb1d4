use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{
    api::{error::ApiError, response::ApiResponse},
    controller::{AppState, CycleReport},
    engine::EngineConfig,
    resilience::{BreakerStats, TimedEvent},
    thermal::{CalibrationReport, ThermalModelState},
};

/// Breaker events returned by the breakers endpoint
const RECENT_EVENTS_LIMIT: usize = 50;

const PREDICTION_HOURS: f64 = 3.0;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    occupied: bool,
    last_cycle: Option<CycleReport>,
    engine: EngineConfig,
    thermal: ThermalInfo,
    system: SystemInfo,
}

#[derive(Debug, Serialize)]
pub struct ThermalInfo {
    #[serde(flatten)]
    state: ThermalModelState,
    time_constant_hours: f64,
    /// Indoor temperature expected after `PREDICTION_HOURS` at the last
    /// cycle's conditions and setpoint
    predicted_indoor_c: Option<f64>,
    pending_samples: usize,
}

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    uptime_seconds: u64,
    version: &'static str,
    mode: &'static str,
}

#[derive(Debug, Serialize)]
pub struct BreakerOverview {
    breakers: Vec<BreakerStats>,
    recent_events: Vec<TimedEvent>,
}

#[derive(Debug, Deserialize)]
pub struct OccupancyRequest {
    pub occupied: bool,
}

fn status_of(state: &AppState) -> SystemStatus {
    let thermal = state.controller.thermal();
    let model = thermal.state();
    let last_cycle = state.controller.last_cycle();
    let predicted_indoor_c = last_cycle.as_ref().and_then(|cycle| {
        let outdoor_c = cycle.outdoor_c?;
        Some(model.predict_indoor_c(cycle.indoor_c, outdoor_c, cycle.decision.to_c, PREDICTION_HOURS))
    });
    SystemStatus {
        occupied: state.controller.occupied(),
        last_cycle,
        engine: state.controller.engine_config(),
        thermal: ThermalInfo {
            state: model,
            time_constant_hours: model.time_constant_hours(),
            predicted_indoor_c,
            pending_samples: thermal.pending_samples(),
        },
        system: SystemInfo {
            uptime_seconds: state.started_at.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION"),
            mode: if cfg!(feature = "sim") { "simulated" } else { "production" },
        },
    }
}

/// GET /api/v1/status - last decision, engine tuning and thermal model
pub async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<SystemStatus>> {
    Json(ApiResponse::success(status_of(&state)))
}

/// GET /api/v1/breakers - breaker statistics and recent transitions
pub async fn get_breakers(State(state): State<AppState>) -> Json<ApiResponse<BreakerOverview>> {
    Json(ApiResponse::success(BreakerOverview {
        breakers: state.breakers.stats(),
        recent_events: state.events.recent(RECENT_EVENTS_LIMIT),
    }))
}

/// PUT /api/v1/occupancy
pub async fn put_occupancy(
    State(state): State<AppState>,
    Json(req): Json<OccupancyRequest>,
) -> Json<ApiResponse<SystemStatus>> {
    state.controller.set_occupied(req.occupied);
    tracing::info!(occupied = req.occupied, "occupancy updated");
    Json(ApiResponse::success(status_of(&state)))
}

/// POST /api/v1/calibrate - recalibrate the thermal model now
pub async fn post_calibrate(State(state): State<AppState>) -> Result<Json<ApiResponse<CalibrationReport>>, ApiError> {
    let now = chrono::Local::now().fixed_offset();
    let report = state
        .controller
        .calibrate_and_tune(now, &state.cancel)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}
