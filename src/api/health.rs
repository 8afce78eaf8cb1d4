use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::controller::AppState;
use crate::resilience::DependencyHealth;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    overall: DependencyHealth,
    dependencies: BTreeMap<String, DependencyHealth>,
}

/// GET /health
///
/// 200 while every circuit breaker is closed, 503 otherwise.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let all_closed = state.breakers.all_closed();
    let response = HealthResponse {
        status: if all_closed { "healthy" } else { "degraded" },
        timestamp: Utc::now(),
        overall: state.breakers.overall_health(),
        dependencies: state.breakers.health(),
    };
    let status_code = if all_closed {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}
