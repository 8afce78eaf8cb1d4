use axum::{
    routing::{get, post, put},
    Router,
};

use crate::api::status;
use crate::controller::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status::get_status))
        .route("/breakers", get(status::get_breakers))
        .route("/occupancy", put(status::put_occupancy))
        .route("/calibrate", post(status::post_calibrate))
}
