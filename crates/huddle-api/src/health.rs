use axum::{Json, extract::State};
use chrono::Utc;

use huddle_types::api::HealthResponse;

use crate::ApiState;

/// GET /health: liveness check.
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        ts: Utc::now().timestamp_millis(),
    })
}
