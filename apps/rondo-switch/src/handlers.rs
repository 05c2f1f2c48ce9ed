use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use tracing::error;

use crate::recorder::MatchRecord;
use crate::websocket::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    waiting: usize,
    active_matches: usize,
    recorder_enabled: bool,
}

/// GET /health - liveness plus queue/match gauges.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let (waiting, active_matches) = state.engine.stats().await;
    Json(HealthStatus {
        status: "ok",
        waiting,
        active_matches,
        recorder_enabled: state.recorder.is_enabled(),
    })
}

/// GET /matches - durable match records for the admin reporting surface.
pub async fn list_matches(
    State(state): State<AppState>,
) -> Result<Json<Vec<MatchRecord>>, StatusCode> {
    match state.recorder.list_matches().await {
        Ok(records) => Ok(Json(records)),
        Err(err) => {
            error!(%err, "failed to list match records");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
