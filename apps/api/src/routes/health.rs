use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service version and whether the schedule runner is active.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "callout-api",
        "schedulerEnabled": state.config.scheduler_enabled,
        "schedulerRunning": state.scheduler.is_running().await
    }))
}
