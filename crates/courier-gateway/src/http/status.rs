//! Scheduler state: what is running, what ran last, what runs next.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /api/status
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let coordinator = &state.coordinator;
    Json(json!({
        "running": coordinator.is_running(),
        "current_run": coordinator.current_run(),
        "next_run": state.next_run(),
        "last_run": coordinator.last_run(),
    }))
}

/// GET /api/next-run: `null` when no timer is armed.
pub async fn next_run_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "next_run": state.next_run(),
        "schedule": state.schedule_label(),
    }))
}
