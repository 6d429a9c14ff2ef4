use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /api/transport: acquires a fresh token (nothing is sent), then
/// reports it next to the passive health derived from recent deliveries.
pub async fn transport_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let delivery = state.coordinator.delivery();
    let check = delivery.check_connectivity().await;
    let (error, kind) = match &check {
        Ok(()) => (None, None),
        Err(e) => (Some(e.to_string()), Some(e.kind())),
    };
    Json(json!({
        "transport": delivery.transport_name(),
        "reachable": check.is_ok(),
        "error": error,
        "error_kind": kind,
        "health": delivery.health(),
    }))
}
