//! Manual trigger and run history.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use courier_core::types::Trigger;

use super::{clamp_limit, internal, ApiError};
use crate::app::AppState;

const DEFAULT_LIMIT: u32 = 20;

/// POST /api/run
///
/// 409 if a run is already in flight. Otherwise the run starts in its own
/// task: 200 with the finished RunRecord if it completes within
/// `gateway.run_wait_secs`, else 202 and the run keeps going.
pub async fn run_now_handler(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let ticket = state
        .coordinator
        .try_start(Trigger::Manual)
        .map_err(|rejected| {
            (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": rejected.to_string(),
                    "current_run": rejected.current,
                })),
            )
        })?;

    let run_id = ticket.run_id().clone();
    info!(run_id = %run_id, "manual run requested");
    let mut handle = tokio::spawn(ticket.execute());

    match tokio::time::timeout(state.run_wait(), &mut handle).await {
        Ok(Ok(record)) => Ok((StatusCode::OK, Json(json!(record)))),
        Ok(Err(e)) => Err(internal("RUN_PANICKED", e)),
        Err(_) => {
            warn!(run_id = %run_id, "run still in progress; answering 202");
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({ "accepted": true, "run_id": run_id })),
            ))
        }
    }
}

#[derive(Deserialize)]
pub struct RunsQuery {
    pub limit: Option<u32>,
}

/// GET /api/runs?limit=N: newest first.
pub async fn runs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT);
    let runs = state
        .coordinator
        .ledger()
        .recent_runs(limit)
        .map_err(|e| internal(e.code(), e))?;
    Ok(Json(json!({ "limit": limit, "runs": runs })))
}
