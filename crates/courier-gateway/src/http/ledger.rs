use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{clamp_limit, internal, ApiError};
use crate::app::AppState;

const DEFAULT_LIMIT: u32 = 100;

#[derive(Deserialize)]
pub struct LedgerQuery {
    pub limit: Option<u32>,
}

/// GET /api/ledger?limit=N: newest entries first.
pub async fn ledger_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT);
    let entries = state
        .coordinator
        .ledger()
        .recent(limit)
        .map_err(|e| internal(e.code(), e))?;
    Ok(Json(json!({ "limit": limit, "entries": entries })))
}
