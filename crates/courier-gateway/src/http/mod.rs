pub mod health;
pub mod ledger;
pub mod runs;
pub mod status;
pub mod transport;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

/// Upper bound for `?limit=` on list endpoints.
pub const MAX_LIMIT: u32 = 1000;

pub type ApiError = (StatusCode, Json<Value>);

/// 500 with a stable code the caller can match on.
pub fn internal(code: &str, error: impl std::fmt::Display) -> ApiError {
    tracing::error!(code, error = %error, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": error.to_string(), "code": code })),
    )
}

pub fn clamp_limit(limit: Option<u32>, default: u32) -> u32 {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}
