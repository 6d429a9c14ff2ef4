//! Transport health tracking: passive, based on real delivery outcomes.
//!
//! Nothing is sent just to test the transport; status is derived from a
//! rolling window of recent attempts plus the last authorization result.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::TransportError;

/// Rolling window duration for outcome tracking.
const WINDOW_SECS: u64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    Ok,
    Degraded,
    AuthFailed,
    NotConfigured,
    Unknown,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Degraded => write!(f, "degraded"),
            Self::AuthFailed => write!(f, "auth_failed"),
            Self::NotConfigured => write!(f, "not_configured"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Public snapshot of the transport's health.
#[derive(Debug, Clone, Serialize)]
pub struct TransportHealthEntry {
    pub name: String,
    pub status: TransportStatus,
    pub configured: bool,
    pub last_success_at: Option<i64>,
    pub last_error_at: Option<i64>,
    pub last_error: Option<String>,
    pub avg_latency_ms: u64,
    pub sent_ok: u32,
    pub sent_err: u32,
    pub total_attempts: u64,
}

struct State {
    /// (timestamp, was_success, latency_ms)
    window: VecDeque<(Instant, bool, u64)>,
    last_success_at: Option<i64>,
    last_error_at: Option<i64>,
    last_error: Option<String>,
    total_attempts: u64,
    auth_override: Option<TransportStatus>,
}

impl State {
    fn prune(&mut self) {
        let Some(cutoff) = Instant::now().checked_sub(Duration::from_secs(WINDOW_SECS)) else {
            return;
        };
        while self.window.front().is_some_and(|(t, _, _)| *t < cutoff) {
            self.window.pop_front();
        }
    }

    fn derive_status(&self) -> TransportStatus {
        if let Some(status) = self.auth_override {
            return status;
        }
        if self.window.is_empty() {
            return TransportStatus::Unknown;
        }
        let ok = self.window.iter().filter(|(_, ok, _)| *ok).count();
        if ok * 5 > self.window.len() * 4 {
            TransportStatus::Ok
        } else {
            TransportStatus::Degraded
        }
    }
}

/// Health of the single configured transport.
pub struct TransportHealth {
    name: String,
    configured: bool,
    state: Mutex<State>,
}

impl TransportHealth {
    pub fn new(name: impl Into<String>, configured: bool) -> Self {
        Self {
            name: name.into(),
            configured,
            state: Mutex::new(State {
                window: VecDeque::new(),
                last_success_at: None,
                last_error_at: None,
                last_error: None,
                total_attempts: 0,
                auth_override: (!configured).then_some(TransportStatus::NotConfigured),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A successful authentication clears a previous auth failure.
    pub fn record_auth_success(&self) {
        let mut state = self.state();
        if state.auth_override == Some(TransportStatus::AuthFailed) {
            state.auth_override = None;
        }
    }

    pub fn record_success(&self, latency_ms: u64) {
        let mut state = self.state();
        state.prune();
        state.window.push_back((Instant::now(), true, latency_ms));
        state.last_success_at = Some(chrono::Utc::now().timestamp());
        state.total_attempts += 1;
        state.auth_override = None;
    }

    pub fn record_error(&self, error: &TransportError) {
        let mut state = self.state();
        state.prune();
        state.window.push_back((Instant::now(), false, 0));
        state.last_error_at = Some(chrono::Utc::now().timestamp());
        state.last_error = Some(error.to_string());
        state.total_attempts += 1;
        match error {
            TransportError::Unauthorized(_) => {
                state.auth_override = Some(TransportStatus::AuthFailed);
            }
            TransportError::NotConfigured(_) => {
                state.auth_override = Some(TransportStatus::NotConfigured);
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> TransportHealthEntry {
        let mut state = self.state();
        state.prune();
        let sent_ok = state.window.iter().filter(|(_, ok, _)| *ok).count() as u32;
        let sent_err = state.window.len() as u32 - sent_ok;
        let avg_latency_ms = if sent_ok == 0 {
            0
        } else {
            let sum: u64 = state
                .window
                .iter()
                .filter(|(_, ok, _)| *ok)
                .map(|(_, _, lat)| lat)
                .sum();
            sum / sent_ok as u64
        };
        TransportHealthEntry {
            name: self.name.clone(),
            status: state.derive_status(),
            configured: self.configured,
            last_success_at: state.last_success_at,
            last_error_at: state.last_error_at,
            last_error: state.last_error.clone(),
            avg_latency_ms,
            sent_ok,
            sent_err,
            total_attempts: state.total_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unknown_or_not_configured() {
        assert_eq!(
            TransportHealth::new("t", true).snapshot().status,
            TransportStatus::Unknown
        );
        assert_eq!(
            TransportHealth::new("t", false).snapshot().status,
            TransportStatus::NotConfigured
        );
    }

    #[test]
    fn successes_are_ok() {
        let health = TransportHealth::new("t", true);
        for _ in 0..5 {
            health.record_success(120);
        }
        let snap = health.snapshot();
        assert_eq!(snap.status, TransportStatus::Ok);
        assert_eq!(snap.sent_ok, 5);
        assert_eq!(snap.avg_latency_ms, 120);
    }

    #[test]
    fn mixed_outcomes_degrade() {
        let health = TransportHealth::new("t", true);
        for _ in 0..6 {
            health.record_success(10);
        }
        for _ in 0..4 {
            health.record_error(&TransportError::Transient("503".into()));
        }
        assert_eq!(health.snapshot().status, TransportStatus::Degraded);
        assert_eq!(health.snapshot().sent_err, 4);
    }

    #[test]
    fn unauthorized_overrides_until_success() {
        let health = TransportHealth::new("t", true);
        health.record_success(10);
        health.record_error(&TransportError::Unauthorized("401".into()));
        assert_eq!(health.snapshot().status, TransportStatus::AuthFailed);
        health.record_auth_success();
        // One success, one failure left in the window.
        assert_eq!(health.snapshot().status, TransportStatus::Degraded);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TransportStatus::AuthFailed).unwrap();
        assert_eq!(json, "\"auth_failed\"");
    }
}
