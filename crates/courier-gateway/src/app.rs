use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use courier_core::config::CourierConfig;
use courier_scheduler::{RunCoordinator, Scheduler};

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CourierConfig,
    pub coordinator: Arc<RunCoordinator>,
    /// `None` when serving without a timer (tests) and after shutdown.
    pub scheduler: Mutex<Option<Scheduler>>,
}

impl AppState {
    pub fn new(config: CourierConfig, coordinator: Arc<RunCoordinator>) -> Self {
        Self {
            config,
            coordinator,
            scheduler: Mutex::new(None),
        }
    }

    pub fn with_scheduler(self, scheduler: Scheduler) -> Self {
        *self.scheduler.lock().unwrap_or_else(|e| e.into_inner()) = Some(scheduler);
        self
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|s| s.next_run())
    }

    pub fn schedule_label(&self) -> Option<String> {
        self.scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.schedule().to_string())
    }

    /// How long `POST /api/run` waits before answering 202.
    pub fn run_wait(&self) -> Duration {
        Duration::from_secs(self.config.gateway.run_wait_secs)
    }

    /// Stop the timer, waiting for a scheduled run in progress.
    pub async fn shutdown(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.disarm().await;
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/api/status", get(crate::http::status::status_handler))
        .route("/api/next-run", get(crate::http::status::next_run_handler))
        .route("/api/run", post(crate::http::runs::run_now_handler))
        .route("/api/runs", get(crate::http::runs::runs_handler))
        .route("/api/ledger", get(crate::http::ledger::ledger_handler))
        .route("/api/transport", get(crate::http::transport::transport_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
