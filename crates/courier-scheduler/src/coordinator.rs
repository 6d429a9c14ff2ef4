use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono_tz::Tz;
use tracing::{error, info, info_span, warn, Instrument};

use courier_core::config::{CourierConfig, MessageConfig, DEFAULT_PREFIX, DEFAULT_TIMEZONE};
use courier_core::types::{RunCounts, RunId, RunRecord, RunStatus, Trigger};
use courier_extract::ExtractorRegistry;
use courier_ledger::Ledger;
use courier_mail::DeliveryClient;

use crate::clock::{Clock, SystemClock};
use crate::discovery::discover;
use crate::eligibility::today_in;
use crate::error::{Result, SchedulerError};
use crate::relocator::{FsRelocator, Relocator};

/// Immutable per-process snapshot of everything a run needs to know.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub source: PathBuf,
    pub target: PathBuf,
    pub prefix: String,
    pub extensions: Vec<String>,
    /// Files modified more recently than this are deferred.
    pub min_age: Duration,
    pub time_zone: Tz,
    pub subject_template: String,
    pub body_template: String,
    /// Manual runs treat every parseable document as due.
    pub force_send_on_manual: bool,
}

impl PipelineSettings {
    /// Defaults for everything but the two folders.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        let message = MessageConfig::default();
        Self {
            source: source.into(),
            target: target.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            extensions: vec!["pdf".to_string()],
            min_age: Duration::ZERO,
            time_zone: DEFAULT_TIMEZONE.parse().unwrap_or(chrono_tz::Europe::Berlin),
            subject_template: message.subject_template,
            body_template: message.body_template,
            force_send_on_manual: false,
        }
    }

    pub fn from_config(config: &CourierConfig) -> Result<Self> {
        Ok(Self {
            source: PathBuf::from(&config.folders.source),
            target: PathBuf::from(&config.folders.target),
            prefix: config.folders.prefix.clone(),
            extensions: config.folders.extensions.clone(),
            min_age: Duration::from_secs(config.folders.min_age_secs),
            time_zone: config.schedule.time_zone()?,
            subject_template: config.message.subject_template.clone(),
            body_template: config.message.body_template.clone(),
            force_send_on_manual: config.delivery.force_send_on_manual,
        })
    }
}

/// A trigger arrived while another run was in flight.
#[derive(Debug, Clone, thiserror::Error)]
#[error("already running")]
pub struct RunRejected {
    /// The run that is in progress, if it had started by the time we looked.
    pub current: Option<RunId>,
}

/// Mutable tallies for the run being executed.
#[derive(Debug, Default)]
pub(crate) struct RunReport {
    pub counts: RunCounts,
    pub errors: Vec<String>,
}

/// Orchestrates one pass over the source folder. Runs are single-flight:
/// see [`RunCoordinator::try_start`].
pub struct RunCoordinator {
    pub(crate) settings: PipelineSettings,
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) extractors: ExtractorRegistry,
    pub(crate) delivery: Arc<DeliveryClient>,
    pub(crate) relocator: Arc<dyn Relocator>,
    pub(crate) clock: Arc<dyn Clock>,
    running: AtomicBool,
    current: Mutex<Option<RunId>>,
    last_run: Mutex<Option<RunRecord>>,
}

impl RunCoordinator {
    pub fn new(settings: PipelineSettings, ledger: Arc<Ledger>, delivery: Arc<DeliveryClient>) -> Self {
        Self {
            settings,
            ledger,
            extractors: ExtractorRegistry::with_defaults(),
            delivery,
            relocator: Arc::new(FsRelocator),
            clock: Arc::new(SystemClock),
            running: AtomicBool::new(false),
            current: Mutex::new(None),
            last_run: Mutex::new(None),
        }
    }

    pub fn with_relocator(mut self, relocator: Arc<dyn Relocator>) -> Self {
        self.relocator = relocator;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn delivery(&self) -> &Arc<DeliveryClient> {
        &self.delivery
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn current_run(&self) -> Option<RunId> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Most recent finished run: from memory, else from the ledger.
    pub fn last_run(&self) -> Option<RunRecord> {
        if let Some(run) = self.last_run.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Some(run);
        }
        match self.ledger.latest_run() {
            Ok(run) => run,
            Err(e) => {
                warn!(error = %e, "could not read latest run from ledger");
                None
            }
        }
    }

    /// Claim the run slot without blocking. The slot is held by the returned
    /// ticket and released when it is dropped.
    pub fn try_start(self: &Arc<Self>, trigger: Trigger) -> std::result::Result<RunTicket, RunRejected> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let current = self.current_run();
            info!(%trigger, current = ?current.as_ref().map(|id| id.as_str()), "run rejected: already running");
            return Err(RunRejected { current });
        }
        let run_id = RunId::new();
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(run_id.clone());
        Ok(RunTicket {
            coordinator: Arc::clone(self),
            trigger,
            run_id,
        })
    }

    /// `try_start` and execute to completion.
    pub async fn run(self: &Arc<Self>, trigger: Trigger) -> std::result::Result<RunRecord, RunRejected> {
        Ok(self.try_start(trigger)?.execute().await)
    }

    async fn execute(&self, run_id: &RunId, trigger: Trigger) -> RunRecord {
        let started_at = self.clock.now();
        let today = today_in(self.settings.time_zone, started_at);
        let force = trigger == Trigger::Manual && self.settings.force_send_on_manual;
        info!(%today, force, source = %self.settings.source.display(), "run started");

        let mut report = RunReport::default();
        let (status, detail) = match self.process_all(run_id, today, force, &mut report).await {
            Ok(()) => (RunStatus::Completed, None),
            Err(e) => {
                error!(error = %e, "run aborted");
                (RunStatus::Aborted, Some(e.to_string()))
            }
        };

        let record = RunRecord {
            id: run_id.clone(),
            trigger,
            status,
            started_at,
            finished_at: self.clock.now(),
            counts: report.counts,
            detail,
            errors: report.errors,
        };
        if let Err(e) = self.ledger.record_run(&record) {
            error!(error = %e, "failed to persist run record");
        }
        info!(
            status = %record.status,
            processed = record.counts.processed,
            sent = record.counts.sent,
            skipped = record.counts.skipped,
            errored = record.counts.errored,
            deferred = record.counts.deferred,
            relocation_failures = record.counts.relocation_failures,
            "run finished"
        );
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        record
    }

    async fn process_all(
        &self,
        run_id: &RunId,
        today: chrono::NaiveDate,
        force: bool,
        report: &mut RunReport,
    ) -> Result<()> {
        let source = &self.settings.source;
        let candidates = discover(source, &self.settings.prefix, &self.settings.extensions)
            .map_err(|e| SchedulerError::SourceUnavailable {
                path: source.clone(),
                source: e,
            })?;
        info!(count = candidates.len(), "candidates discovered");

        for candidate in &candidates {
            report.counts.processed += 1;
            self.process_document(run_id, candidate, today, force, report)
                .instrument(info_span!("document", name = %candidate.name))
                .await?;
        }
        Ok(())
    }

    fn release(&self) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Exclusive right to execute one run. Dropping it, even while unwinding,
/// frees the slot for the next trigger.
pub struct RunTicket {
    coordinator: Arc<RunCoordinator>,
    trigger: Trigger,
    run_id: RunId,
}

impl RunTicket {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub async fn execute(self) -> RunRecord {
        let span = info_span!("run", run_id = %self.run_id, trigger = %self.trigger);
        self.coordinator
            .execute(&self.run_id, self.trigger)
            .instrument(span)
            .await
    }
}

impl std::fmt::Debug for RunTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTicket")
            .field("run_id", &self.run_id)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        self.coordinator.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_mail::mock::ScriptedTransport;

    fn coordinator(dir: &std::path::Path) -> Arc<RunCoordinator> {
        let ledger = Arc::new(Ledger::in_memory().unwrap());
        let delivery = Arc::new(DeliveryClient::new(
            Arc::new(ScriptedTransport::new()),
            Duration::from_secs(5),
        ));
        let settings = PipelineSettings::new(dir.join("in"), dir.join("out"));
        Arc::new(RunCoordinator::new(settings, ledger, delivery))
    }

    #[test]
    fn second_ticket_is_rejected_until_first_drops() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(dir.path());

        let ticket = c.try_start(Trigger::Scheduled).unwrap();
        assert!(c.is_running());
        let rejected = c.try_start(Trigger::Manual).unwrap_err();
        assert_eq!(rejected.current.as_ref(), Some(ticket.run_id()));
        assert_eq!(rejected.to_string(), "already running");

        drop(ticket);
        assert!(!c.is_running());
        assert!(c.current_run().is_none());
        assert!(c.try_start(Trigger::Manual).is_ok());
    }

    #[tokio::test]
    async fn missing_source_folder_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(dir.path());

        let record = c.run(Trigger::Manual).await.unwrap();
        assert_eq!(record.status, RunStatus::Aborted);
        assert!(record.detail.as_deref().unwrap().contains("unavailable"));
        assert!(!c.is_running());
        assert_eq!(c.ledger().latest_run().unwrap().unwrap().id, record.id);
    }

    #[tokio::test]
    async fn empty_folder_completes_with_zero_counts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("in")).unwrap();
        let c = coordinator(dir.path());

        let record = c.run(Trigger::Scheduled).await.unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.counts, RunCounts::default());
        assert_eq!(c.last_run().unwrap().id, record.id);
    }

    #[test]
    fn settings_from_default_config() {
        let settings = PipelineSettings::from_config(&CourierConfig::default()).unwrap();
        assert_eq!(settings.prefix, "RE-");
        assert_eq!(settings.time_zone, chrono_tz::Europe::Berlin);
        assert!(!settings.force_send_on_manual);
    }
}
