//! End-to-end runs over a temporary source folder with a scripted transport.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use courier_core::types::{NewLedgerEntry, Outcome, RunId, RunStatus, Trigger};
use courier_extract::fixtures::{cii_invoice_xml, zugferd_pdf};
use courier_ledger::Ledger;
use courier_mail::mock::ScriptedTransport;
use courier_mail::{DeliveryClient, TransportError};
use courier_scheduler::{
    FixedClock, FsRelocator, PipelineSettings, RelocateError, Relocator, RunCoordinator,
};

/// Fails the first `failures` moves, then behaves like [`FsRelocator`].
struct FlakyRelocator {
    failures: AtomicU32,
}

impl FlakyRelocator {
    fn failing(n: u32) -> Self {
        Self {
            failures: AtomicU32::new(n),
        }
    }
}

impl Relocator for FlakyRelocator {
    fn relocate(&self, source: &Path, target_dir: &Path) -> Result<PathBuf, RelocateError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(RelocateError::Other("injected fault".into()));
        }
        FsRelocator.relocate(source, target_dir)
    }
}

struct Harness {
    _dir: TempDir,
    db_path: PathBuf,
    source: PathBuf,
    target: PathBuf,
    ledger: Arc<Ledger>,
    transport: Arc<ScriptedTransport>,
    coordinator: Arc<RunCoordinator>,
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 15, 10, 0, 0).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 15).unwrap()
}

struct Options {
    relocator: Option<Arc<dyn Relocator>>,
    force_send_on_manual: bool,
    min_age: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            relocator: None,
            force_send_on_manual: false,
            min_age: Duration::ZERO,
        }
    }
}

fn harness() -> Harness {
    harness_with(Options::default())
}

fn harness_with(options: Options) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("Dokumente");
    let target = source.join("RE - Rechnung");
    std::fs::create_dir_all(&source).unwrap();

    let db_path = dir.path().join("courier.db");
    let ledger = Arc::new(Ledger::open(&db_path).unwrap());
    let transport = Arc::new(ScriptedTransport::new());
    let delivery = Arc::new(DeliveryClient::new(transport.clone(), Duration::from_secs(5)));
    // 11:00 in Berlin on the 15th.
    let clock = Arc::new(FixedClock::new(now()));

    let mut settings = PipelineSettings::new(&source, &target);
    settings.force_send_on_manual = options.force_send_on_manual;
    settings.min_age = options.min_age;

    let mut coordinator = RunCoordinator::new(settings, ledger.clone(), delivery).with_clock(clock);
    if let Some(relocator) = options.relocator {
        coordinator = coordinator.with_relocator(relocator);
    }

    Harness {
        _dir: dir,
        db_path,
        source,
        target,
        ledger,
        transport,
        coordinator: Arc::new(coordinator),
    }
}

impl Harness {
    fn write_invoice(&self, name: &str, date: NaiveDate, email: &str) {
        let stem = name.trim_end_matches(".pdf");
        let xml = cii_invoice_xml(&date.format("%Y%m%d").to_string(), email, stem);
        std::fs::write(self.source.join(name), zugferd_pdf(&xml)).unwrap();
    }

    fn in_source(&self, name: &str) -> bool {
        self.source.join(name).exists()
    }

    fn in_target(&self, name: &str) -> bool {
        self.target.join(name).exists()
    }

    fn outcomes(&self, name: &str) -> Vec<Outcome> {
        self.ledger
            .history(name)
            .unwrap()
            .into_iter()
            .map(|e| e.outcome)
            .collect()
    }
}

#[tokio::test]
async fn sends_due_and_skips_stale() {
    let h = harness();
    h.write_invoice("RE-1001.pdf", today(), "a@example.com");
    h.write_invoice("RE-1002.pdf", today().pred_opt().unwrap(), "b@example.com");

    let record = h.coordinator.run(Trigger::Scheduled).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.counts.processed, 2);
    assert_eq!(record.counts.sent, 1);
    assert_eq!(record.counts.skipped, 1);

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@example.com");
    assert_eq!(sent[0].subject, "RE-1001");
    assert_eq!(sent[0].attachment.name, "RE-1001.pdf");
    assert_eq!(sent[0].attachment.content_type, "application/pdf");

    assert!(h.in_target("RE-1001.pdf") && h.in_target("RE-1002.pdf"));
    assert!(!h.in_source("RE-1001.pdf") && !h.in_source("RE-1002.pdf"));

    let entries = h.ledger.recent(10).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].document, "RE-1001.pdf");
    assert_eq!(entries[1].outcome, Outcome::Sent);
    assert_eq!(entries[0].document, "RE-1002.pdf");
    assert_eq!(entries[0].outcome, Outcome::Skipped);
    assert!(entries[1].id < entries[0].id);
    assert_eq!(entries[1].recipient.as_deref(), Some("a@example.com"));
    assert_eq!(entries[1].content_hash.len(), 64);
    assert!(entries.iter().all(|e| e.recorded_at == now()));
}

#[tokio::test]
async fn future_invoices_are_left_untouched() {
    let h = harness();
    h.write_invoice("RE-2000.pdf", today().succ_opt().unwrap(), "a@example.com");

    let record = h.coordinator.run(Trigger::Scheduled).await.unwrap();

    assert_eq!(record.counts.deferred, 1);
    assert_eq!(h.transport.attempts(), 0);
    assert!(h.in_source("RE-2000.pdf"));
    assert!(h.outcomes("RE-2000.pdf").is_empty());
}

#[tokio::test]
async fn documents_with_a_sent_entry_are_never_resent() {
    let h = harness();
    h.write_invoice("RE-7.pdf", today(), "a@example.com");
    h.ledger
        .append(NewLedgerEntry {
            run_id: RunId::from("earlier"),
            document: "RE-7.pdf".into(),
            content_hash: String::new(),
            outcome: Outcome::Sent,
            invoice_date: None,
            recipient: None,
            invoice_number: None,
            detail: None,
            recorded_at: now(),
        })
        .unwrap();

    h.coordinator.run(Trigger::Scheduled).await.unwrap();
    h.coordinator.run(Trigger::Manual).await.unwrap();

    assert_eq!(h.transport.attempts(), 0);
    assert!(h.in_target("RE-7.pdf"));
    assert_eq!(h.outcomes("RE-7.pdf"), [Outcome::Sent]);
}

#[tokio::test]
async fn repeated_runs_send_each_document_once() {
    let h = harness();
    for (name, email) in [
        ("RE-1.pdf", "one@example.com"),
        ("RE-2.pdf", "two@example.com"),
        ("RE-3.pdf", "three@example.com"),
    ] {
        h.write_invoice(name, today(), email);
    }

    for _ in 0..3 {
        h.coordinator.run(Trigger::Scheduled).await.unwrap();
    }

    let mut names: Vec<_> = h
        .transport
        .sent()
        .into_iter()
        .map(|m| m.attachment.name)
        .collect();
    names.sort();
    assert_eq!(names, ["RE-1.pdf", "RE-2.pdf", "RE-3.pdf"]);
    assert_eq!(h.ledger.recent_runs(10).unwrap().len(), 3);
}

#[tokio::test]
async fn failed_relocation_is_retried_without_resending() {
    let h = harness_with(Options {
        relocator: Some(Arc::new(FlakyRelocator::failing(1))),
        ..Options::default()
    });
    h.write_invoice("RE-1001.pdf", today(), "a@example.com");

    let first = h.coordinator.run(Trigger::Scheduled).await.unwrap();
    assert_eq!(first.counts.sent, 1);
    assert_eq!(first.counts.relocation_failures, 1);
    assert!(first.errors[0].contains("relocation failed"));
    assert!(h.in_source("RE-1001.pdf"));

    let second = h.coordinator.run(Trigger::Scheduled).await.unwrap();
    assert_eq!(second.counts.sent, 0);
    assert_eq!(second.counts.relocation_failures, 0);
    assert_eq!(h.transport.attempts(), 1);
    assert!(h.in_target("RE-1001.pdf"));
    assert!(!h.in_source("RE-1001.pdf"));
    assert_eq!(h.outcomes("RE-1001.pdf"), [Outcome::Sent]);
}

#[tokio::test]
async fn stale_document_move_is_retried_without_a_second_entry() {
    let h = harness_with(Options {
        relocator: Some(Arc::new(FlakyRelocator::failing(1))),
        ..Options::default()
    });
    h.write_invoice("RE-1002.pdf", today().pred_opt().unwrap(), "b@example.com");

    let first = h.coordinator.run(Trigger::Scheduled).await.unwrap();
    assert_eq!(first.counts.skipped, 1);
    assert_eq!(first.counts.relocation_failures, 1);
    assert!(h.in_source("RE-1002.pdf"));

    let second = h.coordinator.run(Trigger::Scheduled).await.unwrap();
    assert_eq!(second.counts.skipped, 0);
    assert_eq!(second.counts.relocation_failures, 0);
    assert!(h.in_target("RE-1002.pdf"));
    assert!(!h.in_source("RE-1002.pdf"));
    assert_eq!(h.outcomes("RE-1002.pdf"), [Outcome::Skipped]);
    assert_eq!(h.transport.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_send_is_recorded_and_the_run_continues() {
    let h = harness();
    h.write_invoice("RE-1.pdf", today(), "slow@example.com");
    h.write_invoice("RE-2.pdf", today(), "fast@example.com");
    h.transport
        .stall_recipient("slow@example.com", Duration::from_secs(60));

    let record = h.coordinator.run(Trigger::Scheduled).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.counts.errored, 1);
    assert_eq!(record.counts.sent, 1);
    let timed_out = &h.ledger.history("RE-1.pdf").unwrap()[0];
    assert_eq!(timed_out.outcome, Outcome::Error);
    assert_eq!(timed_out.detail.as_deref(), Some("send timed out after 5s"));
    assert!(h.in_source("RE-1.pdf"));
    assert_eq!(h.outcomes("RE-2.pdf"), [Outcome::Sent]);
    assert!(h.in_target("RE-2.pdf"));
}

#[tokio::test]
async fn ledger_failure_after_a_send_aborts_the_run() {
    let h = harness();
    h.write_invoice("RE-1.pdf", today(), "a@example.com");
    h.write_invoice("RE-2.pdf", today(), "b@example.com");
    // Make every `sent` append fail, as a full disk would.
    rusqlite::Connection::open(&h.db_path)
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_sent BEFORE INSERT ON ledger_entries
             WHEN NEW.outcome = 'sent'
             BEGIN SELECT RAISE(ABORT, 'database or disk is full'); END;",
        )
        .unwrap();

    let record = h.coordinator.run(Trigger::Scheduled).await.unwrap();

    assert_eq!(record.status, RunStatus::Aborted);
    assert!(record.detail.as_deref().unwrap().contains("Ledger error"));
    assert_eq!(h.transport.sent_count(), 1);
    assert_eq!(h.transport.attempts(), 1);
    assert!(h.outcomes("RE-1.pdf").is_empty());
    assert!(h.in_source("RE-1.pdf") && h.in_source("RE-2.pdf"));
    assert_eq!(h.ledger.latest_run().unwrap().unwrap().status, RunStatus::Aborted);
}

#[tokio::test]
async fn authorization_failure_stops_the_run() {
    let h = harness();
    for n in 1..=5 {
        h.write_invoice(&format!("RE-{n}.pdf"), today(), &format!("c{n}@example.com"));
    }
    h.transport.push_result(Ok(()));
    h.transport
        .push_result(Err(TransportError::Unauthorized("HTTP 401: token revoked".into())));

    let record = h.coordinator.run(Trigger::Scheduled).await.unwrap();

    assert_eq!(record.status, RunStatus::Aborted);
    assert!(record.detail.as_deref().unwrap().contains("authorization"));
    assert_eq!(record.counts.processed, 2);
    assert_eq!(record.counts.sent, 1);
    assert_eq!(record.counts.errored, 1);
    assert_eq!(h.transport.attempts(), 2);

    assert_eq!(h.outcomes("RE-1.pdf"), [Outcome::Sent]);
    assert_eq!(h.outcomes("RE-2.pdf"), [Outcome::Error]);
    for n in 3..=5 {
        let name = format!("RE-{n}.pdf");
        assert!(h.outcomes(&name).is_empty());
        assert!(h.in_source(&name));
    }
    assert!(h.in_source("RE-2.pdf"));

    // Credentials fixed: the next run picks up where this one stopped.
    let retry = h.coordinator.run(Trigger::Scheduled).await.unwrap();
    assert_eq!(retry.status, RunStatus::Completed);
    assert_eq!(retry.counts.sent, 4);
    assert_eq!(h.outcomes("RE-2.pdf"), [Outcome::Error, Outcome::Sent]);
}

#[tokio::test]
async fn unusable_credentials_fail_before_any_send() {
    let h = harness();
    h.write_invoice("RE-1.pdf", today(), "a@example.com");
    h.write_invoice("RE-2.pdf", today(), "b@example.com");
    h.transport
        .fail_auth(TransportError::Unauthorized("invalid_client".into()));

    let record = h.coordinator.run(Trigger::Scheduled).await.unwrap();

    assert_eq!(record.status, RunStatus::Aborted);
    assert_eq!(h.transport.attempts(), 0);
    assert_eq!(h.outcomes("RE-1.pdf"), [Outcome::Error]);
    assert!(h.outcomes("RE-2.pdf").is_empty());

    h.transport.restore_auth();
    let retry = h.coordinator.run(Trigger::Scheduled).await.unwrap();
    assert_eq!(retry.status, RunStatus::Completed);
    assert_eq!(retry.counts.sent, 2);
    assert_eq!(h.outcomes("RE-1.pdf"), [Outcome::Error, Outcome::Sent]);
    assert_eq!(h.outcomes("RE-2.pdf"), [Outcome::Sent]);
}

#[tokio::test]
async fn malformed_documents_do_not_halt_the_run() {
    let h = harness();
    let undated = r#"<rsm:CrossIndustryInvoice>
        <ram:BuyerTradeParty><ram:URIID>x@example.com</ram:URIID></ram:BuyerTradeParty>
    </rsm:CrossIndustryInvoice>"#;
    std::fs::write(h.source.join("RE-1.pdf"), zugferd_pdf(undated)).unwrap();
    std::fs::write(h.source.join("RE-2.pdf"), b"not a pdf at all").unwrap();
    h.write_invoice("RE-3.pdf", today(), "ok@example.com");

    let record = h.coordinator.run(Trigger::Scheduled).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.counts.errored, 2);
    assert_eq!(record.counts.sent, 1);

    let undated_entry = &h.ledger.history("RE-1.pdf").unwrap()[0];
    assert_eq!(undated_entry.outcome, Outcome::Error);
    assert_eq!(
        undated_entry.detail.as_deref(),
        Some("missing required field: invoice date")
    );
    let garbage_entry = &h.ledger.history("RE-2.pdf").unwrap()[0];
    assert_eq!(
        garbage_entry.detail.as_deref(),
        Some("unsupported document format")
    );

    assert!(h.in_source("RE-1.pdf") && h.in_source("RE-2.pdf"));
    assert!(h.in_target("RE-3.pdf"));
}

#[tokio::test]
async fn rejected_message_is_retried_on_a_later_run() {
    let h = harness();
    h.write_invoice("RE-1.pdf", today(), "bounce@example.com");
    h.write_invoice("RE-2.pdf", today(), "fine@example.com");
    h.transport.push_result(Err(TransportError::Rejected {
        status: 400,
        message: "ErrorInvalidRecipients".into(),
    }));

    let first = h.coordinator.run(Trigger::Scheduled).await.unwrap();
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(first.counts.errored, 1);
    assert_eq!(first.counts.sent, 1);
    assert!(h.in_source("RE-1.pdf"));

    h.coordinator.run(Trigger::Scheduled).await.unwrap();
    assert_eq!(h.outcomes("RE-1.pdf"), [Outcome::Error, Outcome::Sent]);
    assert!(h.in_target("RE-1.pdf"));
}

#[tokio::test]
async fn second_trigger_is_rejected_while_a_run_is_in_flight() {
    let h = harness();
    let ticket = h.coordinator.try_start(Trigger::Scheduled).unwrap();
    let run_id = ticket.run_id().clone();

    let rejected = h.coordinator.run(Trigger::Manual).await.unwrap_err();
    assert_eq!(rejected.current, Some(run_id.clone()));
    assert!(h.coordinator.is_running());

    let record = tokio::spawn(ticket.execute()).await.unwrap();
    assert_eq!(record.id, run_id);
    assert!(!h.coordinator.is_running());
    assert!(h.coordinator.run(Trigger::Manual).await.is_ok());
}

#[tokio::test]
async fn manual_force_send_ignores_dates() {
    let h = harness_with(Options {
        force_send_on_manual: true,
        ..Options::default()
    });
    h.write_invoice("RE-1.pdf", today().pred_opt().unwrap(), "late@example.com");
    h.write_invoice("RE-2.pdf", today().succ_opt().unwrap(), "early@example.com");

    let scheduled = h.coordinator.run(Trigger::Scheduled).await.unwrap();
    assert_eq!(scheduled.counts.skipped, 1);
    assert_eq!(scheduled.counts.deferred, 1);

    let manual = h.coordinator.run(Trigger::Manual).await.unwrap();
    assert_eq!(manual.counts.sent, 1);
    assert_eq!(h.transport.sent()[0].to, "early@example.com");
    assert!(h.in_target("RE-2.pdf"));
}

#[tokio::test]
async fn recently_modified_files_wait() {
    let h = harness_with(Options {
        min_age: Duration::from_secs(3600),
        ..Options::default()
    });
    h.write_invoice("RE-1.pdf", today(), "a@example.com");

    let record = h.coordinator.run(Trigger::Scheduled).await.unwrap();

    assert_eq!(record.counts.deferred, 1);
    assert_eq!(h.transport.attempts(), 0);
    assert!(h.outcomes("RE-1.pdf").is_empty());
}

#[tokio::test]
async fn unrelated_files_are_ignored() {
    let h = harness();
    std::fs::write(h.source.join("Angebot-1.pdf"), b"x").unwrap();
    std::fs::write(h.source.join("RE-1.txt"), b"x").unwrap();

    let record = h.coordinator.run(Trigger::Scheduled).await.unwrap();

    assert_eq!(record.counts.processed, 0);
    assert!(h.ledger.recent(10).unwrap().is_empty());
}
