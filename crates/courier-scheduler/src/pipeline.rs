//! The per-document state machine.

use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use courier_core::config::{render_template, TemplateVars};
use courier_core::types::{NewLedgerEntry, Outcome, RunId};
use courier_extract::{ExtractedInvoiceMetadata, InvoiceFields};
use courier_mail::{Attachment, DeliveryError, OutgoingMail};

use crate::coordinator::{RunCoordinator, RunReport};
use crate::discovery::Candidate;
use crate::eligibility::{evaluate, Eligibility};
use crate::error::{Result, SchedulerError};

fn entry(
    recorded_at: DateTime<Utc>,
    run_id: &RunId,
    candidate: &Candidate,
    content_hash: &str,
    outcome: Outcome,
    fields: Option<&InvoiceFields>,
    detail: Option<String>,
) -> NewLedgerEntry {
    NewLedgerEntry {
        run_id: run_id.clone(),
        document: candidate.name.clone(),
        content_hash: content_hash.to_string(),
        outcome,
        invoice_date: fields.map(|f| f.invoice_date.format("%Y-%m-%d").to_string()),
        recipient: fields.map(|f| f.recipient.clone()),
        invoice_number: fields.and_then(|f| f.invoice_number.clone()),
        detail,
        recorded_at,
    }
}

impl RunCoordinator {
    /// Take one candidate as far as it can go in this run.
    ///
    /// Per-document failures are recorded and swallowed; `Err` is returned
    /// only for conditions that must stop the whole run (ledger unusable,
    /// transport authorization lost).
    pub(crate) async fn process_document(
        &self,
        run_id: &RunId,
        candidate: &Candidate,
        today: NaiveDate,
        force: bool,
        report: &mut RunReport,
    ) -> Result<()> {
        // Idempotency guard: a terminal entry means the only work left is
        // the move.
        if let Some(previous) = self.ledger.terminal_entry(&candidate.name)? {
            info!(
                outcome = %previous.outcome,
                entry_id = previous.id,
                "already recorded; retrying relocation only"
            );
            self.relocate(candidate, report);
            return Ok(());
        }

        if !candidate.is_settled(SystemTime::now(), self.settings.min_age) {
            debug!("recently modified; deferring");
            report.counts.deferred += 1;
            return Ok(());
        }

        let bytes = match std::fs::read(&candidate.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                let detail = format!("could not read document: {e}");
                return self.record_error(run_id, candidate, "", None, detail, report);
            }
        };
        let content_hash = hex::encode(Sha256::digest(&bytes));

        let fields = match self.extractors.extract(&bytes) {
            ExtractedInvoiceMetadata::Parsed(fields) => fields,
            ExtractedInvoiceMetadata::Failed { reason } => {
                return self.record_error(run_id, candidate, &content_hash, None, reason, report);
            }
        };

        let decision = if force {
            Eligibility::Due
        } else {
            evaluate(fields.invoice_date, today)
        };
        match decision {
            Eligibility::NotDueYet => {
                info!(invoice_date = %fields.invoice_date, %today, "not due yet; leaving in place");
                report.counts.deferred += 1;
                return Ok(());
            }
            Eligibility::Stale => {
                let detail = format!(
                    "invoice date {} is before {today}; not sent",
                    fields.invoice_date
                );
                self.ledger.append(entry(
                    self.clock.now(),
                    run_id,
                    candidate,
                    &content_hash,
                    Outcome::Skipped,
                    Some(&fields),
                    Some(detail),
                ))?;
                info!(invoice_date = %fields.invoice_date, "stale; skipped");
                report.counts.skipped += 1;
                self.relocate(candidate, report);
                return Ok(());
            }
            Eligibility::Due => {}
        }

        let mail = self.compose(candidate, &fields, bytes);
        match self.delivery.deliver(&mail).await {
            Ok(()) => {
                let appended = self.ledger.append(entry(
                    self.clock.now(),
                    run_id,
                    candidate,
                    &content_hash,
                    Outcome::Sent,
                    Some(&fields),
                    None,
                ));
                if let Err(e) = appended {
                    error!(
                        error = %e,
                        recipient = %fields.recipient,
                        "message sent but ledger append failed; a later run may send it again"
                    );
                    return Err(e.into());
                }
                info!(recipient = %fields.recipient, "sent");
                report.counts.sent += 1;
                self.relocate(candidate, report);
                Ok(())
            }
            Err(DeliveryError::Message(e)) => {
                self.record_error(run_id, candidate, &content_hash, Some(&fields), e.to_string(), report)
            }
            Err(DeliveryError::Fatal(e)) => {
                self.record_error(run_id, candidate, &content_hash, Some(&fields), e.to_string(), report)?;
                Err(SchedulerError::TransportFatal(e.to_string()))
            }
        }
    }

    fn record_error(
        &self,
        run_id: &RunId,
        candidate: &Candidate,
        content_hash: &str,
        fields: Option<&InvoiceFields>,
        detail: String,
        report: &mut RunReport,
    ) -> Result<()> {
        warn!(error = %detail, "document not delivered; left in place");
        report.errors.push(format!("{}: {detail}", candidate.name));
        report.counts.errored += 1;
        self.ledger.append(entry(
            self.clock.now(),
            run_id,
            candidate,
            content_hash,
            Outcome::Error,
            fields,
            Some(detail),
        ))?;
        Ok(())
    }

    /// A failed move is logged and counted; the ledger entry already makes
    /// the next run retry the move instead of the send.
    fn relocate(&self, candidate: &Candidate, report: &mut RunReport) {
        if let Err(e) = self.relocator.relocate(&candidate.path, &self.settings.target) {
            error!(error = %e, relocation_pending = true, "relocation failed");
            report.counts.relocation_failures += 1;
            report
                .errors
                .push(format!("{}: relocation failed: {e}", candidate.name));
        }
    }

    fn compose(&self, candidate: &Candidate, fields: &InvoiceFields, bytes: Vec<u8>) -> OutgoingMail {
        let invoice_date = fields.invoice_date.format("%d.%m.%Y").to_string();
        let vars = TemplateVars {
            filename: &candidate.name,
            stem: candidate.stem(),
            invoice_number: fields.invoice_number.as_deref(),
            invoice_date: Some(&invoice_date),
            recipient: Some(&fields.recipient),
            buyer_name: fields.buyer_name.as_deref(),
        };
        OutgoingMail {
            to: fields.recipient.clone(),
            subject: render_template(&self.settings.subject_template, &vars),
            body: render_template(&self.settings.body_template, &vars),
            attachment: Attachment {
                name: candidate.name.clone(),
                content_type: fields.family.mime_type().to_string(),
                bytes,
            },
        }
    }
}
