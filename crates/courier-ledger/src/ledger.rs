use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use courier_core::types::{
    LedgerEntry, NewLedgerEntry, Outcome, RunCounts, RunId, RunRecord, RunStatus, Trigger,
};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::db::init_db;
use crate::error::{LedgerError, Result};

const ENTRY_COLUMNS: &str = "id, run_id, document, content_hash, outcome, invoice_date,
     recipient, invoice_number, detail, recorded_at";

const RUN_COLUMNS: &str =
    "id, trigger, status, started_at, finished_at, counts, detail, errors";

/// Append-only outcome ledger.
///
/// The only component allowed to write ledger entries. Thread-safe: the
/// connection sits behind a `Mutex`, so appends from one run and reads from
/// the HTTP surface never interleave mid-statement.
pub struct Ledger {
    db: Mutex<Connection>,
}

impl Ledger {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) the ledger database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "ledger opened");
        Self::new(conn)
    }

    /// Volatile ledger, used by tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| LedgerError::Poisoned)
    }

    /// Durably append one entry and return it as stored.
    pub fn append(&self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO ledger_entries
             (run_id, document, content_hash, outcome, invoice_date,
              recipient, invoice_number, detail, recorded_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            rusqlite::params![
                entry.run_id.as_str(),
                entry.document,
                entry.content_hash,
                entry.outcome.to_string(),
                entry.invoice_date,
                entry.recipient,
                entry.invoice_number,
                entry.detail,
                entry.recorded_at.to_rfc3339(),
            ],
        )?;
        let id = db.last_insert_rowid();
        debug!(id, document = %entry.document, outcome = %entry.outcome, "ledger entry appended");

        Ok(LedgerEntry {
            id,
            run_id: entry.run_id.0,
            document: entry.document,
            content_hash: entry.content_hash,
            outcome: entry.outcome,
            invoice_date: entry.invoice_date,
            recipient: entry.recipient,
            invoice_number: entry.invoice_number,
            detail: entry.detail,
            recorded_at: entry.recorded_at,
        })
    }

    /// Latest `sent` or `skipped` entry for `document`, if any.
    ///
    /// A `sent` entry always wins over a later `skipped` one.
    pub fn terminal_entry(&self, document: &str) -> Result<Option<LedgerEntry>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE document = ?1 AND outcome IN ('sent', 'skipped')
             ORDER BY (outcome = 'sent') DESC, id DESC LIMIT 1"
        );
        let raw = db.query_row(&sql, [document], read_entry_row).optional()?;
        raw.map(entry_from_raw).transpose()
    }

    /// All entries for `document`, oldest first.
    pub fn history(&self, document: &str) -> Result<Vec<LedgerEntry>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE document = ?1 ORDER BY id"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map([document], read_entry_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(entry_from_raw).collect()
    }

    /// Most recent entries, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<LedgerEntry>> {
        let db = self.conn()?;
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries ORDER BY id DESC LIMIT ?1");
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map([limit], read_entry_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(entry_from_raw).collect()
    }

    /// Persist a finished run's summary.
    pub fn record_run(&self, run: &RunRecord) -> Result<()> {
        let db = self.conn()?;
        let counts = serde_json::to_string(&run.counts)?;
        let errors = serde_json::to_string(&run.errors)?;
        db.execute(
            "INSERT INTO runs
             (id, trigger, status, started_at, finished_at, counts, detail, errors)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            rusqlite::params![
                run.id.as_str(),
                run.trigger.to_string(),
                run.status.to_string(),
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
                counts,
                run.detail,
                errors,
            ],
        )?;
        info!(run_id = %run.id, status = %run.status, "run recorded");
        Ok(())
    }

    /// Most recent runs, newest first.
    pub fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let db = self.conn()?;
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs ORDER BY seq DESC LIMIT ?1");
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map([limit], read_run_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(run_from_raw).collect()
    }

    pub fn latest_run(&self) -> Result<Option<RunRecord>> {
        Ok(self.recent_runs(1)?.into_iter().next())
    }
}

// --- row decoding ------------------------------------------------------------

struct RawEntry {
    id: i64,
    run_id: String,
    document: String,
    content_hash: String,
    outcome: String,
    invoice_date: Option<String>,
    recipient: Option<String>,
    invoice_number: Option<String>,
    detail: Option<String>,
    recorded_at: String,
}

fn read_entry_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        run_id: row.get(1)?,
        document: row.get(2)?,
        content_hash: row.get(3)?,
        outcome: row.get(4)?,
        invoice_date: row.get(5)?,
        recipient: row.get(6)?,
        invoice_number: row.get(7)?,
        detail: row.get(8)?,
        recorded_at: row.get(9)?,
    })
}

fn entry_from_raw(raw: RawEntry) -> Result<LedgerEntry> {
    let corrupt = |reason: String| LedgerError::CorruptRow {
        table: "ledger_entries",
        reason,
    };
    let outcome: Outcome = raw.outcome.parse().map_err(corrupt)?;
    let recorded_at = parse_timestamp(&raw.recorded_at).map_err(corrupt)?;
    Ok(LedgerEntry {
        id: raw.id,
        run_id: raw.run_id,
        document: raw.document,
        content_hash: raw.content_hash,
        outcome,
        invoice_date: raw.invoice_date,
        recipient: raw.recipient,
        invoice_number: raw.invoice_number,
        detail: raw.detail,
        recorded_at,
    })
}

struct RawRun {
    id: String,
    trigger: String,
    status: String,
    started_at: String,
    finished_at: String,
    counts: String,
    detail: Option<String>,
    errors: String,
}

fn read_run_row(row: &Row<'_>) -> rusqlite::Result<RawRun> {
    Ok(RawRun {
        id: row.get(0)?,
        trigger: row.get(1)?,
        status: row.get(2)?,
        started_at: row.get(3)?,
        finished_at: row.get(4)?,
        counts: row.get(5)?,
        detail: row.get(6)?,
        errors: row.get(7)?,
    })
}

fn run_from_raw(raw: RawRun) -> Result<RunRecord> {
    let corrupt = |reason: String| LedgerError::CorruptRow {
        table: "runs",
        reason,
    };
    let trigger: Trigger = raw.trigger.parse().map_err(corrupt)?;
    let status: RunStatus = raw.status.parse().map_err(corrupt)?;
    let counts: RunCounts = serde_json::from_str(&raw.counts)?;
    let errors: Vec<String> = serde_json::from_str(&raw.errors)?;
    Ok(RunRecord {
        id: RunId(raw.id),
        trigger,
        status,
        started_at: parse_timestamp(&raw.started_at).map_err(corrupt)?,
        finished_at: parse_timestamp(&raw.finished_at).map_err(corrupt)?,
        counts,
        detail: raw.detail,
        errors,
    })
}

fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{s}': {e}"))
}
