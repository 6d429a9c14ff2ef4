use rusqlite::Connection;

use crate::error::Result;

/// Initialise the ledger schema in `conn`. Safe to call on every startup.
///
/// `synchronous = FULL` makes each autocommitted append durable before
/// `execute` returns; the pipeline relies on that before relocating a file.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
    create_ledger_table(conn)?;
    create_immutability_triggers(conn)?;
    create_runs_table(conn)?;
    Ok(())
}

fn create_ledger_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS ledger_entries (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id          TEXT    NOT NULL,
            document        TEXT    NOT NULL,
            content_hash    TEXT    NOT NULL,
            outcome         TEXT    NOT NULL,   -- sent | skipped | error
            invoice_date    TEXT,               -- YYYY-MM-DD or NULL
            recipient       TEXT,
            invoice_number  TEXT,
            detail          TEXT,
            recorded_at     TEXT    NOT NULL    -- RFC 3339
        ) STRICT;

        -- Idempotency guard: WHERE document = ? AND outcome IN (...)
        CREATE INDEX IF NOT EXISTS idx_ledger_document
            ON ledger_entries (document, outcome);
        ",
    )?;
    Ok(())
}

/// Entries are facts about the past; reject any attempt to rewrite them.
fn create_immutability_triggers(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TRIGGER IF NOT EXISTS ledger_entries_no_update
            BEFORE UPDATE ON ledger_entries
        BEGIN
            SELECT RAISE(ABORT, 'ledger entries are append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS ledger_entries_no_delete
            BEFORE DELETE ON ledger_entries
        BEGIN
            SELECT RAISE(ABORT, 'ledger entries are append-only');
        END;
        ",
    )?;
    Ok(())
}

fn create_runs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            seq          INTEGER PRIMARY KEY AUTOINCREMENT,
            id           TEXT    NOT NULL UNIQUE,
            trigger      TEXT    NOT NULL,   -- scheduled | manual
            status       TEXT    NOT NULL,   -- completed | aborted
            started_at   TEXT    NOT NULL,
            finished_at  TEXT    NOT NULL,
            counts       TEXT    NOT NULL,   -- JSON-encoded RunCounts
            detail       TEXT,
            errors       TEXT    NOT NULL    -- JSON array of strings
        ) STRICT;
        ",
    )?;
    Ok(())
}
