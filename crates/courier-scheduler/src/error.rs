use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop a run, or prevent one from being set up.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The ledger could not be read or appended to.
    #[error("Ledger error: {0}")]
    Ledger(#[from] courier_ledger::LedgerError),

    #[error("Source folder {path} unavailable: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The mail transport rejected our credentials; every further send
    /// would fail the same way.
    #[error("Mail transport authorization failed: {0}")]
    TransportFatal(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Configuration error: {0}")]
    Config(#[from] courier_core::CoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failure to move a document into the target folder.
#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("cannot create target folder {path}: {source}")]
    TargetFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document has no file name: {0}")]
    NoFileName(PathBuf),

    /// Injected by test doubles.
    #[error("relocation failed: {0}")]
    Other(String),
}
