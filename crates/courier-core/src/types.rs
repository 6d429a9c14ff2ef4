use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one execution of the run coordinator (UUIDv7, time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Scheduled => write!(f, "scheduled"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Trigger::Scheduled),
            "manual" => Ok(Trigger::Manual),
            other => Err(format!("unknown trigger: {other}")),
        }
    }
}

/// Terminal outcome of one document in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The email went out. Never attempted again.
    Sent,
    /// Invoice date already past; relocated without sending.
    Skipped,
    /// Extraction or delivery failed; the document stays for a later run.
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Sent => "sent",
            Outcome::Skipped => "skipped",
            Outcome::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Outcome::Sent),
            "skipped" => Ok(Outcome::Skipped),
            "error" => Ok(Outcome::Error),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

/// An entry about to be appended to the ledger.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub run_id: RunId,
    /// Document identity: the file name within the source folder.
    pub document: String,
    /// Hex SHA-256 of the bytes read during this run (empty if unreadable).
    pub content_hash: String,
    pub outcome: Outcome,
    pub invoice_date: Option<String>,
    pub recipient: Option<String>,
    pub invoice_number: Option<String>,
    pub detail: Option<String>,
    /// When the outcome happened, from the caller's clock.
    pub recorded_at: DateTime<Utc>,
}

/// An immutable, persisted ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the total order of all entries.
    pub id: i64,
    pub run_id: String,
    pub document: String,
    pub content_hash: String,
    pub outcome: Outcome,
    pub invoice_date: Option<String>,
    pub recipient: Option<String>,
    pub invoice_number: Option<String>,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every candidate was examined (individual documents may have failed).
    Completed,
    /// Stopped early: authorization failure, ledger failure or missing source folder.
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "completed" => Ok(RunStatus::Completed),
            "aborted" => Ok(RunStatus::Aborted),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Per-run tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Candidates examined.
    pub processed: u32,
    pub sent: u32,
    pub skipped: u32,
    pub errored: u32,
    /// Not due yet, or still being written.
    pub deferred: u32,
    /// Documents whose outcome is recorded but which are still in the source folder.
    pub relocation_failures: u32,
}

/// Summary of one run, written once at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub trigger: Trigger,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: RunCounts,
    /// Run-level failure reason when `status` is `Aborted`.
    pub detail: Option<String>,
    /// One line per document-level problem, `"<document>: <detail>"`.
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_round_trips_through_str() {
        for o in [Outcome::Sent, Outcome::Skipped, Outcome::Error] {
            assert_eq!(o.to_string().parse::<Outcome>().unwrap(), o);
        }
        assert!("delivered".parse::<Outcome>().is_err());
    }

    #[test]
    fn trigger_serializes_snake_case() {
        let json = serde_json::to_string(&Trigger::Scheduled).unwrap();
        assert_eq!(json, r#""scheduled""#);
    }
}
