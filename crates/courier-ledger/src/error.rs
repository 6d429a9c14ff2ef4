use thiserror::Error;

/// Errors that can occur within the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored row could not be decoded back into a domain type.
    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another thread panicked while holding the connection.
    #[error("Ledger connection lock poisoned")]
    Poisoned,
}

impl LedgerError {
    /// Stable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Database(_) => "LEDGER_DATABASE_ERROR",
            LedgerError::CorruptRow { .. } => "LEDGER_CORRUPT_ROW",
            LedgerError::Serialization(_) => "LEDGER_SERIALIZATION_ERROR",
            LedgerError::Poisoned => "LEDGER_UNAVAILABLE",
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(LedgerError::Poisoned.code(), "LEDGER_UNAVAILABLE");
        let corrupt = LedgerError::CorruptRow {
            table: "runs",
            reason: "bad status".into(),
        };
        assert_eq!(corrupt.code(), "LEDGER_CORRUPT_ROW");
        let db: LedgerError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(db.code(), "LEDGER_DATABASE_ERROR");
    }
}
