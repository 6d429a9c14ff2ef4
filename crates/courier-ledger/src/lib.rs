//! `courier-ledger`: append-only SQLite record of per-document outcomes and runs.
//!
//! # Overview
//!
//! Every document that reaches a terminal outcome in a run gets exactly one
//! row in `ledger_entries`. Rows are never updated or deleted (enforced by
//! triggers), so the table is the durable answer to "has this document
//! already been handled?".
//!
//! | Outcome   | Meaning                                     | Re-examined next run |
//! |-----------|---------------------------------------------|----------------------|
//! | `sent`    | email delivered                             | relocation only      |
//! | `skipped` | invoice date already past, nothing sent     | relocation only      |
//! | `error`   | extraction or delivery failed               | yes, fully           |
//!
//! Run summaries live in the `runs` table next to the entries.

pub mod db;
pub mod error;
pub mod ledger;

pub use error::{LedgerError, Result};
pub use ledger::Ledger;
