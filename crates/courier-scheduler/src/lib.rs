//! `courier-scheduler`: the invoice delivery pipeline and its triggers.
//!
//! # Overview
//!
//! A [`RunCoordinator`] makes one pass over the source folder:
//! discovery, extraction, eligibility, delivery, ledger append and
//! relocation, one document at a time in name order. At most one run is in
//! flight; a second trigger is rejected, never queued. The [`Scheduler`]
//! fires a scheduled run once a day at a wall-clock time in the configured
//! zone; manual runs come in through the same coordinator.
//!
//! # Per-document outcomes
//!
//! | Situation                           | Ledger   | File         |
//! |-------------------------------------|----------|--------------|
//! | already `sent`/`skipped`            | -        | re-relocated |
//! | modified too recently               | -        | left         |
//! | extraction failed                   | `error`  | left         |
//! | invoice date in the future          | -        | left         |
//! | invoice date in the past            | `skipped`| relocated    |
//! | due, send accepted                  | `sent`   | relocated    |
//! | due, send failed (per message)      | `error`  | left         |
//! | due, authorization failed           | `error`  | left, run stops |

pub mod clock;
pub mod coordinator;
pub mod discovery;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod relocator;
pub mod schedule;

pub use clock::{Clock, FixedClock, SystemClock};
pub use coordinator::{PipelineSettings, RunCoordinator, RunRejected, RunTicket};
pub use eligibility::{evaluate, Eligibility};
pub use engine::Scheduler;
pub use error::{RelocateError, Result, SchedulerError};
pub use relocator::{FsRelocator, Relocator};
pub use schedule::DailySchedule;
