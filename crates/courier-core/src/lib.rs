//! Shared configuration, domain types and errors for the invoice courier.

pub mod config;
pub mod error;
pub mod types;

pub use error::{CoreError, Result};
