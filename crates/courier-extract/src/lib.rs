//! `courier-extract`: pulls routing metadata out of invoice documents.
//!
//! Each supported document family implements [`MetadataExtractor`]; the
//! [`ExtractorRegistry`] sniffs the raw bytes and hands them to the first
//! family that recognises them. Extraction is pure: the same bytes always
//! yield the same [`ExtractedInvoiceMetadata`], and malformed input is
//! reported as a failure value instead of an error.

pub mod fields;
pub mod pdf;
pub mod registry;
pub mod types;
pub mod xml;

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;

pub use registry::{ExtractorRegistry, MetadataExtractor};
pub use types::{DocumentFamily, ExtractedInvoiceMetadata, InvoiceFields};
