use tracing::debug;

use crate::pdf::ZugferdPdfExtractor;
use crate::types::{DocumentFamily, ExtractedInvoiceMetadata};
use crate::xml::InvoiceXmlExtractor;

/// One supported document family.
///
/// Implementations are pure: no I/O, no clock, no randomness. Malformed
/// input must come back as [`ExtractedInvoiceMetadata::Failed`], never as
/// a panic.
pub trait MetadataExtractor: Send + Sync {
    /// Which family this extractor handles.
    fn family(&self) -> DocumentFamily;

    /// Cheap content check; true if this extractor should try the bytes.
    fn sniff(&self, bytes: &[u8]) -> bool;

    /// Extract routing metadata.
    fn extract(&self, bytes: &[u8]) -> ExtractedInvoiceMetadata;
}

/// Ordered set of extractors. The first one whose `sniff` accepts the
/// bytes does the extraction.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn MetadataExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Registry with the built-in families: ZUGFeRD PDF, then bare XML.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ZugferdPdfExtractor));
        registry.register(Box::new(InvoiceXmlExtractor));
        registry
    }

    pub fn register(&mut self, extractor: Box<dyn MetadataExtractor>) {
        self.extractors.push(extractor);
    }

    pub fn extract(&self, bytes: &[u8]) -> ExtractedInvoiceMetadata {
        match self.extractors.iter().find(|e| e.sniff(bytes)) {
            Some(extractor) => {
                debug!(family = extractor.family().as_str(), size = bytes.len(), "extracting");
                extractor.extract(bytes)
            }
            None => ExtractedInvoiceMetadata::failed("unsupported document format"),
        }
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
