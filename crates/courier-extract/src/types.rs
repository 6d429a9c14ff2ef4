use chrono::NaiveDate;
use serde::Serialize;

/// Broad document families we know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFamily {
    /// PDF/A-3 with an embedded ZUGFeRD / Factur-X / XRechnung XML file.
    ZugferdPdf,
    /// A bare CII or UBL XML invoice.
    InvoiceXml,
}

impl DocumentFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZugferdPdf => "zugferd_pdf",
            Self::InvoiceXml => "invoice_xml",
        }
    }

    /// MIME type used when the document is attached to an email.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::ZugferdPdf => "application/pdf",
            Self::InvoiceXml => "application/xml",
        }
    }
}

/// Routing metadata of a successfully parsed invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceFields {
    pub family: DocumentFamily,
    pub invoice_date: NaiveDate,
    /// Syntactically valid email address of the buyer.
    pub recipient: String,
    pub invoice_number: Option<String>,
    pub buyer_name: Option<String>,
}

/// Result of parsing one document.
///
/// Either both date and recipient are present, or neither is and a
/// non-empty reason says why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractedInvoiceMetadata {
    Parsed(InvoiceFields),
    Failed { reason: String },
}

impl ExtractedInvoiceMetadata {
    /// Build a failure, substituting a generic reason for an empty one.
    pub fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.trim().is_empty() {
            "document could not be parsed".to_string()
        } else {
            reason
        };
        Self::Failed { reason }
    }

    pub fn fields(&self) -> Option<&InvoiceFields> {
        match self {
            Self::Parsed(fields) => Some(fields),
            Self::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Parsed(_) => None,
            Self::Failed { reason } => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_failure_reason_is_replaced() {
        let failed = ExtractedInvoiceMetadata::failed("  ");
        assert_eq!(
            failed.failure_reason(),
            Some("document could not be parsed")
        );
        assert!(failed.fields().is_none());
    }
}
