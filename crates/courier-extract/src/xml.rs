//! CII / UBL invoice XML field extraction.
//!
//! Matching is by local element name, so it works whatever namespace
//! prefixes (`rsm:`, `ram:`, `cbc:`, none) the producer chose. A path like
//! `["BuyerTradeParty", "URIID"]` means "any `URIID` somewhere below any
//! `BuyerTradeParty`".

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::fields::{is_valid_email, normalize_address, parse_invoice_date};
use crate::registry::MetadataExtractor;
use crate::types::{DocumentFamily, ExtractedInvoiceMetadata, InvoiceFields};

const DATE_PATHS: &[&[&str]] = &[
    // ZUGFeRD 2.x / Factur-X / XRechnung CII
    &["ExchangedDocument", "IssueDateTime", "DateTimeString"],
    // ZUGFeRD 1.0
    &["HeaderExchangedDocument", "IssueDateTime", "DateTimeString"],
    &["IssueDateTime", "DateTimeString"],
    // UBL
    &["IssueDate"],
];

const RECIPIENT_PATHS: &[&[&str]] = &[
    &[
        "BuyerTradeParty",
        "DefinedTradeContact",
        "EmailURIUniversalCommunication",
        "URIID",
    ],
    &["BuyerTradeParty", "URIUniversalCommunication", "URIID"],
    &["BuyerTradeParty", "URIID"],
    // UBL
    &["AccountingCustomerParty", "Contact", "ElectronicMail"],
    &["AccountingCustomerParty", "EndpointID"],
];

const NUMBER_PATHS: &[&[&str]] = &[
    &["ExchangedDocument", "ID"],
    &["HeaderExchangedDocument", "ID"],
    &["Invoice", "ID"],
];

const BUYER_NAME_PATHS: &[&[&str]] = &[
    &["BuyerTradeParty", "Name"],
    &["AccountingCustomerParty", "PartyLegalEntity", "RegistrationName"],
    &["AccountingCustomerParty", "PartyName", "Name"],
];

fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex is valid"))
}

fn invoice_root_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"<(?:[A-Za-z_][\w.-]*:)?(?:CrossIndustryInvoice|CrossIndustryDocument|Invoice)[\s>/]",
        )
        .expect("root regex is valid")
    })
}

fn cdata_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("cdata regex is valid"))
}

/// Regex matching a whole element by local name; group 1 is its content
/// (absent for self-closing elements).
fn element_regex(local_name: &str) -> Option<Regex> {
    let name = regex::escape(local_name);
    let prefix = r"(?:[A-Za-z_][\w.-]*:)?";
    Regex::new(&format!(
        r"(?s)<{prefix}{name}(?:\s[^>]*)?(?:/>|>(.*?)</{prefix}{name}\s*>)"
    ))
    .ok()
}

/// Text of every element reached by `path`, in document order.
pub fn find_texts(xml: &str, path: &[&str]) -> Vec<String> {
    let mut scopes: Vec<&str> = vec![xml];
    for name in path {
        let Some(re) = element_regex(name) else {
            return Vec::new();
        };
        scopes = scopes
            .iter()
            .flat_map(|scope| {
                re.captures_iter(scope)
                    .filter_map(|c| c.get(1).map(|m| m.as_str()))
                    .collect::<Vec<_>>()
            })
            .collect();
        if scopes.is_empty() {
            return Vec::new();
        }
    }
    scopes
        .into_iter()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}

fn element_text(inner: &str) -> String {
    let unwrapped = cdata_regex().replace_all(inner, "$1");
    decode_entities(unwrapped.trim())
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#64;", "@")
        .replace("&amp;", "&")
}

fn candidates(xml: &str, paths: &[&[&str]]) -> Vec<String> {
    paths.iter().flat_map(|p| find_texts(xml, p)).collect()
}

fn first(xml: &str, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|p| find_texts(xml, p).into_iter().next())
}

/// Extract routing metadata from invoice XML text.
pub fn parse_invoice_xml(xml: &str, family: DocumentFamily) -> ExtractedInvoiceMetadata {
    let xml = comment_regex().replace_all(xml, "");
    let xml = xml.as_ref();

    if !invoice_root_regex().is_match(xml) {
        return ExtractedInvoiceMetadata::failed("embedded data is not an invoice document");
    }

    let dates = candidates(xml, DATE_PATHS);
    let Some(first_date) = dates.first() else {
        return ExtractedInvoiceMetadata::failed("missing required field: invoice date");
    };
    let Some(invoice_date) = dates.iter().find_map(|raw| parse_invoice_date(raw)) else {
        return ExtractedInvoiceMetadata::failed(format!(
            "invoice date '{first_date}' is not a recognised date"
        ));
    };

    let addresses = candidates(xml, RECIPIENT_PATHS);
    let Some(first_address) = addresses.first() else {
        return ExtractedInvoiceMetadata::failed("missing required field: recipient address");
    };
    let Some(recipient) = addresses
        .iter()
        .map(|raw| normalize_address(raw))
        .find(|addr| is_valid_email(addr))
    else {
        return ExtractedInvoiceMetadata::failed(format!(
            "recipient field did not match an email pattern: '{first_address}'"
        ));
    };

    let fields = InvoiceFields {
        family,
        invoice_date,
        recipient: recipient.to_string(),
        invoice_number: first(xml, NUMBER_PATHS),
        buyer_name: first(xml, BUYER_NAME_PATHS),
    };
    debug!(
        date = %fields.invoice_date,
        recipient = %fields.recipient,
        number = ?fields.invoice_number,
        "invoice fields extracted"
    );
    ExtractedInvoiceMetadata::Parsed(fields)
}

/// Decode XML bytes as UTF-8, dropping a byte-order mark.
pub fn decode_xml(bytes: &[u8]) -> Result<&str, String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    std::str::from_utf8(bytes).map_err(|e| format!("structured data is not valid UTF-8: {e}"))
}

/// A standalone XML invoice file (XRechnung CII or UBL).
pub struct InvoiceXmlExtractor;

impl MetadataExtractor for InvoiceXmlExtractor {
    fn family(&self) -> DocumentFamily {
        DocumentFamily::InvoiceXml
    }

    fn sniff(&self, bytes: &[u8]) -> bool {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'<')
    }

    fn extract(&self, bytes: &[u8]) -> ExtractedInvoiceMetadata {
        match decode_xml(bytes) {
            Ok(text) => parse_invoice_xml(text, DocumentFamily::InvoiceXml),
            Err(reason) => ExtractedInvoiceMetadata::failed(reason),
        }
    }
}
