//! ZUGFeRD / Factur-X PDF support: locate the embedded invoice XML.
//!
//! Attachments are found through the catalog's `/Names /EmbeddedFiles`
//! name tree and through the PDF/A-3 `/AF` associated-files array.

use lopdf::{Dictionary, Document, Object};
use tracing::debug;

use crate::registry::MetadataExtractor;
use crate::types::{DocumentFamily, ExtractedInvoiceMetadata};
use crate::xml::{decode_xml, parse_invoice_xml};

/// Well-known attachment names, in order of preference.
const PREFERRED_NAMES: &[&str] = &[
    "factur-x.xml",
    "zugferd-invoice.xml",
    "xrechnung.xml",
    "invoice.xml",
];

/// How far into the file the `%PDF-` header may appear.
const HEADER_WINDOW: usize = 1024;

/// Guard against cyclic name trees and reference chains.
const MAX_DEPTH: usize = 32;

/// An attachment candidate: its file name and the file specification dict.
struct Attachment<'a> {
    name: String,
    spec: &'a Dictionary,
}

fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> &'a Object {
    for _ in 0..MAX_DEPTH {
        match obj {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(target) => obj = target,
                Err(_) => return obj,
            },
            _ => return obj,
        }
    }
    obj
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj) {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

fn entry<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().map(|obj| resolve(doc, obj))
}

/// Decode a PDF text string (UTF-16BE with BOM, otherwise byte-wise).
fn text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn spec_file_name(doc: &Document, spec: &Dictionary) -> Option<String> {
    for key in [b"UF".as_slice(), b"F".as_slice()] {
        if let Some(Object::String(bytes, _)) = entry(doc, spec, key) {
            let name = text_string(bytes);
            if !name.trim().is_empty() {
                return Some(name);
            }
        }
    }
    None
}

fn walk_name_tree<'a>(
    doc: &'a Document,
    node: &'a Dictionary,
    depth: usize,
    out: &mut Vec<Attachment<'a>>,
) {
    if depth > MAX_DEPTH {
        return;
    }
    if let Some(Object::Array(names)) = entry(doc, node, b"Names") {
        for pair in names.chunks(2) {
            let [key, value] = pair else { continue };
            let Some(spec) = resolve_dict(doc, value) else {
                continue;
            };
            let key_name = match resolve(doc, key) {
                Object::String(bytes, _) => text_string(bytes),
                _ => String::new(),
            };
            let name = spec_file_name(doc, spec).unwrap_or(key_name);
            out.push(Attachment { name, spec });
        }
    }
    if let Some(Object::Array(kids)) = entry(doc, node, b"Kids") {
        for kid in kids {
            if let Some(child) = resolve_dict(doc, kid) {
                walk_name_tree(doc, child, depth + 1, out);
            }
        }
    }
}

fn collect_attachments(doc: &Document) -> Result<Vec<Attachment<'_>>, String> {
    let root = doc
        .trailer
        .get(b"Root")
        .map_err(|_| "PDF has no document catalog".to_string())?;
    let catalog =
        resolve_dict(doc, root).ok_or_else(|| "PDF catalog is not a dictionary".to_string())?;

    let mut out = Vec::new();
    let embedded = entry(doc, catalog, b"Names")
        .and_then(|names| resolve_dict(doc, names))
        .and_then(|names| names.get(b"EmbeddedFiles").ok())
        .and_then(|tree| resolve_dict(doc, tree));
    if let Some(tree) = embedded {
        walk_name_tree(doc, tree, 0, &mut out);
    }

    if let Some(Object::Array(associated)) = entry(doc, catalog, b"AF") {
        for item in associated {
            if let Some(spec) = resolve_dict(doc, item) {
                if let Some(name) = spec_file_name(doc, spec) {
                    out.push(Attachment { name, spec });
                }
            }
        }
    }
    Ok(out)
}

fn choose<'a, 'b>(attachments: &'b [Attachment<'a>]) -> Option<&'b Attachment<'a>> {
    PREFERRED_NAMES
        .iter()
        .find_map(|wanted| {
            attachments
                .iter()
                .find(|a| a.name.trim().eq_ignore_ascii_case(wanted))
        })
        .or_else(|| {
            attachments
                .iter()
                .find(|a| a.name.trim().to_ascii_lowercase().ends_with(".xml"))
        })
}

fn attachment_bytes(doc: &Document, spec: &Dictionary) -> Result<Vec<u8>, String> {
    let ef = entry(doc, spec, b"EF")
        .and_then(|ef| resolve_dict(doc, ef))
        .ok_or_else(|| "embedded file specification has no /EF entry".to_string())?;
    let stream = [b"F".as_slice(), b"UF".as_slice()]
        .iter()
        .find_map(|key| match entry(doc, ef, key) {
            Some(Object::Stream(stream)) => Some(stream),
            _ => None,
        })
        .ok_or_else(|| "embedded file stream is missing".to_string())?;

    if stream.dict.get(b"Filter").is_ok() {
        stream
            .decompressed_content()
            .map_err(|e| format!("embedded file could not be decompressed: {e}"))
    } else {
        Ok(stream.content.clone())
    }
}

/// Return the raw bytes of the embedded invoice XML, if there is one.
///
/// `Err` means the PDF itself could not be read; `Ok(None)` means it was
/// read but carries no XML attachment.
pub fn extract_embedded_xml(bytes: &[u8]) -> Result<Option<Vec<u8>>, String> {
    let doc =
        Document::load_mem(bytes).map_err(|e| format!("document is not a readable PDF: {e}"))?;
    let attachments = collect_attachments(&doc)?;
    debug!(
        count = attachments.len(),
        names = ?attachments.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
        "PDF attachments found"
    );
    let Some(chosen) = choose(&attachments) else {
        return Ok(None);
    };
    attachment_bytes(&doc, chosen.spec).map(Some)
}

/// PDF/A-3 hybrid invoices (ZUGFeRD 1.x/2.x, Factur-X, XRechnung-in-PDF).
pub struct ZugferdPdfExtractor;

impl MetadataExtractor for ZugferdPdfExtractor {
    fn family(&self) -> DocumentFamily {
        DocumentFamily::ZugferdPdf
    }

    fn sniff(&self, bytes: &[u8]) -> bool {
        let window = &bytes[..bytes.len().min(HEADER_WINDOW)];
        window.windows(5).any(|w| w == b"%PDF-")
    }

    fn extract(&self, bytes: &[u8]) -> ExtractedInvoiceMetadata {
        match extract_embedded_xml(bytes) {
            Ok(Some(xml)) => match decode_xml(&xml) {
                Ok(text) => parse_invoice_xml(text, DocumentFamily::ZugferdPdf),
                Err(reason) => ExtractedInvoiceMetadata::failed(reason),
            },
            Ok(None) => ExtractedInvoiceMetadata::failed("no embedded structured data found"),
            Err(reason) => ExtractedInvoiceMetadata::failed(reason),
        }
    }
}
