//! Field-level parsing: invoice dates and recipient addresses.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

/// Date layouts seen in ZUGFeRD/XRechnung payloads, most specific first.
/// `%Y%m%d` is UN/CEFACT format code 102.
const DATE_FORMATS: &[&str] = &["%Y%m%d", "%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];

/// RFC 5321 limit on a forward path.
const MAX_EMAIL_LEN: usize = 254;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // WHATWG "valid email address" plus a mandatory dot in the domain.
        Regex::new(
            r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
        )
        .expect("email regex is valid")
    })
}

fn eight_digits_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{8}").expect("digit regex is valid"))
}

/// Parse an invoice date string in any of the supported layouts.
///
/// Falls back to the first run of eight digits read as `YYYYMMDD`, which
/// covers values like `20251215 (102)` or timestamps with a time suffix.
pub fn parse_invoice_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return Some(date);
        }
    }
    eight_digits_regex()
        .find(value)
        .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y%m%d").ok())
}

/// Normalise a candidate recipient value: trim, drop a `mailto:` scheme.
pub fn normalize_address(raw: &str) -> &str {
    let value = raw.trim();
    match value.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("mailto:") => value[7..].trim(),
        _ => value,
    }
}

/// Standard syntax check for a single email address.
pub fn is_valid_email(address: &str) -> bool {
    !address.is_empty() && address.len() <= MAX_EMAIL_LEN && email_regex().is_match(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_all_supported_layouts() {
        assert_eq!(parse_invoice_date("20251215"), Some(d(2025, 12, 15)));
        assert_eq!(parse_invoice_date("2025-12-15"), Some(d(2025, 12, 15)));
        assert_eq!(parse_invoice_date("15.12.2025"), Some(d(2025, 12, 15)));
        assert_eq!(parse_invoice_date("15/12/2025"), Some(d(2025, 12, 15)));
    }

    #[test]
    fn falls_back_to_embedded_digits() {
        assert_eq!(
            parse_invoice_date("  20251215T083000 "),
            Some(d(2025, 12, 15))
        );
    }

    #[test]
    fn rejects_unparseable_dates() {
        assert_eq!(parse_invoice_date(""), None);
        assert_eq!(parse_invoice_date("next tuesday"), None);
        assert_eq!(parse_invoice_date("20251345"), None);
    }

    #[test]
    fn mailto_prefix_is_stripped() {
        assert_eq!(normalize_address(" MAILTO:a@example.com "), "a@example.com");
        assert_eq!(normalize_address("a@example.com"), "a@example.com");
    }

    #[test]
    fn email_syntax_check() {
        assert!(is_valid_email("a@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co.uk"));
        assert!(!is_valid_email("not-an-address"));
        assert!(!is_valid_email("a@localhost"));
        assert!(!is_valid_email("a b@example.com"));
        assert!(!is_valid_email("a@-example.com"));
        assert!(!is_valid_email("0204:1-ABC-42"));
    }
}
