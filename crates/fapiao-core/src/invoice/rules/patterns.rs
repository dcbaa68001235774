//! Common regex patterns for invoice field rules.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Dates after glyph/separator normalization: 2025-3-1, 2025-03-11 08:30
    pub static ref DATE_YMD: Regex = Regex::new(
        r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[\sT].*)?$"
    ).unwrap();

    // Compact dates: 20250311
    pub static ref DATE_COMPACT: Regex = Regex::new(
        r"^(\d{4})(\d{2})(\d{2})$"
    ).unwrap();

    pub static ref DATE_SEPARATOR_RUN: Regex = Regex::new(
        r"\s*-[\s-]*"
    ).unwrap();

    pub static ref ISO_DATE: Regex = Regex::new(
        r"^\d{4}-\d{2}-\d{2}$"
    ).unwrap();

    // Invoice numbers: 8 digits (paper) up to 20 digits (fully digital invoices)
    pub static ref INVOICE_NUMBER: Regex = Regex::new(
        r"^[0-9]{8,20}$"
    ).unwrap();

    pub static ref INVOICE_CODE: Regex = Regex::new(
        r"^[0-9]{10,12}$"
    ).unwrap();

    // Unified social credit code (18) or legacy taxpayer ids (15, 17, 20)
    pub static ref TAX_NUMBER: Regex = Regex::new(
        r"^[0-9A-Z]{15,20}$"
    ).unwrap();

    pub static ref WHITESPACE_RUN: Regex = Regex::new(
        r"\s+"
    ).unwrap();

    // Markdown code fence around LLM output
    pub static ref CODE_FENCE: Regex = Regex::new(
        r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_patterns() {
        assert!(DATE_YMD.is_match("2025-3-1"));
        assert!(DATE_YMD.is_match("2025-03-11 08:30"));
        assert!(!DATE_YMD.is_match("garbage"));
        assert!(DATE_COMPACT.is_match("20250311"));
        assert!(ISO_DATE.is_match("2025-03-11"));
        assert!(!ISO_DATE.is_match("2025-3-11"));
    }

    #[test]
    fn test_identifier_patterns() {
        assert!(INVOICE_NUMBER.is_match("25432000000022014229"));
        assert!(INVOICE_NUMBER.is_match("01234567"));
        assert!(!INVOICE_NUMBER.is_match("E1234567"));
        assert!(TAX_NUMBER.is_match("91430100MA4L12345X"));
        assert!(!TAX_NUMBER.is_match("9143"));
    }

    #[test]
    fn test_code_fence() {
        let caps = CODE_FENCE.captures("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(caps[1].trim(), "{\"a\": 1}");
    }
}
