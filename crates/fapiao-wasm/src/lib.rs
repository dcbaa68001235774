//! WASM bindings for Chinese invoice extraction.
//!
//! This crate provides WebAssembly bindings for use in browsers and Node.js.
//! Payloads go in as JSON text; records and failure envelopes come back as
//! plain JS objects.

use std::fmt::Display;

use serde::Serialize;
use wasm_bindgen::prelude::*;

use fapiao_core::invoice::rules::CoercionKind;
use fapiao_core::models::config::FapiaoConfig;
use fapiao_core::{
    CanonicalInvoiceResult, CanonicalKey, ExtractionEngine, ExtractionTables, FailureReport,
    InvoiceClassifier, InvoiceExtractor, InvoiceTaxonomy, KeyMapper, TypeCoercer, TypedValue,
};

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Version information.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Extract a canonical record from an OCR or LLM payload.
///
/// Returns the record on success and the failure envelope when the payload
/// is rejected. Only an unknown `hint` throws.
#[wasm_bindgen]
pub fn extract(payload: &str, hint: Option<String>) -> Result<JsValue, JsValue> {
    let hint = parse_hint(hint.as_deref()).map_err(|e| JsValue::from_str(&e))?;
    extraction_to_js(&run_extraction(&ExtractionEngine::new(), payload, hint))
}

/// Map a provider label to its canonical key.
#[wasm_bindgen]
pub fn map_key(label: &str) -> String {
    let tables = ExtractionTables::standard();
    KeyMapper::new(&tables.keys).map(label).to_string()
}

/// Coerce a raw string the way the pipeline would for `key`.
#[wasm_bindgen]
pub fn coerce_value(key: &str, raw: &str) -> Result<JsValue, JsValue> {
    to_js(&coerce(key, raw)).map_err(JsValue::from)
}

/// Classify a document from its provider type code and text.
#[wasm_bindgen]
pub fn classify(type_code: Option<String>, text: &str) -> String {
    let tables = ExtractionTables::standard();
    InvoiceClassifier::new(&tables.classifier)
        .classify(type_code.as_deref(), text)
        .as_str()
        .to_string()
}

/// Extractor with a custom configuration, for repeated use.
#[wasm_bindgen]
pub struct FapiaoExtractor {
    engine: ExtractionEngine,
}

#[wasm_bindgen]
impl FapiaoExtractor {
    /// Create an extractor. `config` is a JSON configuration document;
    /// omitted sections take their defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config: Option<String>) -> Result<FapiaoExtractor, JsValue> {
        build_engine(config.as_deref())
            .map(|engine| Self { engine })
            .map_err(|e| JsValue::from_str(&e))
    }

    /// Extract a canonical record, or the failure envelope.
    #[wasm_bindgen]
    pub fn extract(&self, payload: &str, hint: Option<String>) -> Result<JsValue, JsValue> {
        let hint = parse_hint(hint.as_deref()).map_err(|e| JsValue::from_str(&e))?;
        extraction_to_js(&run_extraction(&self.engine, payload, hint))
    }
}

/// A record or the envelope describing why there is none.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Extraction {
    Record(Box<CanonicalInvoiceResult>),
    Failure(FailureReport),
}

/// Result of `coerce_value`.
#[derive(Debug, Serialize)]
struct CoercedValue {
    key: CanonicalKey,
    kind: CoercionKind,
    value: TypedValue,
    parsed: bool,
}

fn build_engine(config: Option<&str>) -> Result<ExtractionEngine, String> {
    let config: FapiaoConfig = match config {
        Some(json) => serde_json::from_str(json).map_err(|e| format!("invalid config: {}", e))?,
        None => FapiaoConfig::default(),
    };
    ExtractionEngine::with_config(config).map_err(|e| e.to_string())
}

fn parse_hint(hint: Option<&str>) -> Result<Option<InvoiceTaxonomy>, String> {
    hint.filter(|h| !h.trim().is_empty())
        .map(|h| h.parse::<InvoiceTaxonomy>().map_err(|e| e.to_string()))
        .transpose()
}

fn run_extraction(engine: &ExtractionEngine, payload: &str, hint: Option<InvoiceTaxonomy>) -> Extraction {
    match engine.extract_str(payload, hint) {
        Ok(result) => Extraction::Record(Box::new(result)),
        Err(e) => Extraction::Failure(e.report()),
    }
}

/// An envelope for a record that could not be handed to JS.
fn serialization_failure(error: impl Display) -> FailureReport {
    let message = format!("could not serialize the result: {}", error);
    FailureReport {
        success: false,
        error_code: "PROCESSING_ERROR",
        processing_steps: vec![format!("failed: {}", message)],
        message,
        raw_content: None,
    }
}

fn extraction_to_js(extraction: &Extraction) -> Result<JsValue, JsValue> {
    to_js(extraction)
        .or_else(|e| to_js(&serialization_failure(e)))
        .map_err(JsValue::from)
}

fn coerce(key: &str, raw: &str) -> CoercedValue {
    let tables = ExtractionTables::standard();
    let key = CanonicalKey::new(key);
    let coerced = TypeCoercer::new(&tables.coercions).coerce_checked(&key, raw);
    CoercedValue {
        kind: tables.coercions.kind_of(&key),
        value: coerced.value,
        parsed: !coerced.anomaly,
        key,
    }
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, serde_wasm_bindgen::Error> {
    // Plain objects rather than JS Maps
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    value.serialize(&serializer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OCR_PAYLOAD: &str = r#"{"subMsgs": [{"type": "VATInvoice", "result": {"prism_keyValueInfo": [
        {"key": "发票号码", "value": "25432000000022014229", "valueProb": 98},
        {"key": "价税合计(小写)", "value": "655.00", "valueProb": 97}
    ]}}]}"#;

    fn extract_json(engine: &ExtractionEngine, payload: &str) -> serde_json::Value {
        serde_json::to_value(run_extraction(engine, payload, None)).unwrap()
    }

    #[test]
    fn test_extraction_returns_record() {
        let record = extract_json(&ExtractionEngine::new(), OCR_PAYLOAD);
        assert_eq!(record["invoice_type"], "vat_invoice");
        assert_eq!(record["fields"]["total_amount"]["typed_value"], 655.0);
    }

    #[test]
    fn test_extraction_returns_envelope_on_failure() {
        let envelope = extract_json(&ExtractionEngine::new(), "{\"status\": 1}");
        assert_eq!(envelope["success"], false);
        assert_eq!(envelope["error_code"], "MALFORMED_PAYLOAD");
        assert_eq!(envelope["processing_steps"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_serialization_failure_has_a_step() {
        let report = serialization_failure("invalid type");
        assert!(!report.success);
        assert_eq!(report.error_code, "PROCESSING_ERROR");
        assert_eq!(report.processing_steps.len(), 1);
        assert!(report.processing_steps[0].starts_with("failed: could not serialize"));
    }

    #[test]
    fn test_parse_hint() {
        assert_eq!(parse_hint(None), Ok(None));
        assert_eq!(parse_hint(Some("")), Ok(None));
        assert_eq!(parse_hint(Some("taxi_ticket")), Ok(Some(InvoiceTaxonomy::TaxiTicket)));
        assert!(parse_hint(Some("parking")).is_err());
    }

    #[test]
    fn test_build_engine_applies_mappings() {
        let engine = build_engine(Some(r#"{"mappings": {"keys": {"开票时间": "invoice_date"}}}"#)).unwrap();
        let payload = r#"{"subMsgs": [{"type": "VATInvoice", "result": {"prism_keyValueInfo": [
            {"key": "开票时间", "value": "2025/03/11"}
        ]}}]}"#;
        let record = extract_json(&engine, payload);
        assert_eq!(record["fields"]["invoice_date"]["typed_value"], "2025-03-11");

        assert!(build_engine(Some("{not json")).is_err());
        assert!(build_engine(Some(r#"{"extraction": {"default_field_confidence": 2.0}}"#)).is_err());
    }

    #[test]
    fn test_coerce() {
        let coerced = serde_json::to_value(coerce("total_amount", "¥1,234.565")).unwrap();
        assert_eq!(coerced["kind"]["kind"], "money");
        assert!((coerced["value"].as_f64().unwrap() - 1234.57).abs() < 1e-9);
        assert_eq!(coerced["parsed"], true);

        let coerced = coerce("invoice_date", "soon");
        assert_eq!(coerced.value, TypedValue::Date("soon".to_string()));
        assert!(!coerced.parsed);
    }

    #[test]
    fn test_map_key_and_classify() {
        assert_eq!(map_key("开票日期"), "invoice_date");
        assert_eq!(classify(Some("TaxiTicket".to_string()), ""), "taxi_ticket");
        assert_eq!(classify(None, "高铁 二等座 车次 G1234"), "train_ticket");
    }
}
