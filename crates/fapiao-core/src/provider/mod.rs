//! Upstream payload adapters.
//!
//! Two unrelated extractors feed the pipeline: a document-OCR service that
//! returns labelled key/value pairs with per-value probabilities, and an
//! LLM chat completion whose message content is a JSON document. Both are
//! unwrapped here into a [`ProviderDocument`], a flat list of raw fields
//! that the rest of the pipeline handles uniformly.

pub mod llm;
pub mod ocr;

use serde_json::Value;

pub use llm::LlmPayload;
pub use ocr::OcrPayload;

use crate::error::ExtractionError;
use crate::invoice::rules::{ConfidenceScale, ProviderConfidence};
use crate::models::invoice::ProviderKind;

/// One provider key/value pair before mapping and coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    /// Provider key, unmapped.
    pub key: String,
    /// Value as text.
    pub value: String,
    /// Confidence the provider attached to this exact value, in its own scale.
    pub confidence: Option<f64>,
}

impl RawField {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }
}

/// A payload reduced to what the pipeline needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDocument {
    pub kind: ProviderKind,
    /// Document type code reported by the provider, if any.
    pub type_code: Option<String>,
    /// Free text used for keyword classification.
    pub text: String,
    pub fields: Vec<RawField>,
    /// Every confidence the provider reported, for overlap matching.
    pub confidences: Vec<ProviderConfidence>,
    pub scale: ConfidenceScale,
    /// Overall confidence self-reported by the provider.
    pub provider_overall: Option<f64>,
    pub line_items: Vec<Vec<RawField>>,
}

impl ProviderDocument {
    pub(crate) fn new(kind: ProviderKind, scale: ConfidenceScale) -> Self {
        Self {
            kind,
            type_code: None,
            text: String::new(),
            fields: Vec::new(),
            confidences: Vec::new(),
            scale,
            provider_overall: None,
            line_items: Vec::new(),
        }
    }
}

/// The two recognised upstream payload shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum RawProviderPayload {
    Ocr(OcrPayload),
    Llm(LlmPayload),
}

impl RawProviderPayload {
    /// Identify the payload shape by probing for `Data`/`subMsgs` (OCR)
    /// or `choices` (LLM).
    pub fn detect(value: &Value) -> Result<Self, ExtractionError> {
        let Some(object) = value.as_object() else {
            return Err(ExtractionError::malformed(format!(
                "expected a JSON object, got {}",
                json_kind(value)
            )));
        };

        if let Some(data) = object.get("Data").or_else(|| object.get("data")) {
            return OcrPayload::from_data(data).map(RawProviderPayload::Ocr);
        }

        if object.contains_key("subMsgs") {
            return OcrPayload::from_body(value).map(RawProviderPayload::Ocr);
        }

        if object.contains_key("choices") {
            return LlmPayload::from_value(value).map(RawProviderPayload::Llm);
        }

        Err(ExtractionError::malformed(
            "unrecognised payload: expected Data, subMsgs or choices",
        ))
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            RawProviderPayload::Ocr(_) => ProviderKind::Ocr,
            RawProviderPayload::Llm(_) => ProviderKind::Llm,
        }
    }

    /// Unwrap into a flat document. LLM content that is not valid JSON
    /// fails with a processing error carrying the raw content.
    pub fn into_document(self) -> Result<ProviderDocument, ExtractionError> {
        match self {
            RawProviderPayload::Ocr(payload) => Ok(payload.into_document()),
            RawProviderPayload::Llm(payload) => payload.into_document(),
        }
    }
}

/// Render a JSON scalar as field text. Null is empty, nested values are
/// kept as compact JSON.
pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Read a number that may have been sent as a string.
pub(crate) fn lenient_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_detect_shapes() {
        let ocr = json!({"Data": "{\"subMsgs\": []}"});
        assert_eq!(RawProviderPayload::detect(&ocr).unwrap().kind(), ProviderKind::Ocr);

        let decoded = json!({"subMsgs": []});
        assert_eq!(RawProviderPayload::detect(&decoded).unwrap().kind(), ProviderKind::Ocr);

        let llm = json!({"choices": [{"message": {"content": "{}"}}]});
        assert_eq!(RawProviderPayload::detect(&llm).unwrap().kind(), ProviderKind::Llm);
    }

    #[test]
    fn test_detect_rejects_unknown_shapes() {
        let err = RawProviderPayload::detect(&json!({"result": 1})).unwrap_err();
        assert_eq!(err.code(), "MALFORMED_PAYLOAD");

        let err = RawProviderPayload::detect(&json!([1, 2])).unwrap_err();
        assert!(err.reason().contains("an array"));
    }

    #[test]
    fn test_scalar_helpers() {
        assert_eq!(scalar_text(&json!(null)), "");
        assert_eq!(scalar_text(&json!(12.5)), "12.5");
        assert_eq!(scalar_text(&json!("G1234")), "G1234");
        assert_eq!(lenient_f64(&json!("98")), Some(98.0));
        assert_eq!(lenient_f64(&json!("97.5%")), Some(97.5));
        assert_eq!(lenient_f64(&json!(true)), None);
    }
}
