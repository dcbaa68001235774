//! LLM chat completion responses.
//!
//! `choices[0].message.content` holds a JSON document, often wrapped in a
//! Markdown code fence or surrounded by prose. Fields may be nested by
//! taxonomy or by group (`{"fields": {"train_ticket": {...}}}`), and a
//! `confidence` object reports per-field confidences.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{ProviderDocument, RawField, lenient_f64, scalar_text};
use crate::error::ExtractionError;
use crate::invoice::rules::patterns::CODE_FENCE;
use crate::invoice::rules::{ConfidenceScale, ProviderConfidence};
use crate::models::invoice::ProviderKind;

/// Top-level keys of the content document that are not fields.
const RESERVED_KEYS: &[&str] = &[
    "invoice_type",
    "type",
    "document_type",
    "confidence",
    "overall_confidence",
    "items",
    "line_items",
    "fields",
];

const TYPE_KEYS: &[&str] = &["invoice_type", "type", "document_type"];
const ITEM_KEYS: &[&str] = &["items", "line_items"];
const OVERALL_KEYS: &[&str] = &["overall", "overall_confidence"];

/// Chat completion response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LlmPayload {
    #[serde(default)]
    pub choices: Vec<LlmChoice>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LlmChoice {
    #[serde(default)]
    pub message: Option<LlmMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LlmMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl LlmPayload {
    pub fn from_value(value: &Value) -> Result<Self, ExtractionError> {
        Self::deserialize(value).map_err(|e| {
            ExtractionError::malformed(format!("LLM completion has an unexpected shape: {}", e))
        })
    }

    /// Message content of the first choice.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
    }

    pub fn into_document(self) -> Result<ProviderDocument, ExtractionError> {
        let content = self
            .content()
            .ok_or_else(|| ExtractionError::malformed("LLM completion has no message content"))?;

        let parsed = parse_content(content)?;
        Ok(build_document(&parsed))
    }
}

/// Parse message content into a JSON object.
///
/// A Markdown fence is stripped first. If the result still does not parse,
/// the span from the first `{` to the last `}` is tried.
pub fn parse_content(content: &str) -> Result<Map<String, Value>, ExtractionError> {
    let unfenced = strip_fence(content);

    let value = match serde_json::from_str::<Value>(unfenced) {
        Ok(value) => value,
        Err(first_error) => match brace_span(content).map(serde_json::from_str::<Value>) {
            Some(Ok(value)) => value,
            _ => {
                return Err(ExtractionError::processing(
                    format!("content is not valid JSON: {}", first_error),
                    content,
                ));
            }
        },
    };

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ExtractionError::processing(
            "content is not a JSON object",
            content,
        )),
    }
}

/// Inner text of the first Markdown code fence, or the trimmed input.
pub fn strip_fence(content: &str) -> &str {
    CODE_FENCE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| content.trim())
}

fn brace_span(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (start < end).then(|| &content[start..=end])
}

fn build_document(content: &Map<String, Value>) -> ProviderDocument {
    let mut document = ProviderDocument::new(ProviderKind::Llm, ConfidenceScale::Unit);

    document.type_code = TYPE_KEYS
        .iter()
        .filter_map(|key| content.get(*key))
        .find_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let mut items = Vec::new();
    match content.get("fields") {
        Some(Value::Object(fields)) => flatten_fields(fields, &mut document.fields, &mut items),
        _ => {
            let top_level: Map<String, Value> = content
                .iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            flatten_fields(&top_level, &mut document.fields, &mut items);
        }
    }
    for key in ITEM_KEYS {
        if let Some(Value::Array(rows)) = content.get(*key) {
            items.extend(rows.iter().cloned());
        }
    }

    document.line_items = items
        .iter()
        .filter_map(Value::as_object)
        .map(|row| {
            row.iter()
                .map(|(key, value)| RawField::new(key.clone(), scalar_text(value)))
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    collect_confidences(content, &mut document);

    let mut text = String::new();
    for field in &document.fields {
        text.push_str(&field.key);
        text.push(' ');
        text.push_str(&field.value);
        text.push('\n');
    }
    document.text = text;

    debug!(
        "LLM content: {} fields, {} confidences, {} line items",
        document.fields.len(),
        document.confidences.len(),
        document.line_items.len()
    );

    document
}

/// Flatten nested groups into leaf fields. Arrays of objects under an
/// item key become line items; other arrays are joined.
fn flatten_fields(group: &Map<String, Value>, fields: &mut Vec<RawField>, items: &mut Vec<Value>) {
    for (key, value) in group {
        match value {
            Value::Object(inner) => flatten_fields(inner, fields, items),
            Value::Array(rows) if ITEM_KEYS.contains(&key.as_str()) => {
                items.extend(rows.iter().cloned());
            }
            Value::Array(values) => {
                let joined = values
                    .iter()
                    .map(scalar_text)
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ");
                fields.push(RawField::new(key.clone(), joined));
            }
            _ => fields.push(RawField::new(key.clone(), scalar_text(value))),
        }
    }
}

/// Read the `confidence` block: a bare number is the overall value; an
/// object holds per-field values, optionally nested, plus `overall`.
fn collect_confidences(content: &Map<String, Value>, document: &mut ProviderDocument) {
    let mut pairs = Vec::new();
    let mut overall = content.get("overall_confidence").and_then(lenient_f64);

    match content.get("confidence") {
        Some(Value::Object(block)) => flatten_confidences(block, &mut pairs, &mut overall),
        Some(value) => overall = overall.or_else(|| lenient_f64(value)),
        None => {}
    }

    let percent = pairs.iter().any(|p: &ProviderConfidence| p.value > 1.0)
        || overall.is_some_and(|o| o > 1.0);
    if percent {
        document.scale = ConfidenceScale::Percent;
    }

    document.provider_overall = overall.and_then(|o| document.scale.normalize(o));

    for field in &mut document.fields {
        field.confidence = pairs.iter().find(|p| p.key == field.key).map(|p| p.value);
    }
    document.confidences = pairs;
}

fn flatten_confidences(
    block: &Map<String, Value>,
    pairs: &mut Vec<ProviderConfidence>,
    overall: &mut Option<f64>,
) {
    for (key, value) in block {
        if OVERALL_KEYS.contains(&key.as_str()) {
            if overall.is_none() {
                *overall = lenient_f64(value);
            }
            continue;
        }
        match value {
            Value::Object(inner) => flatten_confidences(inner, pairs, overall),
            _ => {
                if let Some(v) = lenient_f64(value) {
                    pairs.push(ProviderConfidence::new(key.clone(), v));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn completion(content: &str) -> LlmPayload {
        LlmPayload::from_value(&json!({"choices": [{"message": {"content": content}}]})).unwrap()
    }

    #[test]
    fn test_strip_fence() {
        assert_eq!(strip_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_fence("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_brace_span_fallback() {
        let map = parse_content("Here is the result: {\"fare\": \"155.00\"} hope it helps").unwrap();
        assert_eq!(map["fare"], "155.00");
    }

    #[test]
    fn test_unparseable_content_keeps_raw() {
        let err = parse_content("```json\n{\"fare\": \n```").unwrap_err();
        assert_eq!(err.code(), "PROCESSING_ERROR");
        assert_eq!(err.raw_content(), Some("```json\n{\"fare\": \n```"));

        let err = parse_content("[1, 2]").unwrap_err();
        assert_eq!(err.reason(), "content is not a JSON object");
    }

    #[test]
    fn test_missing_content_is_malformed() {
        let payload = LlmPayload::from_value(&json!({"choices": []})).unwrap();
        assert_eq!(payload.into_document().unwrap_err().code(), "MALFORMED_PAYLOAD");

        let payload =
            LlmPayload::from_value(&json!({"choices": [{"message": {"content": null}}]})).unwrap();
        assert!(payload.into_document().is_err());
    }

    #[test]
    fn test_grouped_fields_are_flattened() {
        let content = json!({
            "invoice_type": "train_ticket",
            "fields": {
                "train_ticket": {
                    "invoice_number": "25439165660000008536",
                    "fare": 155.0,
                    "route": {"departure_station": "长沙南", "arrival_station": "广州南"}
                }
            },
            "confidence": {"invoice_number": 0.95, "fare": 0.9, "overall": 0.92}
        })
        .to_string();

        let doc = completion(&content).into_document().unwrap();
        assert_eq!(doc.kind, ProviderKind::Llm);
        assert_eq!(doc.type_code.as_deref(), Some("train_ticket"));
        assert_eq!(doc.scale, ConfidenceScale::Unit);
        assert_eq!(doc.provider_overall, Some(0.92));

        let keys: Vec<&str> = doc.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["fare", "invoice_number", "arrival_station", "departure_station"]
        );
        assert_eq!(doc.fields[0].value, "155.0");
        assert_eq!(doc.fields[0].confidence, Some(0.9));
        assert_eq!(doc.fields[2].confidence, None);
    }

    #[test]
    fn test_flat_content_and_percent_confidences() {
        let content = r#"{"invoiceNumber": "12345678", "confidence": {"invoiceNumber": 88}}"#;
        let doc = completion(content).into_document().unwrap();

        assert_eq!(doc.type_code, None);
        assert_eq!(doc.fields, vec![
            RawField::new("invoiceNumber", "12345678").with_confidence(Some(88.0))
        ]);
        assert_eq!(doc.scale, ConfidenceScale::Percent);
    }

    #[test]
    fn test_numeric_identifiers_keep_their_digits() {
        let content = r#"{"fields": {"common": {"invoice_number": 25432000000022014229, "fare": 155.00}}}"#;
        let doc = completion(content).into_document().unwrap();

        assert_eq!(doc.fields, vec![
            RawField::new("fare", "155.00"),
            RawField::new("invoice_number", "25432000000022014229"),
        ]);
    }

    #[test]
    fn test_line_items() {
        let content = json!({
            "fields": {"seller_name": "某某公司", "items": [{"goods_name": "办公用品", "amount": 100}]},
            "line_items": [{"goods_name": "打印纸", "quantity": "2"}, "noise"]
        })
        .to_string();

        let doc = completion(&content).into_document().unwrap();
        assert_eq!(doc.fields.len(), 1);
        assert_eq!(doc.line_items.len(), 2);
        assert!(doc.line_items[0].contains(&RawField::new("amount", "100")));
        assert!(doc.line_items[1].contains(&RawField::new("quantity", "2")));
    }

    #[test]
    fn test_scalar_confidence_is_overall() {
        let doc = completion(r#"{"fare": "10", "confidence": 0.7}"#).into_document().unwrap();
        assert_eq!(doc.provider_overall, Some(0.7));
        assert!(doc.confidences.is_empty());
    }
}
