//! Document-OCR key/value responses.
//!
//! The service wraps its result in a `Data` string holding JSON:
//! `{ subMsgs: [{ type, result: { prism_keyValueInfo, prism_invoiceDetailsList,
//! content } }] }`. Only the first sub-message is read.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{ProviderDocument, RawField, lenient_f64, scalar_text};
use crate::error::ExtractionError;
use crate::invoice::rules::{ConfidenceScale, ProviderConfidence};
use crate::models::invoice::ProviderKind;

/// Decoded OCR response body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OcrPayload {
    #[serde(rename = "subMsgs", default)]
    pub sub_messages: Vec<OcrSubMessage>,
}

/// One recognised document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OcrSubMessage {
    /// Document type code such as `VATInvoice` or `TrainTicket`.
    #[serde(rename = "type", default)]
    pub doc_type: Option<String>,

    #[serde(default)]
    pub result: Option<OcrResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OcrResult {
    #[serde(rename = "prism_keyValueInfo", default)]
    pub key_values: Vec<OcrKeyValue>,

    /// Line items, either objects or lists of key/value entries.
    #[serde(rename = "prism_invoiceDetailsList", default)]
    pub details: Vec<Value>,

    /// Full recognised text.
    #[serde(default)]
    pub content: Option<String>,
}

/// A labelled value with its recognition probability (0 - 100).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OcrKeyValue {
    #[serde(default)]
    pub key: String,

    #[serde(default)]
    pub value: Value,

    #[serde(rename = "valueProb", default)]
    pub value_prob: Option<Value>,
}

impl OcrKeyValue {
    fn to_raw_field(&self) -> RawField {
        RawField::new(self.key.clone(), scalar_text(&self.value))
            .with_confidence(self.value_prob.as_ref().and_then(lenient_f64))
    }
}

impl OcrPayload {
    /// Decode the `Data` member, given either as a JSON string or as an
    /// already-decoded object.
    pub fn from_data(data: &Value) -> Result<Self, ExtractionError> {
        match data {
            Value::String(s) => serde_json::from_str(s).map_err(|e| {
                ExtractionError::malformed(format!("OCR Data is not valid JSON: {}", e))
            }),
            Value::Object(_) => Self::from_body(data),
            _ => Err(ExtractionError::malformed(
                "OCR Data must be a JSON string or object",
            )),
        }
    }

    /// Decode a body that already has `subMsgs` at the top level.
    pub fn from_body(body: &Value) -> Result<Self, ExtractionError> {
        Self::deserialize(body).map_err(|e| {
            ExtractionError::malformed(format!("OCR body has an unexpected shape: {}", e))
        })
    }

    pub fn into_document(self) -> ProviderDocument {
        let mut document = ProviderDocument::new(ProviderKind::Ocr, ConfidenceScale::Percent);

        if self.sub_messages.len() > 1 {
            debug!(
                "OCR response has {} documents, reading the first",
                self.sub_messages.len()
            );
        }

        let Some(message) = self.sub_messages.into_iter().next() else {
            return document;
        };

        document.type_code = message
            .doc_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let result = message.result.unwrap_or_default();

        let mut text = result.content.unwrap_or_default();
        for kv in &result.key_values {
            let field = kv.to_raw_field();
            text.push('\n');
            text.push_str(&field.key);
            text.push(' ');
            text.push_str(&field.value);

            if let Some(prob) = field.confidence {
                document
                    .confidences
                    .push(ProviderConfidence::new(field.key.clone(), prob));
            }
            document.fields.push(field);
        }
        document.text = text;

        document.line_items = result
            .details
            .iter()
            .map(detail_row)
            .filter(|row| !row.is_empty())
            .collect();

        document
    }
}

/// A line item given as `{column: value}` or as `[{key, value}, ...]`.
fn detail_row(row: &Value) -> Vec<RawField> {
    match row {
        Value::Object(columns) => columns
            .iter()
            .map(|(key, value)| RawField::new(key.clone(), scalar_text(value)))
            .collect(),
        Value::Array(entries) => entries
            .iter()
            .filter_map(|entry| OcrKeyValue::deserialize(entry).ok())
            .map(|kv| kv.to_raw_field())
            .collect(),
        _ => Vec::new(),
    }
}
