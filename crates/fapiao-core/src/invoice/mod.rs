//! Invoice extraction: table-driven rules and the engine that runs them.

mod engine;
pub mod rules;

pub use engine::ExtractionEngine;

use serde_json::Value;

use crate::error::ExtractionError;
use crate::models::invoice::{CanonicalInvoiceResult, InvoiceTaxonomy};

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Trait for invoice extractors.
pub trait InvoiceExtractor {
    /// Extract a canonical record from a decoded provider payload.
    ///
    /// `hint` forces the taxonomy when the caller already knows it.
    fn extract(&self, payload: &Value, hint: Option<InvoiceTaxonomy>)
    -> Result<CanonicalInvoiceResult>;

    /// Extract from raw JSON text.
    fn extract_str(
        &self,
        payload: &str,
        hint: Option<InvoiceTaxonomy>,
    ) -> Result<CanonicalInvoiceResult> {
        let value: Value = serde_json::from_str(payload).map_err(|e| {
            let reason = format!("payload is not valid JSON: {}", e);
            ExtractionError::malformed(reason.clone())
                .with_steps(vec![format!("detect: failed: {}", reason)])
        })?;
        self.extract(&value, hint)
    }
}
