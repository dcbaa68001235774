//! Core library for Chinese invoice and ticket extraction.
//!
//! This crate provides:
//! - Adapters for document-OCR key/value responses and LLM chat completions
//! - Provider key mapping onto a canonical field vocabulary
//! - Type coercion for dates, amounts, quantities and rates
//! - Confidence scoring, taxonomy classification and field validation
//! - `ExtractionEngine`, which runs the whole pipeline over one payload

pub mod error;
pub mod invoice;
pub mod models;
pub mod provider;

pub use error::{ExtractionError, FailureReport, FapiaoError, Result};
pub use invoice::rules::{ExtractionTables, InvoiceClassifier, KeyMapper, TypeCoercer};
pub use invoice::{ExtractionEngine, InvoiceExtractor};
pub use models::config::FapiaoConfig;
pub use models::invoice::{
    CanonicalInvoiceResult, CanonicalKey, ExtractedField, InvoiceTaxonomy, LineItem, ProviderKind,
    TypedValue, ValidationResult,
};
pub use provider::{ProviderDocument, RawField, RawProviderPayload};
