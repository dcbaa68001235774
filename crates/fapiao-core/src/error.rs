//! Error types for the fapiao-core library.

use serde::Serialize;
use thiserror::Error;

/// Main error type for the fapiao library.
#[derive(Error, Debug)]
pub enum FapiaoError {
    /// Extraction could not be attempted.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Hard failures of a single extraction.
///
/// Both variants carry the processing steps recorded up to and including
/// the point of failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    /// The upstream payload has an unknown shape or cannot be decoded.
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String, steps: Vec<String> },

    /// The LLM message content could not be parsed as a field object.
    #[error("failed to parse provider content: {reason}")]
    Processing {
        reason: String,
        raw_content: String,
        steps: Vec<String>,
    },
}

impl ExtractionError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        ExtractionError::MalformedPayload {
            reason: reason.into(),
            steps: Vec::new(),
        }
    }

    pub(crate) fn processing(reason: impl Into<String>, raw_content: impl Into<String>) -> Self {
        ExtractionError::Processing {
            reason: reason.into(),
            raw_content: raw_content.into(),
            steps: Vec::new(),
        }
    }

    /// Stable error class for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ExtractionError::MalformedPayload { .. } => "MALFORMED_PAYLOAD",
            ExtractionError::Processing { .. } => "PROCESSING_ERROR",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            ExtractionError::MalformedPayload { reason, .. }
            | ExtractionError::Processing { reason, .. } => reason,
        }
    }

    pub fn processing_steps(&self) -> &[String] {
        match self {
            ExtractionError::MalformedPayload { steps, .. }
            | ExtractionError::Processing { steps, .. } => steps,
        }
    }

    /// Raw provider content kept for diagnosis.
    pub fn raw_content(&self) -> Option<&str> {
        match self {
            ExtractionError::Processing { raw_content, .. } => Some(raw_content),
            ExtractionError::MalformedPayload { .. } => None,
        }
    }

    /// Attach the audit trail recorded by the engine.
    pub(crate) fn with_steps(mut self, recorded: Vec<String>) -> Self {
        match &mut self {
            ExtractionError::MalformedPayload { steps, .. }
            | ExtractionError::Processing { steps, .. } => *steps = recorded,
        }
        self
    }

    /// Serializable failure envelope.
    pub fn report(&self) -> FailureReport {
        let mut processing_steps = self.processing_steps().to_vec();
        if processing_steps.is_empty() {
            processing_steps.push(format!("failed: {}", self));
        }

        FailureReport {
            success: false,
            error_code: self.code(),
            message: self.to_string(),
            raw_content: self.raw_content().map(str::to_string),
            processing_steps,
        }
    }
}

/// JSON body describing a failed extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub success: bool,
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    pub processing_steps: Vec<String>,
}

/// Result type for the fapiao library.
pub type Result<T> = std::result::Result<T, FapiaoError>;
