//! Per-field and overall confidence scoring.

use serde::Serialize;

use crate::models::config::ExtractionConfig;
use crate::models::invoice::CanonicalKey;

/// Unit a provider reports confidences in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceScale {
    /// 0 - 100, as in OCR `valueProb`.
    Percent,
    /// 0.0 - 1.0.
    Unit,
}

impl ConfidenceScale {
    /// Convert a provider value to [0, 1]. Non-finite values are rejected.
    pub fn normalize(self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        let scaled = match self {
            ConfidenceScale::Percent => value / 100.0,
            ConfidenceScale::Unit => value,
        };
        Some(scaled.clamp(0.0, 1.0))
    }
}

/// A confidence value as reported by the provider for one of its keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfidence {
    /// Provider key, unmapped.
    pub key: String,
    /// Value in the provider's own scale.
    pub value: f64,
}

impl ProviderConfidence {
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Resolves field confidences for one payload.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceResolver {
    scale: ConfidenceScale,
    default_confidence: f64,
    empty_confidence: f64,
    min_fuzzy_key_len: usize,
}

impl ConfidenceResolver {
    pub fn new(scale: ConfidenceScale, config: &ExtractionConfig) -> Self {
        Self {
            scale,
            default_confidence: config.default_field_confidence.clamp(0.0, 1.0),
            empty_confidence: config.empty_record_confidence.clamp(0.0, 1.0),
            min_fuzzy_key_len: config.min_fuzzy_key_len,
        }
    }

    pub fn scale(&self) -> ConfidenceScale {
        self.scale
    }

    /// Confidence of one field.
    ///
    /// A direct provider value wins. Otherwise the first provider key that
    /// overlaps the canonical key supplies it, and failing that the
    /// configured default applies.
    pub fn resolve(
        &self,
        key: &CanonicalKey,
        direct: Option<f64>,
        pairs: &[ProviderConfidence],
    ) -> f64 {
        if let Some(value) = direct.and_then(|v| self.scale.normalize(v)) {
            return value;
        }

        self.fuzzy_match(key, pairs)
            .unwrap_or(self.default_confidence)
    }

    /// Substring overlap between the canonical key and provider keys.
    ///
    /// Keys are compared case-insensitively with `_`, `-` and spaces
    /// removed, so `invoiceNumber` overlaps `invoice_number`.
    pub fn fuzzy_match(&self, key: &CanonicalKey, pairs: &[ProviderConfidence]) -> Option<f64> {
        let wanted = fold(key.as_str());
        if wanted.is_empty() {
            return None;
        }

        pairs
            .iter()
            .filter(|pair| pair.key.trim().chars().count() >= self.min_fuzzy_key_len)
            .find_map(|pair| {
                let raw = fold(&pair.key);
                if raw.is_empty() || !(raw.contains(&wanted) || wanted.contains(&raw)) {
                    return None;
                }
                self.scale.normalize(pair.value)
            })
    }

    /// Mean of the field confidences, or the empty-record value when there
    /// are none.
    pub fn overall<I>(&self, confidences: I) -> f64
    where
        I: IntoIterator<Item = f64>,
    {
        let (sum, count) = confidences
            .into_iter()
            .fold((0.0, 0usize), |(sum, count), c| (sum + c, count + 1));

        if count == 0 {
            self.empty_confidence
        } else {
            (sum / count as f64).clamp(0.0, 1.0)
        }
    }
}

fn fold(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}
