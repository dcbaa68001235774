//! Configuration structures for the extraction pipeline.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FapiaoError, Result};

/// Main configuration for the fapiao pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FapiaoConfig {
    /// Extraction and confidence policy.
    pub extraction: ExtractionConfig,

    /// Validation policy.
    pub validation: ValidationConfig,

    /// Extra provider label mappings.
    pub mappings: MappingConfig,
}

/// Extraction and confidence policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Confidence given to a field when the provider reported none and no
    /// provider key overlaps the canonical key (0.0 - 1.0).
    pub default_field_confidence: f64,

    /// Overall confidence reported when no field was extracted (0.0 - 1.0).
    pub empty_record_confidence: f64,

    /// Provider keys shorter than this are ignored by overlap matching.
    pub min_fuzzy_key_len: usize,

    /// Synthesize missing canonical fields from related ones.
    pub derive_fields: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            default_field_confidence: 0.5,
            empty_record_confidence: 0.8,
            min_fuzzy_key_len: 2,
            derive_fields: true,
        }
    }
}

/// Validation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Allowed difference between `amount + tax_amount` and `total_amount`.
    pub amount_tolerance: f64,

    /// Check that pre-tax amount plus tax adds up to the total.
    pub check_amount_consistency: bool,

    /// Report values that fell back to their type default as warnings.
    pub report_coercion_anomalies: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: 0.01,
            check_amount_consistency: true,
            report_coercion_anomalies: false,
        }
    }
}

/// Extra provider label mappings merged over the built-in key table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Provider label to canonical key, e.g. `"开票时间": "invoice_date"`.
    pub keys: BTreeMap<String, String>,
}

impl FapiaoConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values outside their documented ranges.
    pub fn check(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.extraction.default_field_confidence) {
            return Err(FapiaoError::Config(format!(
                "extraction.default_field_confidence must be within [0, 1], got {}",
                self.extraction.default_field_confidence
            )));
        }
        if !unit.contains(&self.extraction.empty_record_confidence) {
            return Err(FapiaoError::Config(format!(
                "extraction.empty_record_confidence must be within [0, 1], got {}",
                self.extraction.empty_record_confidence
            )));
        }
        let tolerance = self.validation.amount_tolerance;
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(FapiaoError::Config(format!(
                "validation.amount_tolerance must be non-negative, got {}",
                self.validation.amount_tolerance
            )));
        }
        if let Some((label, _)) = self
            .mappings
            .keys
            .iter()
            .find(|(label, key)| label.trim().is_empty() || key.trim().is_empty())
        {
            return Err(FapiaoError::Config(format!(
                "mappings.keys contains an empty entry for label {:?}",
                label
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: FapiaoConfig =
            serde_json::from_str(r#"{"extraction": {"default_field_confidence": 0.4}}"#).unwrap();

        assert_eq!(config.extraction.default_field_confidence, 0.4);
        assert_eq!(config.extraction.empty_record_confidence, 0.8);
        assert!(config.extraction.derive_fields);
        assert_eq!(config.validation, ValidationConfig::default());
    }

    #[test]
    fn test_check_rejects_out_of_range() {
        let mut config = FapiaoConfig::default();
        config.extraction.empty_record_confidence = 1.5;
        assert!(matches!(config.check(), Err(FapiaoError::Config(_))));

        let mut config = FapiaoConfig::default();
        config.mappings.keys.insert("开票时间".to_string(), " ".to_string());
        assert!(config.check().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = FapiaoConfig::default();
        config.validation.report_coercion_anomalies = true;
        config
            .mappings
            .keys
            .insert("开票时间".to_string(), "invoice_date".to_string());
        config.save(&path).unwrap();

        assert_eq!(FapiaoConfig::from_file(&path).unwrap(), config);
    }
}
