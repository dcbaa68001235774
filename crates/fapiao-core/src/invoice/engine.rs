//! Extraction engine: one provider payload in, one canonical record out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::InvoiceExtractor;
use super::rules::{
    ConfidenceResolver, ExtractionTables, FieldDeriver, FieldValidator, InvoiceClassifier,
    KeyMapper, TypeCoercer,
};
use crate::error::ExtractionError;
use crate::models::config::FapiaoConfig;
use crate::models::invoice::{
    CanonicalInvoiceResult, CanonicalKey, ExtractedField, InvoiceTaxonomy, LineItem, TypedValue,
};
use crate::provider::{ProviderDocument, RawField, RawProviderPayload};

/// Sequences detection, classification, mapping, coercion, confidence
/// scoring, derivation and validation over a single payload.
///
/// The engine holds no per-request state; clones share the same tables.
#[derive(Debug, Clone)]
pub struct ExtractionEngine {
    tables: Arc<ExtractionTables>,
    config: FapiaoConfig,
}

impl Default for ExtractionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionEngine {
    /// Engine with the built-in tables and default configuration.
    pub fn new() -> Self {
        Self {
            tables: ExtractionTables::standard(),
            config: FapiaoConfig::default(),
        }
    }

    /// Engine with a configuration. Extra label mappings are merged over
    /// the built-in key table.
    pub fn with_config(config: FapiaoConfig) -> crate::Result<Self> {
        config.check()?;

        let standard = ExtractionTables::standard();
        let tables = if config.mappings.keys.is_empty() {
            standard
        } else {
            Arc::new(standard.with_extra_mappings(&config.mappings)?)
        };

        Ok(Self { tables, config })
    }

    /// Replace the lookup tables.
    pub fn with_tables(mut self, tables: Arc<ExtractionTables>) -> Self {
        self.tables = tables;
        self
    }

    pub fn config(&self) -> &FapiaoConfig {
        &self.config
    }

    pub fn tables(&self) -> &ExtractionTables {
        &self.tables
    }

    fn run(
        &self,
        payload: &Value,
        hint: Option<InvoiceTaxonomy>,
        steps: &mut Vec<String>,
    ) -> Result<CanonicalInvoiceResult, ExtractionError> {
        let tables = &*self.tables;

        let raw = RawProviderPayload::detect(payload).inspect_err(|e| {
            steps.push(format!("detect: failed: {}", e.reason()));
        })?;
        let kind = raw.kind();
        steps.push(format!("detect: {} payload", kind));
        info!("Extracting {} payload", kind);

        let document = raw.into_document().inspect_err(|e| {
            steps.push(format!("parse: failed: {}", e.reason()));
        })?;
        steps.push(format!(
            "parse: {} raw fields, {} line items",
            document.fields.len(),
            document.line_items.len()
        ));

        let classification = InvoiceClassifier::new(&tables.classifier).classify_detailed(
            hint,
            document.type_code.as_deref(),
            &document.text,
        );
        let taxonomy = classification.taxonomy;
        steps.push(format!("classify: {} ({})", taxonomy, classification.method));
        debug!("Classified as {} by {}", taxonomy, classification.method);

        let mapper = KeyMapper::new(&tables.keys);
        let coercer = TypeCoercer::new(&tables.coercions);
        let resolver = ConfidenceResolver::new(document.scale, &self.config.extraction);

        let mut fields = BTreeMap::new();
        let mut anomalous = BTreeMap::new();
        let mut unmapped = 0usize;
        let mut scored = ConfidenceSources::default();

        for raw_field in &document.fields {
            if !mapper.is_mapped(&raw_field.key) {
                unmapped += 1;
            }
            let key = mapper.map(&raw_field.key);
            let coerced = coercer.coerce_checked(&key, &raw_field.value);

            let direct = raw_field.confidence.and_then(|c| resolver.scale().normalize(c));
            if direct.is_some() {
                scored.direct += 1;
            } else if resolver.fuzzy_match(&key, &document.confidences).is_some() {
                scored.matched += 1;
            } else {
                scored.fallback += 1;
            }

            let field = ExtractedField {
                canonical_key: key.clone(),
                raw_value: raw_field.value.clone(),
                typed_value: coerced.value,
                confidence: resolver.resolve(&key, raw_field.confidence, &document.confidences),
                source_key: raw_field.key.clone(),
                derived: false,
            };

            if merge_field(&mut fields, field) {
                anomalous.insert(key, coerced.anomaly);
            }
        }

        steps.push(format!(
            "map: {} fields to {} canonical keys, {} unmapped",
            document.fields.len(),
            fields.len(),
            unmapped
        ));

        let anomalies: BTreeSet<CanonicalKey> = anomalous
            .into_iter()
            .filter_map(|(key, anomaly)| anomaly.then_some(key))
            .collect();
        steps.push(format!(
            "coerce: {} values, {} fell back to defaults",
            fields.len(),
            anomalies.len()
        ));
        steps.push(format!(
            "confidence: {} direct, {} matched, {} default",
            scored.direct, scored.matched, scored.fallback
        ));

        if self.config.extraction.derive_fields {
            let derived = FieldDeriver::new(&tables.derivations, coercer).derive(
                taxonomy,
                &mut fields,
                |key| resolver.resolve(key, None, &document.confidences),
            );
            if derived.is_empty() {
                steps.push("derive: nothing to derive".to_string());
            } else {
                let names: Vec<&str> = derived.iter().map(CanonicalKey::as_str).collect();
                steps.push(format!("derive: {}", names.join(", ")));
            }
        } else {
            steps.push("derive: disabled".to_string());
        }

        let line_items = line_items(&document, mapper, coercer);

        let validation = FieldValidator::new(
            &tables.requirements,
            &tables.coercions,
            &self.config.validation,
        )
        .validate_with_anomalies(taxonomy, &fields, &anomalies);
        steps.push(format!(
            "validate: {}, completeness {}%, {} errors, {} warnings",
            if validation.is_valid { "valid" } else { "invalid" },
            validation.completeness_score,
            validation.errors.len(),
            validation.warnings.len()
        ));
        if !validation.is_valid {
            debug!("Validation errors: {:?}", validation.errors);
        }

        let overall = resolver.overall(fields.values().map(|f| f.confidence));

        info!(
            "Extracted {} {} fields, confidence {:.2}",
            fields.len(),
            taxonomy,
            overall
        );

        Ok(CanonicalInvoiceResult::new(
            taxonomy,
            kind,
            fields,
            overall,
            document.provider_overall,
            validation,
            line_items,
            std::mem::take(steps),
        ))
    }
}

impl InvoiceExtractor for ExtractionEngine {
    fn extract(
        &self,
        payload: &Value,
        hint: Option<InvoiceTaxonomy>,
    ) -> Result<CanonicalInvoiceResult, ExtractionError> {
        let mut steps = Vec::new();
        self.run(payload, hint, &mut steps).map_err(|e| {
            warn!("Extraction failed: {}", e);
            e.with_steps(steps)
        })
    }
}

#[derive(Debug, Default)]
struct ConfidenceSources {
    direct: usize,
    matched: usize,
    fallback: usize,
}

/// Insert a field, resolving duplicate canonical keys: a non-blank value
/// beats a blank one, then higher confidence wins, first on ties.
/// Returns whether the new field was kept.
fn merge_field(fields: &mut BTreeMap<CanonicalKey, ExtractedField>, field: ExtractedField) -> bool {
    match fields.get(&field.canonical_key) {
        None => {}
        Some(existing) => {
            let replace = if existing.is_blank() {
                !field.is_blank()
            } else {
                !field.is_blank() && field.confidence > existing.confidence
            };
            if !replace {
                return false;
            }
        }
    }
    fields.insert(field.canonical_key.clone(), field);
    true
}

fn line_items(
    document: &ProviderDocument,
    mapper: KeyMapper<'_>,
    coercer: TypeCoercer<'_>,
) -> Vec<LineItem> {
    document
        .line_items
        .iter()
        .map(|row| LineItem::from_columns(line_columns(row, mapper, coercer)))
        .collect()
}

fn line_columns(
    row: &[RawField],
    mapper: KeyMapper<'_>,
    coercer: TypeCoercer<'_>,
) -> BTreeMap<CanonicalKey, TypedValue> {
    // First non-blank value per column wins
    let mut columns: BTreeMap<CanonicalKey, (TypedValue, bool)> = BTreeMap::new();
    for column in row {
        let key = mapper.map(&column.key);
        let blank = column.value.trim().is_empty();
        if columns
            .get(&key)
            .is_some_and(|(_, was_blank)| blank || !was_blank)
        {
            continue;
        }
        let value = coercer.coerce(&key, &column.value);
        columns.insert(key, (value, blank));
    }
    columns
        .into_iter()
        .map(|(key, (value, _))| (key, value))
        .collect()
}
