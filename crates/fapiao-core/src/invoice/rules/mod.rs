//! Table-driven rules for invoice field normalization.

pub mod classify;
pub mod coerce;
pub mod confidence;
pub mod derive;
pub mod keys;
pub mod patterns;
pub mod validate;

use std::sync::Arc;

use lazy_static::lazy_static;

pub use classify::{Classification, ClassificationMethod, ClassifierTable, InvoiceClassifier};
pub use coerce::{Coerced, CoercionKind, CoercionTable, QuantityDefault, TypeCoercer};
pub use confidence::{ConfidenceResolver, ConfidenceScale, ProviderConfidence};
pub use derive::{Derivation, DerivationSource, DerivationTable, FieldDeriver};
pub use keys::{KeyMapper, KeyTable, default_key};
pub use validate::{FieldIssue, FieldValidator, RequirementTable, Severity};

use crate::error::{FapiaoError, Result};
use crate::models::config::MappingConfig;
use crate::models::invoice::CanonicalKey;

lazy_static! {
    static ref STANDARD_TABLES: Arc<ExtractionTables> = Arc::new(ExtractionTables::build_standard());
}

/// Every lookup table the pipeline consults.
///
/// Tables are immutable once built and shared between engines.
#[derive(Debug, Clone, Default)]
pub struct ExtractionTables {
    pub keys: KeyTable,
    pub coercions: CoercionTable,
    pub requirements: RequirementTable,
    pub classifier: ClassifierTable,
    pub derivations: DerivationTable,
}

impl ExtractionTables {
    /// The built-in tables, built once per process.
    pub fn standard() -> Arc<ExtractionTables> {
        Arc::clone(&STANDARD_TABLES)
    }

    fn build_standard() -> Self {
        Self {
            keys: KeyTable::standard(),
            coercions: CoercionTable::standard(),
            requirements: RequirementTable::standard(),
            classifier: ClassifierTable::standard(),
            derivations: DerivationTable::standard(),
        }
    }

    /// A copy of these tables with extra provider labels mapped.
    pub fn with_extra_mappings(&self, mappings: &MappingConfig) -> Result<Self> {
        let mut tables = self.clone();
        for (label, key) in &mappings.keys {
            let key = key.trim();
            if label.trim().is_empty() || key.is_empty() {
                return Err(FapiaoError::Config(format!(
                    "empty mapping entry for label {:?}",
                    label
                )));
            }
            tables.keys.insert(label, CanonicalKey::new(key));
        }
        Ok(tables)
    }
}
