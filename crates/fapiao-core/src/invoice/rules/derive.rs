//! Synthesis of canonical fields from related ones.
//!
//! Tickets rarely print a field literally called "total"; they print a
//! fare. Rules here fill such gaps after coercion, only ever writing to a
//! field that is absent or blank.

use std::collections::BTreeMap;

use super::coerce::TypeCoercer;
use crate::models::invoice::{CanonicalKey, ExtractedField, InvoiceTaxonomy};

/// Where a derived value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivationSource {
    /// Re-coerce another field's raw value for the target key.
    Copy(CanonicalKey),
    /// Sum of two numeric fields. Both must be present.
    Sum(CanonicalKey, CanonicalKey),
}

/// One derivation rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub target: CanonicalKey,
    pub source: DerivationSource,
    pub taxonomies: Vec<InvoiceTaxonomy>,
}

impl Derivation {
    pub fn copy(target: CanonicalKey, from: CanonicalKey, taxonomies: &[InvoiceTaxonomy]) -> Self {
        Self {
            target,
            source: DerivationSource::Copy(from),
            taxonomies: taxonomies.to_vec(),
        }
    }

    pub fn sum(
        target: CanonicalKey,
        left: CanonicalKey,
        right: CanonicalKey,
        taxonomies: &[InvoiceTaxonomy],
    ) -> Self {
        Self {
            target,
            source: DerivationSource::Sum(left, right),
            taxonomies: taxonomies.to_vec(),
        }
    }

    pub fn applies_to(&self, taxonomy: InvoiceTaxonomy) -> bool {
        self.taxonomies.contains(&taxonomy)
    }
}

/// Ordered derivation rules. Earlier rules win.
#[derive(Debug, Clone, Default)]
pub struct DerivationTable {
    rules: Vec<Derivation>,
}

impl DerivationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        use InvoiceTaxonomy::*;

        let mut table = Self::new();
        table.push(Derivation::copy(
            CanonicalKey::TOTAL_AMOUNT,
            CanonicalKey::FARE,
            &[TrainTicket, FlightTicket, BusTicket],
        ));
        table.push(Derivation::sum(
            CanonicalKey::TOTAL_AMOUNT,
            CanonicalKey::AMOUNT,
            CanonicalKey::TAX_AMOUNT,
            &[VatInvoice, GeneralInvoice],
        ));
        table.push(Derivation::copy(
            CanonicalKey::TOTAL_AMOUNT,
            CanonicalKey::AMOUNT,
            &[TaxiTicket, HotelReceipt, GeneralInvoice],
        ));
        table.push(Derivation::copy(
            CanonicalKey::INVOICE_DATE,
            CanonicalKey::DEPARTURE_TIME,
            &[TrainTicket, FlightTicket, BusTicket],
        ));
        table.push(Derivation::copy(
            CanonicalKey::INVOICE_DATE,
            CanonicalKey::DEPARTURE_DATE,
            &[TrainTicket, FlightTicket, BusTicket],
        ));
        table.push(Derivation::copy(
            CanonicalKey::INVOICE_DATE,
            CanonicalKey::RIDE_DATE,
            &[TaxiTicket],
        ));
        table.push(Derivation::copy(
            CanonicalKey::INVOICE_DATE,
            CanonicalKey::CHECK_OUT_DATE,
            &[HotelReceipt],
        ));
        table
    }

    pub fn push(&mut self, rule: Derivation) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Derivation] {
        &self.rules
    }
}

/// Applies a [`DerivationTable`] to a field set.
#[derive(Debug, Clone, Copy)]
pub struct FieldDeriver<'a> {
    table: &'a DerivationTable,
    coercer: TypeCoercer<'a>,
}

impl<'a> FieldDeriver<'a> {
    pub fn new(table: &'a DerivationTable, coercer: TypeCoercer<'a>) -> Self {
        Self { table, coercer }
    }

    /// Fill absent or blank fields. `confidence` scores each new field.
    /// Returns the keys that were derived, in rule order.
    pub fn derive<F>(
        &self,
        taxonomy: InvoiceTaxonomy,
        fields: &mut BTreeMap<CanonicalKey, ExtractedField>,
        confidence: F,
    ) -> Vec<CanonicalKey>
    where
        F: Fn(&CanonicalKey) -> f64,
    {
        let mut derived = Vec::new();

        for rule in self.table.rules().iter().filter(|r| r.applies_to(taxonomy)) {
            if fields.get(&rule.target).is_some_and(|f| !f.is_blank()) {
                continue;
            }

            let Some((raw_value, source_key)) = self.source_value(&rule.source, fields) else {
                continue;
            };

            let field = ExtractedField {
                canonical_key: rule.target.clone(),
                typed_value: self.coercer.coerce(&rule.target, &raw_value),
                raw_value,
                confidence: confidence(&rule.target),
                source_key,
                derived: true,
            };
            fields.insert(rule.target.clone(), field);
            derived.push(rule.target.clone());
        }

        derived
    }

    fn source_value(
        &self,
        source: &DerivationSource,
        fields: &BTreeMap<CanonicalKey, ExtractedField>,
    ) -> Option<(String, String)> {
        let present = |key: &CanonicalKey| fields.get(key).filter(|f| !f.is_blank());

        match source {
            DerivationSource::Copy(from) => {
                let field = present(from)?;
                Some((field.raw_value.clone(), field.source_key.clone()))
            }
            DerivationSource::Sum(left, right) => {
                let l = present(left)?;
                let r = present(right)?;
                let total = l
                    .typed_value
                    .as_decimal()?
                    .checked_add(r.typed_value.as_decimal()?)?;
                Some((
                    format!("{:.2}", total),
                    format!("{}+{}", l.source_key, r.source_key),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::rules::coerce::CoercionTable;
    use crate::models::invoice::TypedValue;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    type Fields = BTreeMap<CanonicalKey, ExtractedField>;

    fn fields(pairs: &[(CanonicalKey, &str)]) -> Fields {
        let coercions = CoercionTable::standard();
        let coercer = TypeCoercer::new(&coercions);
        pairs
            .iter()
            .map(|(key, raw)| {
                (
                    key.clone(),
                    ExtractedField {
                        canonical_key: key.clone(),
                        raw_value: raw.to_string(),
                        typed_value: coercer.coerce(key, raw),
                        confidence: 0.9,
                        source_key: format!("src_{}", key),
                        derived: false,
                    },
                )
            })
            .collect()
    }

    fn derive(taxonomy: InvoiceTaxonomy, fields: &mut Fields) -> Vec<CanonicalKey> {
        let coercions = CoercionTable::standard();
        let table = DerivationTable::standard();
        FieldDeriver::new(&table, TypeCoercer::new(&coercions)).derive(taxonomy, fields, |_| 0.5)
    }

    #[test]
    fn test_train_total_from_fare() {
        let mut f = fields(&[
            (CanonicalKey::FARE, "￥155.00"),
            (CanonicalKey::DEPARTURE_TIME, "2025年03月11日08:30开"),
        ]);
        let derived = derive(InvoiceTaxonomy::TrainTicket, &mut f);

        assert_eq!(derived, vec![CanonicalKey::TOTAL_AMOUNT, CanonicalKey::INVOICE_DATE]);

        let total = &f["total_amount"];
        assert!(total.derived);
        assert_eq!(total.typed_value, TypedValue::Money(Decimal::new(15500, 2)));
        assert_eq!(total.source_key, "src_fare");
        assert_eq!(total.confidence, 0.5);

        assert_eq!(
            f["invoice_date"].typed_value,
            TypedValue::Date("2025-03-11".to_string())
        );
    }

    #[test]
    fn test_existing_values_are_kept() {
        let mut f = fields(&[
            (CanonicalKey::FARE, "155.00"),
            (CanonicalKey::TOTAL_AMOUNT, "160.00"),
        ]);
        assert!(derive(InvoiceTaxonomy::TrainTicket, &mut f).is_empty());
        assert!(!f["total_amount"].derived);
    }

    #[test]
    fn test_blank_target_is_filled() {
        let mut f = fields(&[(CanonicalKey::FARE, "88"), (CanonicalKey::TOTAL_AMOUNT, " ")]);
        derive(InvoiceTaxonomy::BusTicket, &mut f);
        assert_eq!(
            f["total_amount"].typed_value,
            TypedValue::Money(Decimal::new(88, 0))
        );
    }

    #[test]
    fn test_vat_total_is_amount_plus_tax() {
        let mut f = fields(&[
            (CanonicalKey::AMOUNT, "617.92"),
            (CanonicalKey::TAX_AMOUNT, "37.08"),
        ]);
        derive(InvoiceTaxonomy::VatInvoice, &mut f);
        assert_eq!(f["total_amount"].raw_value, "655.00");
        assert_eq!(f["total_amount"].source_key, "src_amount+src_tax_amount");
    }

    #[test]
    fn test_rules_are_scoped_by_taxonomy() {
        let mut f = fields(&[(CanonicalKey::FARE, "155.00")]);
        assert!(derive(InvoiceTaxonomy::HotelReceipt, &mut f).is_empty());

        let mut f = fields(&[(CanonicalKey::CHECK_OUT_DATE, "2025年07月26日")]);
        assert_eq!(
            derive(InvoiceTaxonomy::HotelReceipt, &mut f),
            vec![CanonicalKey::INVOICE_DATE]
        );
        assert_eq!(f["invoice_date"].raw_value, "2025年07月26日");
    }

    #[test]
    fn test_sum_needs_both_parts() {
        let mut f = fields(&[(CanonicalKey::AMOUNT, "100")]);
        assert!(derive(InvoiceTaxonomy::VatInvoice, &mut f).is_empty());

        // General invoices fall back to the pre-tax amount
        let mut f = fields(&[(CanonicalKey::AMOUNT, "100")]);
        derive(InvoiceTaxonomy::GeneralInvoice, &mut f);
        assert_eq!(f["total_amount"].raw_value, "100");
    }

    #[test]
    fn test_overflowing_sum_is_skipped() {
        let max = "79228162514264337593543950335";
        let mut f = fields(&[(CanonicalKey::AMOUNT, max), (CanonicalKey::TAX_AMOUNT, max)]);
        assert!(derive(InvoiceTaxonomy::VatInvoice, &mut f).is_empty());
        assert!(!f.contains_key("total_amount"));
    }
}
