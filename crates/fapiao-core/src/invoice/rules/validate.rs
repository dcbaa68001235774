//! Required-field and format validation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use super::coerce::{CoercionKind, CoercionTable};
use super::patterns::{INVOICE_CODE, INVOICE_NUMBER, ISO_DATE, TAX_NUMBER};
use crate::models::config::ValidationConfig;
use crate::models::invoice::{CanonicalKey, ExtractedField, InvoiceTaxonomy, ValidationResult};

type Fields = BTreeMap<CanonicalKey, ExtractedField>;

/// Required and applicable keys per taxonomy.
#[derive(Debug, Clone, Default)]
pub struct RequirementTable {
    required: HashMap<InvoiceTaxonomy, Vec<CanonicalKey>>,
    applicable: HashMap<InvoiceTaxonomy, Vec<CanonicalKey>>,
}

impl RequirementTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        use InvoiceTaxonomy::*;

        let mut table = Self::new();

        table.set_required(
            VatInvoice,
            [
                CanonicalKey::INVOICE_NUMBER,
                CanonicalKey::INVOICE_DATE,
                CanonicalKey::SELLER_NAME,
                CanonicalKey::TOTAL_AMOUNT,
            ],
        );
        table.set_applicable(
            VatInvoice,
            [
                CanonicalKey::INVOICE_CODE,
                CanonicalKey::SELLER_TAX_NUMBER,
                CanonicalKey::BUYER_NAME,
                CanonicalKey::BUYER_TAX_NUMBER,
                CanonicalKey::AMOUNT,
                CanonicalKey::TAX_AMOUNT,
            ],
        );

        // Railway tickets carry no seller
        table.set_required(
            TrainTicket,
            [
                CanonicalKey::INVOICE_NUMBER,
                CanonicalKey::INVOICE_DATE,
                CanonicalKey::TOTAL_AMOUNT,
            ],
        );
        table.set_applicable(
            TrainTicket,
            [
                CanonicalKey::TRAIN_NUMBER,
                CanonicalKey::DEPARTURE_STATION,
                CanonicalKey::ARRIVAL_STATION,
                CanonicalKey::DEPARTURE_TIME,
                CanonicalKey::PASSENGER_NAME,
                CanonicalKey::SEAT_CLASS,
            ],
        );

        table.set_required(
            FlightTicket,
            [
                CanonicalKey::INVOICE_NUMBER,
                CanonicalKey::INVOICE_DATE,
                CanonicalKey::TOTAL_AMOUNT,
            ],
        );
        table.set_applicable(
            FlightTicket,
            [
                CanonicalKey::FLIGHT_NUMBER,
                CanonicalKey::PASSENGER_NAME,
                CanonicalKey::DEPARTURE_STATION,
                CanonicalKey::ARRIVAL_STATION,
                CanonicalKey::CARRIER,
                CanonicalKey::FARE,
            ],
        );

        table.set_required(
            TaxiTicket,
            [
                CanonicalKey::INVOICE_NUMBER,
                CanonicalKey::INVOICE_DATE,
                CanonicalKey::TOTAL_AMOUNT,
            ],
        );
        table.set_applicable(
            TaxiTicket,
            [
                CanonicalKey::LICENSE_PLATE,
                CanonicalKey::PICKUP_TIME,
                CanonicalKey::DROPOFF_TIME,
                CanonicalKey::MILEAGE,
            ],
        );

        table.set_required(BusTicket, [CanonicalKey::INVOICE_DATE, CanonicalKey::TOTAL_AMOUNT]);
        table.set_applicable(
            BusTicket,
            [
                CanonicalKey::INVOICE_NUMBER,
                CanonicalKey::DEPARTURE_STATION,
                CanonicalKey::ARRIVAL_STATION,
                CanonicalKey::DEPARTURE_TIME,
            ],
        );

        table.set_required(HotelReceipt, [CanonicalKey::INVOICE_DATE, CanonicalKey::TOTAL_AMOUNT]);
        table.set_applicable(
            HotelReceipt,
            [
                CanonicalKey::INVOICE_NUMBER,
                CanonicalKey::HOTEL_NAME,
                CanonicalKey::CHECK_IN_DATE,
                CanonicalKey::CHECK_OUT_DATE,
            ],
        );

        table.set_required(
            GeneralInvoice,
            [
                CanonicalKey::INVOICE_NUMBER,
                CanonicalKey::INVOICE_DATE,
                CanonicalKey::TOTAL_AMOUNT,
            ],
        );
        table.set_applicable(GeneralInvoice, [CanonicalKey::SELLER_NAME, CanonicalKey::BUYER_NAME]);

        table
    }

    pub fn set_required(
        &mut self,
        taxonomy: InvoiceTaxonomy,
        keys: impl IntoIterator<Item = CanonicalKey>,
    ) {
        self.required.insert(taxonomy, keys.into_iter().collect());
    }

    pub fn set_applicable(
        &mut self,
        taxonomy: InvoiceTaxonomy,
        keys: impl IntoIterator<Item = CanonicalKey>,
    ) {
        self.applicable.insert(taxonomy, keys.into_iter().collect());
    }

    pub fn required(&self, taxonomy: InvoiceTaxonomy) -> &[CanonicalKey] {
        self.required.get(&taxonomy).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn applicable(&self, taxonomy: InvoiceTaxonomy) -> &[CanonicalKey] {
        self.applicable.get(&taxonomy).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Required keys followed by applicable ones, without duplicates.
    pub fn expected(&self, taxonomy: InvoiceTaxonomy) -> Vec<CanonicalKey> {
        let mut expected: Vec<CanonicalKey> = Vec::new();
        for key in self.required(taxonomy).iter().chain(self.applicable(taxonomy)) {
            if !expected.contains(key) {
                expected.push(key.clone());
            }
        }
        expected
    }
}

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldIssue {
    pub key: CanonicalKey,
    pub severity: Severity,
    pub message: String,
}

impl FieldIssue {
    fn warning(key: &CanonicalKey, message: impl Into<String>) -> Self {
        Self {
            key: key.clone(),
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    fn error(key: &CanonicalKey, message: impl Into<String>) -> Self {
        Self {
            key: key.clone(),
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

/// Validates a canonical field set against its taxonomy.
#[derive(Debug, Clone, Copy)]
pub struct FieldValidator<'a> {
    requirements: &'a RequirementTable,
    coercions: &'a CoercionTable,
    config: &'a ValidationConfig,
}

impl<'a> FieldValidator<'a> {
    pub fn new(
        requirements: &'a RequirementTable,
        coercions: &'a CoercionTable,
        config: &'a ValidationConfig,
    ) -> Self {
        Self {
            requirements,
            coercions,
            config,
        }
    }

    pub fn validate(&self, taxonomy: InvoiceTaxonomy, fields: &Fields) -> ValidationResult {
        self.validate_with_anomalies(taxonomy, fields, &BTreeSet::new())
    }

    /// Validate, additionally reporting fields whose value fell back to a
    /// type default when the configuration asks for it.
    pub fn validate_with_anomalies(
        &self,
        taxonomy: InvoiceTaxonomy,
        fields: &Fields,
        anomalies: &BTreeSet<CanonicalKey>,
    ) -> ValidationResult {
        let present = |key: &CanonicalKey| fields.get(key).filter(|f| !f.is_blank());

        let mut issues = Vec::new();
        let mut missing_required = Vec::new();

        for key in self.requirements.required(taxonomy) {
            if present(key).is_none() {
                missing_required.push(key.clone());
                issues.push(FieldIssue::error(key, "required field is missing"));
            }
        }

        for (key, field) in fields.iter().filter(|(_, f)| !f.is_blank()) {
            self.check_format(key, field, &mut issues);
        }

        if self.config.check_amount_consistency {
            self.check_amounts(fields, &mut issues);
        }

        if self.config.report_coercion_anomalies {
            for key in anomalies {
                if let Some(field) = fields.get(key) {
                    issues.push(FieldIssue::warning(
                        key,
                        format!("could not parse {:?}, using default", field.raw_value),
                    ));
                }
            }
        }

        let expected = self.requirements.expected(taxonomy);
        let filled = expected.iter().filter(|key| present(*key).is_some()).count();

        let mut result = ValidationResult {
            is_valid: missing_required.is_empty()
                && !issues.iter().any(|i| i.severity == Severity::Error),
            missing_required,
            completeness_score: completeness(filled, expected.len()),
            ..ValidationResult::default()
        };

        for issue in issues {
            let line = format!("{}: {}", issue.key, issue.message);
            match issue.severity {
                Severity::Error => result.errors.push(line),
                Severity::Warning => result.warnings.push(line),
            }
            result
                .field_issues
                .entry(issue.key)
                .or_default()
                .push(issue.message);
        }

        result
    }

    fn check_format(&self, key: &CanonicalKey, field: &ExtractedField, issues: &mut Vec<FieldIssue>) {
        let value = field.typed_value.display();

        if self.coercions.kind_of(key) == CoercionKind::Date && !ISO_DATE.is_match(&value) {
            issues.push(FieldIssue::warning(key, format!("date {:?} is not YYYY-MM-DD", value)));
        }

        match key.as_str() {
            "invoice_number" if !INVOICE_NUMBER.is_match(&value) => {
                issues.push(FieldIssue::warning(
                    key,
                    format!("invoice number {:?} should be 8 to 20 digits", value),
                ));
            }
            "invoice_code" if !INVOICE_CODE.is_match(&value) => {
                issues.push(FieldIssue::warning(
                    key,
                    format!("invoice code {:?} should be 10 to 12 digits", value),
                ));
            }
            "seller_tax_number" | "buyer_tax_number" if !TAX_NUMBER.is_match(&value) => {
                issues.push(FieldIssue::warning(
                    key,
                    format!("tax number {:?} should be 15 to 20 digits or capital letters", value),
                ));
            }
            "total_amount" => {
                if field.typed_value.as_decimal().is_none_or(|d| d <= Decimal::ZERO) {
                    issues.push(FieldIssue::error(key, "total amount must be positive"));
                }
            }
            "tax_rate" => {
                let hundred = Decimal::ONE_HUNDRED;
                if field
                    .typed_value
                    .as_decimal()
                    .is_some_and(|d| d < Decimal::ZERO || d > hundred)
                {
                    issues.push(FieldIssue::warning(key, "tax rate should be between 0 and 100"));
                }
            }
            _ => {}
        }
    }

    fn check_amounts(&self, fields: &Fields, issues: &mut Vec<FieldIssue>) {
        let amount_of = |key: &str| {
            fields
                .get(key)
                .filter(|f| !f.is_blank())
                .and_then(|f| f.typed_value.as_decimal())
        };

        let (Some(amount), Some(tax), Some(total)) = (
            amount_of("amount"),
            amount_of("tax_amount"),
            amount_of("total_amount"),
        ) else {
            return;
        };

        let Some(difference) = amount.checked_add(tax).and_then(|sum| sum.checked_sub(total)) else {
            issues.push(FieldIssue::warning(
                &CanonicalKey::TOTAL_AMOUNT,
                "amounts are too large to check against the total",
            ));
            return;
        };

        let tolerance = Decimal::from_f64(self.config.amount_tolerance).unwrap_or(Decimal::ZERO);
        if difference.abs() > tolerance {
            issues.push(FieldIssue::warning(
                &CanonicalKey::TOTAL_AMOUNT,
                format!(
                    "amount {:.2} plus tax {:.2} does not add up to total {:.2}",
                    amount, tax, total
                ),
            ));
        }
    }
}

/// `round(100 * filled / expected)`, 100 when nothing is expected.
fn completeness(filled: usize, expected: usize) -> u8 {
    if expected == 0 {
        return 100;
    }
    let score = (100.0 * filled as f64 / expected as f64).round();
    score.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::rules::coerce::TypeCoercer;
    use pretty_assertions::assert_eq;

    fn field(key: CanonicalKey, raw: &str) -> (CanonicalKey, ExtractedField) {
        let table = CoercionTable::standard();
        let typed_value = TypeCoercer::new(&table).coerce(&key, raw);
        (
            key.clone(),
            ExtractedField {
                canonical_key: key.clone(),
                raw_value: raw.to_string(),
                typed_value,
                confidence: 0.9,
                source_key: key.to_string(),
                derived: false,
            },
        )
    }

    fn validate(taxonomy: InvoiceTaxonomy, fields: &Fields) -> ValidationResult {
        validate_with(taxonomy, fields, &ValidationConfig::default())
    }

    fn validate_with(
        taxonomy: InvoiceTaxonomy,
        fields: &Fields,
        config: &ValidationConfig,
    ) -> ValidationResult {
        let requirements = RequirementTable::standard();
        let coercions = CoercionTable::standard();
        FieldValidator::new(&requirements, &coercions, config).validate(taxonomy, fields)
    }

    fn train_fields() -> Fields {
        [
            field(CanonicalKey::INVOICE_NUMBER, "25432000000022014229"),
            field(CanonicalKey::INVOICE_DATE, "2025-03-11"),
            field(CanonicalKey::TOTAL_AMOUNT, "155.00"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_train_ticket_without_seller_is_valid() {
        let result = validate(InvoiceTaxonomy::TrainTicket, &train_fields());
        assert!(result.is_valid);
        assert!(result.missing_required.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_vat_invoice_without_seller_is_invalid() {
        let result = validate(InvoiceTaxonomy::VatInvoice, &train_fields());
        assert!(!result.is_valid);
        assert_eq!(result.missing_required, vec![CanonicalKey::SELLER_NAME]);
        assert_eq!(result.errors, vec!["seller_name: required field is missing".to_string()]);
    }

    #[test]
    fn test_blank_required_field_counts_as_missing() {
        let mut fields = train_fields();
        fields.extend([field(CanonicalKey::INVOICE_NUMBER, "  ")]);
        let result = validate(InvoiceTaxonomy::TrainTicket, &fields);
        assert_eq!(result.missing_required, vec![CanonicalKey::INVOICE_NUMBER]);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_non_positive_total_is_error() {
        let mut fields = train_fields();
        fields.extend([field(CanonicalKey::TOTAL_AMOUNT, "abc")]);
        let result = validate(InvoiceTaxonomy::TrainTicket, &fields);
        assert!(!result.is_valid);
        assert_eq!(
            result.field_issues.get("total_amount"),
            Some(&vec!["total amount must be positive".to_string()])
        );
    }

    #[test]
    fn test_format_warnings_do_not_invalidate() {
        let mut fields = train_fields();
        fields.extend([
            field(CanonicalKey::INVOICE_NUMBER, "E1234"),
            field(CanonicalKey::INVOICE_DATE, "garbage"),
            field(CanonicalKey::SELLER_TAX_NUMBER, "123"),
            field(CanonicalKey::INVOICE_CODE, "04400"),
            field(CanonicalKey::TAX_RATE, "130%"),
        ]);
        let result = validate(InvoiceTaxonomy::TrainTicket, &fields);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 5);
        assert!(result.field_issues.contains_key("invoice_date"));
    }

    #[test]
    fn test_amount_consistency() {
        let mut fields = train_fields();
        fields.extend([
            field(CanonicalKey::AMOUNT, "137.17"),
            field(CanonicalKey::TAX_AMOUNT, "17.83"),
        ]);
        assert!(validate(InvoiceTaxonomy::VatInvoice, &fields).warnings.is_empty());

        fields.extend([field(CanonicalKey::TAX_AMOUNT, "7.83")]);
        let result = validate(InvoiceTaxonomy::TrainTicket, &fields);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("total_amount: amount 137.17 plus tax 7.83"));

        let config = ValidationConfig {
            check_amount_consistency: false,
            ..ValidationConfig::default()
        };
        assert!(validate_with(InvoiceTaxonomy::TrainTicket, &fields, &config).warnings.is_empty());
    }

    #[test]
    fn test_overflowing_amounts_warn() {
        let max = "79228162514264337593543950335";
        let mut fields = train_fields();
        fields.extend([
            field(CanonicalKey::AMOUNT, max),
            field(CanonicalKey::TAX_AMOUNT, max),
            field(CanonicalKey::TOTAL_AMOUNT, "1"),
        ]);
        let result = validate(InvoiceTaxonomy::TrainTicket, &fields);
        assert!(result.is_valid);
        assert_eq!(
            result.warnings,
            vec!["total_amount: amounts are too large to check against the total".to_string()]
        );
    }

    #[test]
    fn test_completeness_is_monotonic() {
        let additions = [
            field(CanonicalKey::INVOICE_NUMBER, "12345678"),
            field(CanonicalKey::INVOICE_DATE, "2025-03-11"),
            field(CanonicalKey::TOTAL_AMOUNT, "10"),
            field(CanonicalKey::TRAIN_NUMBER, "G1"),
            field(CanonicalKey::DEPARTURE_STATION, "长沙南"),
            field(CanonicalKey::ARRIVAL_STATION, "广州南"),
            field(CanonicalKey::DEPARTURE_TIME, "2025-03-11 08:00"),
            field(CanonicalKey::PASSENGER_NAME, "张三"),
            field(CanonicalKey::SEAT_CLASS, "二等座"),
        ];

        let mut fields = Fields::new();
        let mut last = validate(InvoiceTaxonomy::TrainTicket, &fields).completeness_score;
        assert_eq!(last, 0);

        for (key, value) in additions {
            fields.insert(key, value);
            let score = validate(InvoiceTaxonomy::TrainTicket, &fields).completeness_score;
            assert!(score >= last);
            last = score;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_completeness_ignores_unexpected_fields() {
        let mut fields = train_fields();
        let before = validate(InvoiceTaxonomy::TrainTicket, &fields).completeness_score;
        fields.extend([field(CanonicalKey::new("discount"), "5")]);
        assert_eq!(validate(InvoiceTaxonomy::TrainTicket, &fields).completeness_score, before);
        assert_eq!(before, 33);
    }

    #[test]
    fn test_anomalies_reported_when_enabled() {
        let fields: Fields = [field(CanonicalKey::TOTAL_AMOUNT, "abc")].into_iter().collect();
        let anomalies: BTreeSet<CanonicalKey> = [CanonicalKey::TOTAL_AMOUNT].into_iter().collect();

        let requirements = RequirementTable::standard();
        let coercions = CoercionTable::standard();

        let quiet = ValidationConfig::default();
        let result = FieldValidator::new(&requirements, &coercions, &quiet).validate_with_anomalies(
            InvoiceTaxonomy::BusTicket,
            &fields,
            &anomalies,
        );
        assert!(result.warnings.is_empty());

        let loud = ValidationConfig {
            report_coercion_anomalies: true,
            ..ValidationConfig::default()
        };
        let result = FieldValidator::new(&requirements, &coercions, &loud).validate_with_anomalies(
            InvoiceTaxonomy::BusTicket,
            &fields,
            &anomalies,
        );
        assert_eq!(
            result.warnings,
            vec!["total_amount: could not parse \"abc\", using default".to_string()]
        );
    }

    #[test]
    fn test_expected_keys() {
        let table = RequirementTable::standard();
        let expected = table.expected(InvoiceTaxonomy::BusTicket);
        assert_eq!(expected[0], CanonicalKey::INVOICE_DATE);
        assert_eq!(expected.len(), 6);
        for taxonomy in InvoiceTaxonomy::ALL {
            assert!(!table.required(taxonomy).is_empty());
        }
    }
}
