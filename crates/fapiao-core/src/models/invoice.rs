//! Canonical invoice data model shared by every extraction stage.

use std::borrow::{Borrow, Cow};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A normalized, taxonomy-independent field name.
///
/// The built-in vocabulary is exposed as associated constants. Keys that a
/// provider emits but the vocabulary does not know are still represented
/// as `CanonicalKey`s so that no data is dropped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(Cow<'static, str>);

macro_rules! canonical_vocabulary {
    ($($name:ident => $text:literal,)+) => {
        impl CanonicalKey {
            $(
                #[doc = concat!("`", $text, "`")]
                pub const $name: CanonicalKey = CanonicalKey(Cow::Borrowed($text));
            )+

            /// Names of every key in the built-in vocabulary.
            pub const VOCABULARY: &'static [&'static str] = &[$($text),+];
        }
    };
}

canonical_vocabulary! {
    // Common invoice header
    INVOICE_NUMBER => "invoice_number",
    INVOICE_CODE => "invoice_code",
    INVOICE_DATE => "invoice_date",
    CHECK_CODE => "check_code",
    MACHINE_CODE => "machine_code",
    SELLER_NAME => "seller_name",
    SELLER_TAX_NUMBER => "seller_tax_number",
    SELLER_ADDRESS => "seller_address",
    SELLER_BANK_ACCOUNT => "seller_bank_account",
    BUYER_NAME => "buyer_name",
    BUYER_TAX_NUMBER => "buyer_tax_number",
    BUYER_ADDRESS => "buyer_address",
    BUYER_BANK_ACCOUNT => "buyer_bank_account",
    TOTAL_AMOUNT => "total_amount",
    TOTAL_AMOUNT_CHINESE => "total_amount_chinese",
    AMOUNT => "amount",
    TAX_AMOUNT => "tax_amount",
    TAX_RATE => "tax_rate",
    REMARKS => "remarks",
    PAYEE => "payee",
    REVIEWER => "reviewer",
    DRAWER => "drawer",
    // Line item columns
    GOODS_NAME => "goods_name",
    SPECIFICATION => "specification",
    UNIT => "unit",
    QUANTITY => "quantity",
    UNIT_PRICE => "unit_price",
    // Passenger tickets
    PASSENGER_NAME => "passenger_name",
    ID_NUMBER => "id_number",
    DEPARTURE_STATION => "departure_station",
    ARRIVAL_STATION => "arrival_station",
    DEPARTURE_TIME => "departure_time",
    DEPARTURE_DATE => "departure_date",
    FARE => "fare",
    TRAIN_NUMBER => "train_number",
    SEAT_CLASS => "seat_class",
    SEAT_NUMBER => "seat_number",
    FLIGHT_NUMBER => "flight_number",
    CARRIER => "carrier",
    CABIN_CLASS => "cabin_class",
    FUEL_SURCHARGE => "fuel_surcharge",
    CIVIL_AVIATION_FUND => "civil_aviation_fund",
    INSURANCE => "insurance",
    SERIAL_NUMBER => "serial_number",
    // Taxi receipts
    LICENSE_PLATE => "license_plate",
    RIDE_DATE => "ride_date",
    PICKUP_TIME => "pickup_time",
    DROPOFF_TIME => "dropoff_time",
    MILEAGE => "mileage",
    // Hotel receipts
    HOTEL_NAME => "hotel_name",
    CHECK_IN_DATE => "check_in_date",
    CHECK_OUT_DATE => "check_out_date",
    ROOM_NUMBER => "room_number",
    ROOM_TYPE => "room_type",
    NIGHTS => "nights",
}

impl CanonicalKey {
    /// Create a key from a static name without allocating.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Create a key from an owned name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key belongs to the built-in vocabulary.
    pub fn is_vocabulary(&self) -> bool {
        Self::VOCABULARY.contains(&self.as_str())
    }

    /// Iterate over the built-in vocabulary.
    pub fn vocabulary() -> impl Iterator<Item = CanonicalKey> {
        Self::VOCABULARY.iter().map(|name| Self::from_static(*name))
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CanonicalKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for CanonicalKey {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

/// Invoice or ticket taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceTaxonomy {
    /// VAT invoice (增值税发票), special or ordinary, paper or electronic.
    VatInvoice,
    /// Railway ticket.
    TrainTicket,
    /// Air itinerary / e-ticket receipt.
    FlightTicket,
    /// Taxi receipt.
    TaxiTicket,
    /// Long-distance bus ticket.
    BusTicket,
    /// Hotel folio or receipt.
    HotelReceipt,
    /// Anything else.
    GeneralInvoice,
}

impl InvoiceTaxonomy {
    pub const ALL: [InvoiceTaxonomy; 7] = [
        InvoiceTaxonomy::VatInvoice,
        InvoiceTaxonomy::TrainTicket,
        InvoiceTaxonomy::FlightTicket,
        InvoiceTaxonomy::TaxiTicket,
        InvoiceTaxonomy::BusTicket,
        InvoiceTaxonomy::HotelReceipt,
        InvoiceTaxonomy::GeneralInvoice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceTaxonomy::VatInvoice => "vat_invoice",
            InvoiceTaxonomy::TrainTicket => "train_ticket",
            InvoiceTaxonomy::FlightTicket => "flight_ticket",
            InvoiceTaxonomy::TaxiTicket => "taxi_ticket",
            InvoiceTaxonomy::BusTicket => "bus_ticket",
            InvoiceTaxonomy::HotelReceipt => "hotel_receipt",
            InvoiceTaxonomy::GeneralInvoice => "general_invoice",
        }
    }

    /// Human readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            InvoiceTaxonomy::VatInvoice => "VAT invoice",
            InvoiceTaxonomy::TrainTicket => "Train ticket",
            InvoiceTaxonomy::FlightTicket => "Flight itinerary",
            InvoiceTaxonomy::TaxiTicket => "Taxi receipt",
            InvoiceTaxonomy::BusTicket => "Bus ticket",
            InvoiceTaxonomy::HotelReceipt => "Hotel receipt",
            InvoiceTaxonomy::GeneralInvoice => "General invoice",
        }
    }
}

impl fmt::Display for InvoiceTaxonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a taxonomy name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown invoice taxonomy: {0}")]
pub struct UnknownTaxonomy(pub String);

impl FromStr for InvoiceTaxonomy {
    type Err = UnknownTaxonomy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        InvoiceTaxonomy::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| UnknownTaxonomy(s.to_string()))
    }
}

/// A coerced field value. The variant is fixed per canonical key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    /// Free text.
    Text(String),
    /// ISO `YYYY-MM-DD` date, or the original string when it could not be parsed.
    Date(String),
    /// Monetary amount rounded to two decimal places.
    Money(#[serde(with = "rust_decimal::serde::float")] Decimal),
    /// Count or measure.
    Quantity(#[serde(with = "rust_decimal::serde::float")] Decimal),
    /// Percentage in percent units (13% is `13`).
    Percentage(#[serde(with = "rust_decimal::serde::float")] Decimal),
}

impl TypedValue {
    /// Numeric payload of money, quantity and percentage values.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            TypedValue::Money(d) | TypedValue::Quantity(d) | TypedValue::Percentage(d) => Some(*d),
            TypedValue::Text(_) | TypedValue::Date(_) => None,
        }
    }

    /// String payload of text and date values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::Text(s) | TypedValue::Date(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value the way it would appear in a flat export.
    pub fn display(&self) -> String {
        match self {
            TypedValue::Text(s) | TypedValue::Date(s) => s.clone(),
            TypedValue::Money(d) => format!("{:.2}", d),
            TypedValue::Quantity(d) | TypedValue::Percentage(d) => d.normalize().to_string(),
        }
    }
}

/// One canonical field extracted from a provider payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedField {
    /// Canonical field name.
    pub canonical_key: CanonicalKey,

    /// Value exactly as the provider returned it.
    pub raw_value: String,

    /// Value after coercion.
    pub typed_value: TypedValue,

    /// Confidence in [0, 1].
    pub confidence: f64,

    /// Provider key the value came from.
    pub source_key: String,

    /// Set when the field was synthesized from other fields.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub derived: bool,
}

impl ExtractedField {
    /// A field counts as empty when the provider gave no value for it.
    pub fn is_blank(&self) -> bool {
        self.raw_value.trim().is_empty()
    }
}

/// One line of goods or services.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LineItem {
    /// Product or service description.
    pub goods_name: String,

    /// Specification / model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specification: Option<String>,

    /// Unit of measure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Quantity (defaults to 1).
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,

    /// Unit price.
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub unit_price: Option<Decimal>,

    /// Line amount before tax.
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,

    /// Tax rate in percent.
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub tax_rate: Option<Decimal>,

    /// Tax amount.
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub tax_amount: Option<Decimal>,

    /// Columns with no line item counterpart, keyed by canonical key.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<CanonicalKey, String>,
}

impl LineItem {
    /// Assemble a line item from coerced columns.
    pub fn from_columns(columns: BTreeMap<CanonicalKey, TypedValue>) -> Self {
        let mut item = LineItem {
            quantity: Decimal::ONE,
            ..LineItem::default()
        };

        for (key, value) in columns {
            match key.as_str() {
                "goods_name" => item.goods_name = value.display(),
                "specification" => item.specification = non_empty(value.display()),
                "unit" => item.unit = non_empty(value.display()),
                "quantity" => item.quantity = value.as_decimal().unwrap_or(Decimal::ONE),
                "unit_price" => item.unit_price = value.as_decimal(),
                "amount" => item.amount = value.as_decimal().unwrap_or_default(),
                "tax_rate" => item.tax_rate = value.as_decimal(),
                "tax_amount" => item.tax_amount = value.as_decimal(),
                _ => {
                    let text = value.display();
                    if !text.is_empty() {
                        item.extra.insert(key, text);
                    }
                }
            }
        }

        item
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// Which upstream extractor produced the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Cloud document-OCR key/value response.
    Ocr,
    /// LLM chat completion.
    Llm,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Ocr => f.write_str("OCR"),
            ProviderKind::Llm => f.write_str("LLM"),
        }
    }
}

/// Outcome of field validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    /// No missing required field and no error-level issue.
    pub is_valid: bool,

    /// Issues per field, warnings and errors alike.
    pub field_issues: BTreeMap<CanonicalKey, Vec<String>>,

    /// Required fields that are absent or blank.
    pub missing_required: Vec<CanonicalKey>,

    /// Percentage of expected fields that are present, 0 to 100.
    pub completeness_score: u8,

    /// Error-level findings, flattened for display.
    pub errors: Vec<String>,

    /// Warning-level findings, flattened for display.
    pub warnings: Vec<String>,
}

/// Confidence block of the serialized result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceSummary {
    /// Mean of the field confidences.
    pub overall: f64,

    /// Confidence per canonical field.
    pub fields: BTreeMap<CanonicalKey, f64>,

    /// Overall confidence self-reported by the provider, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_overall: Option<f64>,
}

/// The canonical, validated record produced for one payload.
///
/// Built once by the extraction engine and read through accessors only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalInvoiceResult {
    #[serde(rename = "invoice_type")]
    taxonomy: InvoiceTaxonomy,
    source: ProviderKind,
    fields: BTreeMap<CanonicalKey, ExtractedField>,
    confidence: ConfidenceSummary,
    validation: ValidationResult,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    line_items: Vec<LineItem>,
    processing_steps: Vec<String>,
}

impl CanonicalInvoiceResult {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        taxonomy: InvoiceTaxonomy,
        source: ProviderKind,
        fields: BTreeMap<CanonicalKey, ExtractedField>,
        overall_confidence: f64,
        provider_overall: Option<f64>,
        validation: ValidationResult,
        line_items: Vec<LineItem>,
        processing_steps: Vec<String>,
    ) -> Self {
        let confidence = ConfidenceSummary {
            overall: overall_confidence,
            fields: fields
                .iter()
                .map(|(key, field)| (key.clone(), field.confidence))
                .collect(),
            provider_overall,
        };

        Self {
            taxonomy,
            source,
            fields,
            confidence,
            validation,
            line_items,
            processing_steps,
        }
    }

    pub fn taxonomy(&self) -> InvoiceTaxonomy {
        self.taxonomy
    }

    pub fn source(&self) -> ProviderKind {
        self.source
    }

    pub fn fields(&self) -> &BTreeMap<CanonicalKey, ExtractedField> {
        &self.fields
    }

    /// Look up a field by canonical name.
    pub fn field(&self, key: &str) -> Option<&ExtractedField> {
        self.fields.get(key)
    }

    /// Typed value of a field by canonical name.
    pub fn value(&self, key: &str) -> Option<&TypedValue> {
        self.field(key).map(|f| &f.typed_value)
    }

    pub fn overall_confidence(&self) -> f64 {
        self.confidence.overall
    }

    pub fn confidence(&self) -> &ConfidenceSummary {
        &self.confidence
    }

    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn processing_steps(&self) -> &[String] {
        &self.processing_steps
    }
}
