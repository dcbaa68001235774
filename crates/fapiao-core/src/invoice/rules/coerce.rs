//! Raw string to typed value coercion.
//!
//! Coercion never fails: a value that cannot be parsed becomes the
//! documented default of its kind (dates keep the original string).

use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use super::patterns::{DATE_COMPACT, DATE_SEPARATOR_RUN, DATE_YMD, WHITESPACE_RUN};
use crate::models::invoice::{CanonicalKey, TypedValue};

/// How a field's raw string is turned into a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoercionKind {
    /// ISO date; default is the empty string.
    Date,
    /// Two-decimal amount; default `0`.
    Money,
    /// Count or measure with a per-field default.
    Quantity { default: QuantityDefault },
    /// Percent units; default `0`.
    Percentage,
    /// Normalized free text; default is the empty string.
    Text,
}

/// Default of a quantity field. A multiplier such as `quantity` defaults to
/// one, an additive measure such as `mileage` to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityDefault {
    One,
    Zero,
}

impl QuantityDefault {
    pub fn value(self) -> Decimal {
        match self {
            QuantityDefault::One => Decimal::ONE,
            QuantityDefault::Zero => Decimal::ZERO,
        }
    }
}

impl CoercionKind {
    /// The value an empty input coerces to.
    pub fn default_value(&self) -> TypedValue {
        match self {
            CoercionKind::Date => TypedValue::Date(String::new()),
            CoercionKind::Money => TypedValue::Money(Decimal::ZERO),
            CoercionKind::Quantity { default } => TypedValue::Quantity(default.value()),
            CoercionKind::Percentage => TypedValue::Percentage(Decimal::ZERO),
            CoercionKind::Text => TypedValue::Text(String::new()),
        }
    }
}

/// Non-text coercions of the built-in vocabulary. Everything else is text.
const STANDARD_KINDS: &[(&str, CoercionKind)] = &[
    ("invoice_date", CoercionKind::Date),
    ("departure_date", CoercionKind::Date),
    ("ride_date", CoercionKind::Date),
    ("check_in_date", CoercionKind::Date),
    ("check_out_date", CoercionKind::Date),
    ("total_amount", CoercionKind::Money),
    ("amount", CoercionKind::Money),
    ("tax_amount", CoercionKind::Money),
    ("unit_price", CoercionKind::Money),
    ("fare", CoercionKind::Money),
    ("fuel_surcharge", CoercionKind::Money),
    ("civil_aviation_fund", CoercionKind::Money),
    ("insurance", CoercionKind::Money),
    ("quantity", CoercionKind::Quantity { default: QuantityDefault::One }),
    ("nights", CoercionKind::Quantity { default: QuantityDefault::One }),
    ("mileage", CoercionKind::Quantity { default: QuantityDefault::Zero }),
    ("tax_rate", CoercionKind::Percentage),
];

/// Canonical key to coercion kind.
#[derive(Debug, Clone, Default)]
pub struct CoercionTable {
    kinds: HashMap<CanonicalKey, CoercionKind>,
}

impl CoercionTable {
    /// An empty table: every field is text.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut table = Self::new();
        for (key, kind) in STANDARD_KINDS {
            table.insert(CanonicalKey::from_static(*key), *kind);
        }
        table
    }

    pub fn insert(&mut self, key: CanonicalKey, kind: CoercionKind) {
        self.kinds.insert(key, kind);
    }

    /// Kind of a field; unknown fields are text.
    pub fn kind_of(&self, key: &CanonicalKey) -> CoercionKind {
        self.kinds.get(key).copied().unwrap_or(CoercionKind::Text)
    }
}

/// A coerced value plus whether a non-empty input fell back to its default.
#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub value: TypedValue,
    pub anomaly: bool,
}

/// Converts raw strings into typed values according to a [`CoercionTable`].
#[derive(Debug, Clone, Copy)]
pub struct TypeCoercer<'a> {
    table: &'a CoercionTable,
}

impl<'a> TypeCoercer<'a> {
    pub fn new(table: &'a CoercionTable) -> Self {
        Self { table }
    }

    pub fn kind_of(&self, key: &CanonicalKey) -> CoercionKind {
        self.table.kind_of(key)
    }

    /// Coerce a raw value for a field.
    pub fn coerce(&self, key: &CanonicalKey, raw: &str) -> TypedValue {
        self.coerce_checked(key, raw).value
    }

    /// Coerce and report whether the input could not be parsed.
    pub fn coerce_checked(&self, key: &CanonicalKey, raw: &str) -> Coerced {
        let kind = self.table.kind_of(key);
        if raw.trim().is_empty() {
            return Coerced {
                value: kind.default_value(),
                anomaly: false,
            };
        }

        match kind {
            CoercionKind::Date => match coerce_date(raw) {
                Some(date) => Coerced {
                    value: TypedValue::Date(date),
                    anomaly: false,
                },
                None => Coerced {
                    value: TypedValue::Date(raw.to_string()),
                    anomaly: true,
                },
            },
            CoercionKind::Money => numeric(parse_money(raw), TypedValue::Money, Decimal::ZERO),
            CoercionKind::Quantity { default } => {
                numeric(parse_number(raw), TypedValue::Quantity, default.value())
            }
            CoercionKind::Percentage => {
                numeric(parse_percentage(raw), TypedValue::Percentage, Decimal::ZERO)
            }
            CoercionKind::Text => Coerced {
                value: TypedValue::Text(normalize_text(raw)),
                anomaly: false,
            },
        }
    }
}

fn numeric(parsed: Option<Decimal>, wrap: fn(Decimal) -> TypedValue, default: Decimal) -> Coerced {
    match parsed {
        Some(value) => Coerced {
            value: wrap(value),
            anomaly: false,
        },
        None => Coerced {
            value: wrap(default),
            anomaly: true,
        },
    }
}

/// Normalize a date to `YYYY-MM-DD`. Returns `None` when it cannot be parsed.
///
/// Chinese glyphs are handled (`2025年03月11日`), as are `/`, `\` and `.`
/// separators, single-digit months and days, a trailing time part and the
/// compact `20250311` form.
pub fn coerce_date(raw: &str) -> Option<String> {
    let mut replaced = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        match c {
            '年' | '月' | '/' | '\\' | '.' | '／' | '－' | '—' => replaced.push('-'),
            '日' | '号' => replaced.push(' '),
            _ => replaced.push(c),
        }
    }

    let collapsed = DATE_SEPARATOR_RUN.replace_all(replaced.trim(), "-");
    let normalized = collapsed.trim_matches(|c: char| c == '-' || c.is_whitespace());

    let date = if let Some(caps) = DATE_YMD.captures(normalized) {
        ymd(&caps[1], &caps[2], &caps[3])
    } else if let Some(caps) = DATE_COMPACT.captures(normalized) {
        ymd(&caps[1], &caps[2], &caps[3])
    } else {
        parse_written_date(raw.trim())
    };

    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// English dates such as `Mar 11, 2025` or `11 March 2025`.
fn parse_written_date(s: &str) -> Option<NaiveDate> {
    const FORMATS: &[&str] = &["%b %d, %Y", "%B %d, %Y", "%d %b %Y", "%d %B %Y", "%Y%m%d"];
    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
}

/// Keep digits and `.` only, parse, round half away from zero to cents.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    parse_number(raw).map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Keep digits and `.` only and parse. Full-width digits are accepted.
pub fn parse_number(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter_map(|c| match c {
            '０'..='９' => char::from_digit(c as u32 - '０' as u32, 10),
            '．' => Some('.'),
            c if c.is_ascii_digit() || c == '.' => Some(c),
            _ => None,
        })
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    Decimal::from_str(&cleaned).ok()
}

/// Strip `%`/`％` and everything but digits and `.`.
pub fn parse_percentage(raw: &str) -> Option<Decimal> {
    parse_number(&raw.replace(['%', '％'], ""))
}

/// Trim, collapse whitespace runs and straighten curly quotes.
pub fn normalize_text(raw: &str) -> String {
    WHITESPACE_RUN
        .replace_all(raw.trim(), " ")
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{FF02}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{FF07}' => '\'',
            other => other,
        })
        .collect()
}
