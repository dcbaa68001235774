//! Invoice taxonomy classification.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::models::invoice::InvoiceTaxonomy;

/// Provider document type codes.
const STANDARD_CODES: &[(&str, InvoiceTaxonomy)] = &[
    ("VATInvoice", InvoiceTaxonomy::VatInvoice),
    ("SpecialVATInvoice", InvoiceTaxonomy::VatInvoice),
    ("VATCommonInvoice", InvoiceTaxonomy::VatInvoice),
    ("VATElectronicInvoice", InvoiceTaxonomy::VatInvoice),
    ("VATElectronicSpecialInvoice", InvoiceTaxonomy::VatInvoice),
    ("VATRollInvoice", InvoiceTaxonomy::VatInvoice),
    ("ElectronicInvoice", InvoiceTaxonomy::VatInvoice),
    ("TrainTicket", InvoiceTaxonomy::TrainTicket),
    ("ElectronicTrainTicket", InvoiceTaxonomy::TrainTicket),
    ("AirItinerary", InvoiceTaxonomy::FlightTicket),
    ("AirTicket", InvoiceTaxonomy::FlightTicket),
    ("FlightItinerary", InvoiceTaxonomy::FlightTicket),
    ("TaxiTicket", InvoiceTaxonomy::TaxiTicket),
    ("TaxiReceipt", InvoiceTaxonomy::TaxiTicket),
    ("BusShipTicket", InvoiceTaxonomy::BusTicket),
    ("BusTicket", InvoiceTaxonomy::BusTicket),
    ("ShipTicket", InvoiceTaxonomy::BusTicket),
    ("HotelReceipt", InvoiceTaxonomy::HotelReceipt),
    ("HotelInvoice", InvoiceTaxonomy::HotelReceipt),
    ("QuotaInvoice", InvoiceTaxonomy::GeneralInvoice),
    ("GeneralMachineInvoice", InvoiceTaxonomy::GeneralInvoice),
    ("TollInvoice", InvoiceTaxonomy::GeneralInvoice),
    ("NonTaxIncomeInvoice", InvoiceTaxonomy::GeneralInvoice),
    ("Others", InvoiceTaxonomy::GeneralInvoice),
];

/// Keyword sets in tie-break order.
const STANDARD_KEYWORDS: &[(InvoiceTaxonomy, &[&str])] = &[
    (
        InvoiceTaxonomy::TrainTicket,
        &["车次", "站台", "铁路", "12306", "检票", "二等座", "一等座", "商务座", "动车", "高铁"],
    ),
    (
        InvoiceTaxonomy::FlightTicket,
        &["航班", "机场", "航空", "登机", "航程", "行程单", "民航发展基金", "燃油附加费", "舱位"],
    ),
    (
        InvoiceTaxonomy::TaxiTicket,
        &["出租车", "出租汽车", "的士", "里程", "车号", "上车", "下车", "等候"],
    ),
    (
        InvoiceTaxonomy::BusTicket,
        &["客运", "汽车站", "汽车票", "客车", "班次", "长途", "船票"],
    ),
    (
        InvoiceTaxonomy::HotelReceipt,
        &["酒店", "宾馆", "住宿", "入住", "离店", "退房", "房号", "客房", "间夜"],
    ),
];

const STANDARD_VAT_MARKERS: &[&str] = &["增值税", "发票代码", "税额"];

/// Lookup data for [`InvoiceClassifier`].
#[derive(Debug, Clone, Default)]
pub struct ClassifierTable {
    codes: HashMap<String, InvoiceTaxonomy>,
    keywords: Vec<(InvoiceTaxonomy, Vec<String>)>,
    vat_markers: Vec<String>,
}

impl ClassifierTable {
    /// An empty table: everything classifies as a general invoice.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut table = Self::new();
        for taxonomy in InvoiceTaxonomy::ALL {
            table.insert_code(taxonomy.as_str(), taxonomy);
        }
        for (code, taxonomy) in STANDARD_CODES {
            table.insert_code(code, *taxonomy);
        }
        for (taxonomy, words) in STANDARD_KEYWORDS {
            table.add_keywords(*taxonomy, words.iter().copied());
        }
        table.vat_markers = STANDARD_VAT_MARKERS.iter().map(|m| m.to_string()).collect();
        table
    }

    /// Register a provider type code. Codes compare case-insensitively.
    pub fn insert_code(&mut self, code: &str, taxonomy: InvoiceTaxonomy) {
        self.codes.insert(fold_code(code), taxonomy);
    }

    /// Append keywords for a taxonomy. Taxonomies added first win ties.
    pub fn add_keywords<'k>(
        &mut self,
        taxonomy: InvoiceTaxonomy,
        words: impl IntoIterator<Item = &'k str>,
    ) {
        let words = words.into_iter().map(str::to_lowercase);
        match self.keywords.iter_mut().find(|(t, _)| *t == taxonomy) {
            Some((_, existing)) => existing.extend(words),
            None => self.keywords.push((taxonomy, words.collect())),
        }
    }

    pub fn code(&self, code: &str) -> Option<InvoiceTaxonomy> {
        self.codes.get(&fold_code(code)).copied()
    }
}

fn fold_code(code: &str) -> String {
    code.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Which rule decided the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ClassificationMethod {
    /// Supplied by the caller.
    Hint,
    /// Provider type code.
    ProviderCode { code: String },
    /// Keyword scoring.
    Keywords { hits: usize },
    /// VAT markers in the text.
    VatMarkers,
    /// Nothing matched.
    Fallback,
}

impl fmt::Display for ClassificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationMethod::Hint => f.write_str("caller hint"),
            ClassificationMethod::ProviderCode { code } => write!(f, "provider code {}", code),
            ClassificationMethod::Keywords { hits } => write!(f, "{} keyword hits", hits),
            ClassificationMethod::VatMarkers => f.write_str("VAT markers"),
            ClassificationMethod::Fallback => f.write_str("fallback"),
        }
    }
}

/// A taxonomy together with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub taxonomy: InvoiceTaxonomy,
    #[serde(flatten)]
    pub method: ClassificationMethod,
}

/// Decides the taxonomy of a payload.
#[derive(Debug, Clone, Copy)]
pub struct InvoiceClassifier<'a> {
    table: &'a ClassifierTable,
}

impl<'a> InvoiceClassifier<'a> {
    pub fn new(table: &'a ClassifierTable) -> Self {
        Self { table }
    }

    /// Classify from an optional provider type code and free text.
    pub fn classify(&self, type_code: Option<&str>, text: &str) -> InvoiceTaxonomy {
        self.classify_detailed(None, type_code, text).taxonomy
    }

    /// Classify and report which rule decided. Precedence: caller hint,
    /// provider code, keyword scoring, VAT markers, general fallback.
    pub fn classify_detailed(
        &self,
        hint: Option<InvoiceTaxonomy>,
        type_code: Option<&str>,
        text: &str,
    ) -> Classification {
        if let Some(taxonomy) = hint {
            return Classification {
                taxonomy,
                method: ClassificationMethod::Hint,
            };
        }

        if let Some(code) = type_code.map(str::trim).filter(|c| !c.is_empty()) {
            if let Some(taxonomy) = self.table.code(code) {
                return Classification {
                    taxonomy,
                    method: ClassificationMethod::ProviderCode {
                        code: code.to_string(),
                    },
                };
            }
        }

        let text = text.to_lowercase();

        let mut best: Option<(InvoiceTaxonomy, usize)> = None;
        for (taxonomy, words) in &self.table.keywords {
            let hits = words.iter().filter(|w| text.contains(w.as_str())).count();
            if hits > best.map_or(0, |(_, h)| h) {
                best = Some((*taxonomy, hits));
            }
        }
        if let Some((taxonomy, hits)) = best {
            return Classification {
                taxonomy,
                method: ClassificationMethod::Keywords { hits },
            };
        }

        if self.table.vat_markers.iter().any(|m| text.contains(m.as_str())) {
            return Classification {
                taxonomy: InvoiceTaxonomy::VatInvoice,
                method: ClassificationMethod::VatMarkers,
            };
        }

        Classification {
            taxonomy: InvoiceTaxonomy::GeneralInvoice,
            method: ClassificationMethod::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classify(type_code: Option<&str>, text: &str) -> InvoiceTaxonomy {
        let table = ClassifierTable::standard();
        InvoiceClassifier::new(&table).classify(type_code, text)
    }

    #[test]
    fn test_provider_codes() {
        assert_eq!(classify(Some("VATInvoice"), ""), InvoiceTaxonomy::VatInvoice);
        assert_eq!(classify(Some("SpecialVATInvoice"), ""), InvoiceTaxonomy::VatInvoice);
        assert_eq!(classify(Some("TrainTicket"), ""), InvoiceTaxonomy::TrainTicket);
        assert_eq!(classify(Some("AirItinerary"), ""), InvoiceTaxonomy::FlightTicket);
        assert_eq!(classify(Some("BusShipTicket"), ""), InvoiceTaxonomy::BusTicket);
        assert_eq!(classify(Some("QuotaInvoice"), ""), InvoiceTaxonomy::GeneralInvoice);
        assert_eq!(classify(Some("hotel_receipt"), ""), InvoiceTaxonomy::HotelReceipt);
        assert_eq!(classify(Some("taxi-ticket"), ""), InvoiceTaxonomy::TaxiTicket);
    }

    #[test]
    fn test_code_beats_keywords() {
        assert_eq!(
            classify(Some("VATInvoice"), "酒店 住宿 入住"),
            InvoiceTaxonomy::VatInvoice
        );
    }

    #[test]
    fn test_unknown_code_falls_through_to_keywords() {
        assert_eq!(
            classify(Some("MysteryDoc"), "G1234 车次 二等座 检票口"),
            InvoiceTaxonomy::TrainTicket
        );
    }

    #[test]
    fn test_keyword_scoring() {
        assert_eq!(classify(None, "CA1234 航班 首都机场 登机口"), InvoiceTaxonomy::FlightTicket);
        assert_eq!(classify(None, "出租车 上车 下车 里程 3.2km"), InvoiceTaxonomy::TaxiTicket);
        assert_eq!(classify(None, "长沙汽车站 客运 班次"), InvoiceTaxonomy::BusTicket);
        assert_eq!(classify(None, "某某酒店 入住 离店 房号"), InvoiceTaxonomy::HotelReceipt);
        // Most hits wins over table order
        assert_eq!(classify(None, "铁路 酒店 入住 离店"), InvoiceTaxonomy::HotelReceipt);
    }

    #[test]
    fn test_ties_follow_table_order() {
        assert_eq!(classify(None, "车次 航班"), InvoiceTaxonomy::TrainTicket);
        assert_eq!(classify(None, "酒店 的士"), InvoiceTaxonomy::TaxiTicket);
    }

    #[test]
    fn test_vat_markers_and_fallback() {
        assert_eq!(classify(None, "增值税电子普通发票 发票代码"), InvoiceTaxonomy::VatInvoice);
        assert_eq!(classify(None, "收据"), InvoiceTaxonomy::GeneralInvoice);
        assert_eq!(classify(None, ""), InvoiceTaxonomy::GeneralInvoice);
    }

    #[test]
    fn test_hint_wins() {
        let table = ClassifierTable::standard();
        let classification = InvoiceClassifier::new(&table).classify_detailed(
            Some(InvoiceTaxonomy::HotelReceipt),
            Some("TrainTicket"),
            "车次",
        );
        assert_eq!(classification.taxonomy, InvoiceTaxonomy::HotelReceipt);
        assert_eq!(classification.method, ClassificationMethod::Hint);
    }

    #[test]
    fn test_detailed_reports_method() {
        let table = ClassifierTable::standard();
        let classifier = InvoiceClassifier::new(&table);

        let c = classifier.classify_detailed(None, Some("TrainTicket"), "");
        assert_eq!(
            c.method,
            ClassificationMethod::ProviderCode {
                code: "TrainTicket".to_string()
            }
        );

        let c = classifier.classify_detailed(None, None, "车次 站台");
        assert_eq!(c.method, ClassificationMethod::Keywords { hits: 2 });
    }

    #[test]
    fn test_custom_keywords() {
        let mut table = ClassifierTable::new();
        table.add_keywords(InvoiceTaxonomy::BusTicket, ["ferry"]);
        let classifier = InvoiceClassifier::new(&table);
        assert_eq!(classifier.classify(None, "FERRY terminal"), InvoiceTaxonomy::BusTicket);
        assert_eq!(classifier.classify(Some("VATInvoice"), ""), InvoiceTaxonomy::GeneralInvoice);
    }
}
