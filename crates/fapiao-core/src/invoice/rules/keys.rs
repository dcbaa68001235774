//! Provider key to canonical key mapping.

use std::collections::HashMap;

use crate::models::invoice::CanonicalKey;

/// Built-in provider labels: Chinese OCR labels, camelCase OCR keys and
/// ticket-specific names.
const STANDARD_KEYS: &[(&str, &str)] = &[
    // VAT invoice header
    ("发票号码", "invoice_number"),
    ("发票号", "invoice_number"),
    ("invoiceNumber", "invoice_number"),
    ("invoiceNo", "invoice_number"),
    ("number", "invoice_number"),
    ("发票代码", "invoice_code"),
    ("invoiceCode", "invoice_code"),
    ("开票日期", "invoice_date"),
    ("填开日期", "invoice_date"),
    ("日期", "invoice_date"),
    ("invoiceDate", "invoice_date"),
    ("issueDate", "invoice_date"),
    ("date", "invoice_date"),
    ("校验码", "check_code"),
    ("checkCode", "check_code"),
    ("机器编号", "machine_code"),
    ("machineCode", "machine_code"),
    // Parties
    ("销售方名称", "seller_name"),
    ("销售方", "seller_name"),
    ("销方名称", "seller_name"),
    ("sellerName", "seller_name"),
    ("销售方纳税人识别号", "seller_tax_number"),
    ("销售方统一社会信用代码/纳税人识别号", "seller_tax_number"),
    ("销售方识别号", "seller_tax_number"),
    ("sellerTaxNumber", "seller_tax_number"),
    ("sellerTaxId", "seller_tax_number"),
    ("销售方地址电话", "seller_address"),
    ("销售方地址、电话", "seller_address"),
    ("sellerContactInfo", "seller_address"),
    ("销售方开户行及账号", "seller_bank_account"),
    ("sellerBankAccountInfo", "seller_bank_account"),
    ("购买方名称", "buyer_name"),
    ("购买方", "buyer_name"),
    ("购方名称", "buyer_name"),
    ("purchaserName", "buyer_name"),
    ("buyerName", "buyer_name"),
    ("购买方纳税人识别号", "buyer_tax_number"),
    ("购买方统一社会信用代码/纳税人识别号", "buyer_tax_number"),
    ("购买方识别号", "buyer_tax_number"),
    ("purchaserTaxNumber", "buyer_tax_number"),
    ("buyerTaxNumber", "buyer_tax_number"),
    ("buyerTaxId", "buyer_tax_number"),
    ("购买方地址电话", "buyer_address"),
    ("购买方地址、电话", "buyer_address"),
    ("purchaserContactInfo", "buyer_address"),
    ("购买方开户行及账号", "buyer_bank_account"),
    ("purchaserBankAccountInfo", "buyer_bank_account"),
    // Totals
    ("价税合计(小写)", "total_amount"),
    ("价税合计小写", "total_amount"),
    ("小写", "total_amount"),
    ("totalAmount", "total_amount"),
    ("total", "total_amount"),
    ("合计", "total_amount"),
    ("实收金额", "total_amount"),
    ("总金额", "total_amount"),
    ("价税合计(大写)", "total_amount_chinese"),
    ("价税合计大写", "total_amount_chinese"),
    ("价税合计", "total_amount_chinese"),
    ("大写", "total_amount_chinese"),
    ("totalAmountInWords", "total_amount_chinese"),
    ("合计金额", "amount"),
    ("金额合计", "amount"),
    ("金额", "amount"),
    ("不含税金额", "amount"),
    ("invoiceAmountPreTax", "amount"),
    ("amountPreTax", "amount"),
    ("合计税额", "tax_amount"),
    ("税额", "tax_amount"),
    ("invoiceTax", "tax_amount"),
    ("taxAmount", "tax_amount"),
    ("tax", "tax_amount"),
    ("税率", "tax_rate"),
    ("征收率", "tax_rate"),
    ("taxRate", "tax_rate"),
    ("备注", "remarks"),
    ("remarks", "remarks"),
    ("收款人", "payee"),
    ("recipient", "payee"),
    ("复核", "reviewer"),
    ("复核人", "reviewer"),
    ("reviewer", "reviewer"),
    ("开票人", "drawer"),
    ("drawer", "drawer"),
    // Line item columns
    ("货物或应税劳务、服务名称", "goods_name"),
    ("货物或应税劳务名称", "goods_name"),
    ("项目名称", "goods_name"),
    ("itemName", "goods_name"),
    ("goodsName", "goods_name"),
    ("规格型号", "specification"),
    ("specification", "specification"),
    ("单位", "unit"),
    ("unit", "unit"),
    ("数量", "quantity"),
    ("quantity", "quantity"),
    ("单价", "unit_price"),
    ("unitPrice", "unit_price"),
    // Passenger tickets
    ("ticketNumber", "invoice_number"),
    ("电子客票号", "invoice_number"),
    ("电子客票号码", "invoice_number"),
    ("票号", "invoice_number"),
    ("ticketCode", "invoice_code"),
    ("乘车人", "passenger_name"),
    ("旅客姓名", "passenger_name"),
    ("乘客姓名", "passenger_name"),
    ("passengerName", "passenger_name"),
    ("身份证号", "id_number"),
    ("有效身份证件号码", "id_number"),
    ("passengerInfo", "id_number"),
    ("idNumber", "id_number"),
    ("出发站", "departure_station"),
    ("始发站", "departure_station"),
    ("起点", "departure_station"),
    ("departureStation", "departure_station"),
    ("到达站", "arrival_station"),
    ("终点", "arrival_station"),
    ("arrivalStation", "arrival_station"),
    ("开车时间", "departure_time"),
    ("出发时间", "departure_time"),
    ("乘车时间", "departure_time"),
    ("departureTime", "departure_time"),
    ("乘车日期", "departure_date"),
    ("出发日期", "departure_date"),
    ("departureDate", "departure_date"),
    ("票价", "fare"),
    ("fare", "fare"),
    ("ticketPrice", "fare"),
    ("车次", "train_number"),
    ("trainNumber", "train_number"),
    ("座位类型", "seat_class"),
    ("席别", "seat_class"),
    ("seatType", "seat_class"),
    ("seatClass", "seat_class"),
    ("座位号", "seat_number"),
    ("座号", "seat_number"),
    ("seatNumber", "seat_number"),
    ("航班号", "flight_number"),
    ("flightNumber", "flight_number"),
    ("承运人", "carrier"),
    ("carrier", "carrier"),
    ("座位等级", "cabin_class"),
    ("舱位等级", "cabin_class"),
    ("cabinClass", "cabin_class"),
    ("燃油附加费", "fuel_surcharge"),
    ("fuelSurcharge", "fuel_surcharge"),
    ("民航发展基金", "civil_aviation_fund"),
    ("caacDevelopmentFund", "civil_aviation_fund"),
    ("保险费", "insurance"),
    ("insurance", "insurance"),
    ("印刷序号", "serial_number"),
    ("serialNumber", "serial_number"),
    // Taxi receipts
    ("车号", "license_plate"),
    ("车牌号", "license_plate"),
    ("licensePlateNumber", "license_plate"),
    ("licensePlate", "license_plate"),
    ("乘车日期时间", "ride_date"),
    ("rideDate", "ride_date"),
    ("上车", "pickup_time"),
    ("上车时间", "pickup_time"),
    ("pickUpTime", "pickup_time"),
    ("下车", "dropoff_time"),
    ("下车时间", "dropoff_time"),
    ("dropOffTime", "dropoff_time"),
    ("里程", "mileage"),
    ("mileage", "mileage"),
    // Hotel receipts
    ("酒店名称", "hotel_name"),
    ("宾馆名称", "hotel_name"),
    ("hotelName", "hotel_name"),
    ("入住日期", "check_in_date"),
    ("checkInDate", "check_in_date"),
    ("离店日期", "check_out_date"),
    ("退房日期", "check_out_date"),
    ("checkOutDate", "check_out_date"),
    ("房号", "room_number"),
    ("房间号", "room_number"),
    ("roomNumber", "room_number"),
    ("房型", "room_type"),
    ("roomType", "room_type"),
    ("天数", "nights"),
    ("间夜", "nights"),
    ("nights", "nights"),
];

/// Static lookup table from provider labels to canonical keys.
#[derive(Debug, Clone, Default)]
pub struct KeyTable {
    /// Normalized label -> key.
    exact: HashMap<String, CanonicalKey>,
    /// Case/separator-folded label -> key.
    folded: HashMap<String, CanonicalKey>,
    /// CJK labels, longest first, for containment matching.
    contained: Vec<(String, CanonicalKey)>,
}

impl KeyTable {
    /// An empty table. Every key falls through to the default mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table: the canonical vocabulary plus all known
    /// provider labels.
    pub fn standard() -> Self {
        let mut table = Self::new();
        for key in CanonicalKey::vocabulary() {
            table.insert(key.as_str().to_string(), key);
        }
        for (label, key) in STANDARD_KEYS {
            table.insert(*label, CanonicalKey::from_static(*key));
        }
        table
    }

    /// Built-in label pairs, for inspection and tests.
    pub fn standard_entries() -> &'static [(&'static str, &'static str)] {
        STANDARD_KEYS
    }

    /// Add or replace a label mapping.
    pub fn insert(&mut self, label: impl AsRef<str>, key: CanonicalKey) {
        let normalized = normalize_label(label.as_ref());
        if normalized.is_empty() {
            return;
        }

        self.folded.insert(fold_label(&normalized), key.clone());

        if normalized.chars().count() >= 2 && !normalized.is_ascii() {
            self.contained.retain(|(existing, _)| existing != &normalized);
            self.contained.push((normalized.clone(), key.clone()));
            self.contained.sort_by(|(a, _), (b, _)| {
                b.chars().count().cmp(&a.chars().count()).then_with(|| a.cmp(b))
            });
        }

        self.exact.insert(normalized, key);
    }

    /// Look up a label without falling back to the default mapping.
    ///
    /// Containment prefers the longest known label; labels of equal length
    /// are tried in code point order.
    pub fn lookup(&self, label: &str) -> Option<&CanonicalKey> {
        let normalized = normalize_label(label);
        if normalized.is_empty() {
            return None;
        }

        if let Some(key) = self.exact.get(&normalized) {
            return Some(key);
        }

        if let Some(key) = self.folded.get(&fold_label(&normalized)) {
            return Some(key);
        }

        self.contained
            .iter()
            .find(|(label, _)| normalized.contains(label.as_str()))
            .map(|(_, key)| key)
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

/// Maps provider keys onto the canonical vocabulary.
#[derive(Debug, Clone, Copy)]
pub struct KeyMapper<'a> {
    table: &'a KeyTable,
}

impl<'a> KeyMapper<'a> {
    pub fn new(table: &'a KeyTable) -> Self {
        Self { table }
    }

    /// Map a provider key. Never fails; unknown keys get [`default_key`].
    pub fn map(&self, source_key: &str) -> CanonicalKey {
        self.table
            .lookup(source_key)
            .cloned()
            .unwrap_or_else(|| default_key(source_key))
    }

    /// Whether the key is known to the table.
    pub fn is_mapped(&self, source_key: &str) -> bool {
        self.table.lookup(source_key).is_some()
    }
}

/// Deterministic fallback for unmapped keys: trimmed, lower-cased,
/// whitespace runs replaced by `_`.
pub fn default_key(source_key: &str) -> CanonicalKey {
    let key = source_key
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_");

    if key.is_empty() {
        CanonicalKey::from_static("unknown_field")
    } else {
        CanonicalKey::new(key)
    }
}

/// Trim, unify full-width punctuation and drop trailing colons.
fn normalize_label(label: &str) -> String {
    let unified: String = label
        .trim()
        .chars()
        .map(|c| match c {
            '（' => '(',
            '）' => ')',
            '：' => ':',
            '　' => ' ',
            other => other,
        })
        .collect();

    unified
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_string()
}

/// Case and separator insensitive form: `Invoice Number`, `invoice_number`
/// and `invoiceNumber` all fold to `invoicenumber`.
fn fold_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_every_standard_label_maps_to_its_key() {
        let table = KeyTable::standard();
        let mapper = KeyMapper::new(&table);

        for (label, key) in KeyTable::standard_entries() {
            assert_eq!(mapper.map(label).as_str(), *key, "label {}", label);
        }
    }

    #[test]
    fn test_standard_targets_are_vocabulary() {
        for (label, key) in KeyTable::standard_entries() {
            assert!(
                CanonicalKey::from_static(*key).is_vocabulary(),
                "{} maps outside the vocabulary ({})",
                label,
                key
            );
        }
    }

    #[test]
    fn test_canonical_keys_map_to_themselves() {
        let table = KeyTable::standard();
        let mapper = KeyMapper::new(&table);

        for key in CanonicalKey::vocabulary() {
            assert_eq!(mapper.map(key.as_str()), key);
        }
    }

    #[test]
    fn test_label_variants() {
        let table = KeyTable::standard();
        let mapper = KeyMapper::new(&table);

        assert_eq!(mapper.map("价税合计（小写）"), CanonicalKey::TOTAL_AMOUNT);
        assert_eq!(mapper.map(" 发票号码： "), CanonicalKey::INVOICE_NUMBER);
        assert_eq!(mapper.map("Invoice Number"), CanonicalKey::INVOICE_NUMBER);
        assert_eq!(mapper.map("INVOICE_DATE"), CanonicalKey::INVOICE_DATE);
        assert_eq!(mapper.map("ticketNumber"), CanonicalKey::INVOICE_NUMBER);
    }

    #[test]
    fn test_containment_prefers_longest_label() {
        let table = KeyTable::standard();
        let mapper = KeyMapper::new(&table);

        assert_eq!(mapper.map("价税合计(小写)¥"), CanonicalKey::TOTAL_AMOUNT);
        assert_eq!(mapper.map("单价(元)"), CanonicalKey::UNIT_PRICE);
        assert_eq!(mapper.map("销售方纳税人识别号码"), CanonicalKey::SELLER_TAX_NUMBER);
        assert_eq!(mapper.map("金额合计"), CanonicalKey::AMOUNT);
        assert_eq!(mapper.map("金额合计(元)"), CanonicalKey::AMOUNT);
    }

    #[test]
    fn test_containment_ties_follow_code_point_order() {
        let mut table = KeyTable::new();
        table.insert("金额", CanonicalKey::AMOUNT);
        table.insert("合计", CanonicalKey::TOTAL_AMOUNT);

        // 合 (U+5408) sorts before 金 (U+91D1)
        assert_eq!(table.lookup("本页金额合计"), Some(&CanonicalKey::TOTAL_AMOUNT));
    }

    #[test]
    fn test_unmapped_keys_use_default() {
        let table = KeyTable::standard();
        let mapper = KeyMapper::new(&table);

        assert_eq!(mapper.map("Discount  Code"), CanonicalKey::new("discount_code"));
        assert_eq!(mapper.map("discountCode"), CanonicalKey::new("discountcode"));
        assert_eq!(mapper.map("   "), CanonicalKey::new("unknown_field"));
        assert!(!mapper.is_mapped("Discount Code"));

        // deterministic and stable on its own output
        let once = mapper.map("Loyalty Points");
        assert_eq!(mapper.map("Loyalty Points"), once);
        assert_eq!(mapper.map(once.as_str()), once);
    }

    #[test]
    fn test_empty_table_maps_everything_by_default() {
        let table = KeyTable::new();
        let mapper = KeyMapper::new(&table);

        assert_eq!(mapper.map("发票号码"), CanonicalKey::new("发票号码"));
        assert_eq!(mapper.map("Invoice Number"), CanonicalKey::new("invoice_number"));
    }

    #[test]
    fn test_insert_overrides() {
        let mut table = KeyTable::standard();
        table.insert("开票时间", CanonicalKey::INVOICE_DATE);
        table.insert("日期", CanonicalKey::RIDE_DATE);

        let mapper = KeyMapper::new(&table);
        assert_eq!(mapper.map("开票时间"), CanonicalKey::INVOICE_DATE);
        assert_eq!(mapper.map("日期"), CanonicalKey::RIDE_DATE);
    }
}
