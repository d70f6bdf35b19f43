pub mod category;
pub mod range;

pub use category::{Category, CategoryFilter};
pub use range::DateRange;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ── Raw listing row ───────────────────────────────────────────────────────────

/// One item of the `list` array returned by `getPriceData.html`.
/// Prices arrive as strings most days but occasionally as numbers; any text
/// field may also come back as a bare number.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPriceRow {
    #[serde(default, deserialize_with = "lenient_text")]
    pub prod_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub prod_cat: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub prod_pcat: Option<String>,
    #[serde(default)]
    pub low_price: Option<Value>,
    #[serde(default)]
    pub avg_price: Option<Value>,
    #[serde(default)]
    pub high_price: Option<Value>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub spec_info: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub place: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub unit_info: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub pub_date: Option<String>,
}

/// Strings as-is, numbers and booleans as their text, anything else as absent.
fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

// ── Normalized record ─────────────────────────────────────────────────────────

/// Column order of every export: the field order below.
pub const COLUMNS: [&str; 10] = [
    "一级分类", "二级分类", "品名", "最低价", "平均价", "最高价", "规格", "产地", "单位", "发布日期",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    #[serde(rename = "一级分类")]
    pub primary_category: String,
    #[serde(rename = "二级分类")]
    pub secondary_category: Option<String>,
    #[serde(rename = "品名")]
    pub product_name: String,
    #[serde(rename = "最低价")]
    pub min_price: Decimal,
    #[serde(rename = "平均价")]
    pub avg_price: Decimal,
    #[serde(rename = "最高价")]
    pub max_price: Decimal,
    #[serde(rename = "规格")]
    pub spec: Option<String>,
    #[serde(rename = "产地")]
    pub origin: String,
    #[serde(rename = "单位")]
    pub unit: String,
    #[serde(rename = "发布日期")]
    pub publish_date: NaiveDate,
}

// ── Table ─────────────────────────────────────────────────────────────────────

/// Records of one run in fetch order (date ascending, then page order).
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    range: DateRange,
    records: Vec<PriceRecord>,
}

impl PriceTable {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            records: Vec::new(),
        }
    }

    pub fn from_records(range: DateRange, records: Vec<PriceRecord>) -> Self {
        Self { range, records }
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    pub fn records(&self) -> &[PriceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = PriceRecord>) {
        self.records.extend(records);
    }
}

// ── Remote document ───────────────────────────────────────────────────────────

/// A spreadsheet created in Feishu by one sync call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub title: String,
    pub identifier: String,
    pub parent_folder: Option<String>,
    pub url: Option<String>,
}
