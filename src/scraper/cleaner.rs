use crate::models::{CategoryFilter, PriceRecord, RawPriceRow};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ── Skip reasons ──────────────────────────────────────────────────────────────

/// Why a raw row did not become a `PriceRecord`. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipRecord {
    MissingField(&'static str),
    InvalidField { field: &'static str, value: String },
    FilteredOut { category: String },
    OutOfRange { date: NaiveDate },
}

impl fmt::Display for SkipRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipRecord::MissingField(field) => write!(f, "missing {}", field),
            SkipRecord::InvalidField { field, value } => write!(f, "invalid {} {:?}", field, value),
            SkipRecord::FilteredOut { category } => write!(f, "category {} filtered out", category),
            SkipRecord::OutOfRange { date } => write!(f, "published {} outside requested date", date),
        }
    }
}

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse price: leading currency mark and trailing unit text are dropped,
/// the number itself must be plain (thousands commas allowed).
/// "2.50" → 2.50 | "¥3.2元" → 3.2 | "1,500" → 1500 | "2-3" → None | "-" → None
pub fn parse_price(s: &str) -> Option<Decimal> {
    let s = s.trim();
    let start = s.find(|c: char| c.is_ascii_digit() || c == '.')?;
    let end = s.rfind(|c: char| c.is_ascii_digit())? + 1;
    if end <= start {
        return None;
    }

    let prefix = &s[..start];
    if !prefix.chars().all(|c| matches!(c, '¥' | '￥' | '$') || c.is_whitespace()) {
        return None;
    }
    // "3-" or "3.5~" means the price text continues past the number
    if s[end..].trim_start().starts_with(['.', ',', '-', '~', '/']) {
        return None;
    }

    let number = plain_number(&s[start..end])?;
    Decimal::from_str(&number).ok().map(|d| d.normalize())
}

/// `1234`, `1,234`, `12.5`, `.5`; the thousands commas removed.
fn plain_number(core: &str) -> Option<String> {
    let (int_part, frac_part) = match core.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (core, None),
    };
    if let Some(frac) = frac_part {
        if frac.is_empty() || !frac.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }

    let groups: Vec<&str> = int_part.split(',').collect();
    let digits_only = |g: &str| g.chars().all(|c| c.is_ascii_digit());
    let int_ok = match groups.as_slice() {
        [single] => digits_only(single) && (!single.is_empty() || frac_part.is_some()),
        [first, rest @ ..] => {
            (1..=3).contains(&first.len())
                && digits_only(first)
                && rest.iter().all(|g| g.len() == 3 && digits_only(g))
        }
        [] => false,
    };
    if !int_ok {
        return None;
    }

    let mut number = groups.concat();
    if let Some(frac) = frac_part {
        number.push('.');
        number.push_str(frac);
    }
    Some(number)
}

fn price_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_price(s),
        Value::Number(n) => {
            let d = match n.as_u64() {
                Some(u) => Decimal::from(u),
                None => Decimal::try_from(n.as_f64()?).ok()?,
            };
            (!d.is_sign_negative()).then(|| d.normalize())
        }
        _ => None,
    }
}

/// Parse dates: "2025-12-24 00:00:00" (API) or plain ISO / slashed
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let head = s.split_whitespace().next().unwrap_or(s);

    if let Ok(d) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(head, "%Y/%m/%d") {
        return Some(d);
    }

    None
}

fn non_blank(s: Option<&String>) -> Option<String> {
    s.map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn required_price(field: &'static str, value: Option<&Value>) -> Result<Decimal, SkipRecord> {
    let value = match value {
        None | Some(Value::Null) => return Err(SkipRecord::MissingField(field)),
        Some(Value::String(s)) if s.trim().is_empty() => return Err(SkipRecord::MissingField(field)),
        Some(v) => v,
    };
    price_value(value).ok_or_else(|| SkipRecord::InvalidField {
        field,
        value: value.to_string(),
    })
}

// ── Normalizer ────────────────────────────────────────────────────────────────

/// Turns raw listing rows into `PriceRecord`s, honouring a category filter.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    filter: CategoryFilter,
}

impl Normalizer {
    pub fn new(filter: CategoryFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &CategoryFilter {
        &self.filter
    }

    pub fn normalize(&self, row: &RawPriceRow) -> Result<PriceRecord, SkipRecord> {
        let secondary = non_blank(row.prod_pcat.as_ref());
        let primary = non_blank(row.prod_cat.as_ref())
            .or_else(|| secondary.clone())
            .ok_or(SkipRecord::MissingField("prodCat"))?;

        if !self.filter.allows(&primary) {
            return Err(SkipRecord::FilteredOut { category: primary });
        }

        let product_name =
            non_blank(row.prod_name.as_ref()).ok_or(SkipRecord::MissingField("prodName"))?;

        let min_price = required_price("lowPrice", row.low_price.as_ref())?;
        let avg_price = required_price("avgPrice", row.avg_price.as_ref())?;
        let max_price = required_price("highPrice", row.high_price.as_ref())?;

        let date_str = non_blank(row.pub_date.as_ref()).ok_or(SkipRecord::MissingField("pubDate"))?;
        let publish_date = parse_date(&date_str).ok_or(SkipRecord::InvalidField {
            field: "pubDate",
            value: date_str.clone(),
        })?;

        Ok(PriceRecord {
            secondary_category: secondary.filter(|s| *s != primary),
            primary_category: primary,
            product_name,
            min_price,
            avg_price,
            max_price,
            spec: non_blank(row.spec_info.as_ref()),
            origin: non_blank(row.place.as_ref()).unwrap_or_default(),
            unit: non_blank(row.unit_info.as_ref()).unwrap_or_default(),
            publish_date,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
