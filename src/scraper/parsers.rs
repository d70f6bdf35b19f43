use crate::error::{AppError, Result};
use crate::models::RawPriceRow;
use serde_json::Value;

/// One page of the `getPriceData.html` listing.
#[derive(Debug, Default)]
pub struct PricePage {
    pub rows: Vec<RawPriceRow>,
    /// Total rows matching the query across all pages, when reported.
    pub total: Option<u64>,
}

// ── Listing page ──────────────────────────────────────────────────────────────

pub fn parse_price_page(body: &str) -> Result<PricePage> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        return Err(AppError::Parse(
            "expected JSON listing, got an HTML document (site layout changed?)".into(),
        ));
    }

    let doc: Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Parse(format!("listing is not valid JSON: {}", e)))?;

    let list = doc
        .get("list")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Parse("listing has no `list` array".into()))?;

    let rows = list
        .iter()
        .enumerate()
        .map(|(i, item)| {
            if !item.is_object() {
                return Err(AppError::Parse(format!("list item {} is not an object", i)));
            }
            serde_json::from_value::<RawPriceRow>(item.clone())
                .map_err(|e| AppError::Parse(format!("list item {}: {}", i, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    // `count` on the current site, `total` on older deployments
    let total = ["count", "total"]
        .iter()
        .filter_map(|key| doc.get(*key))
        .find_map(total_value);

    Ok(PricePage { rows, total })
}

fn total_value(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::cleaner::{Normalizer, SkipRecord};

    #[test]
    fn test_parse_listing_page() {
        let body = r#"{
            "current": 1, "limit": 2, "count": 3,
            "list": [
                {"prodName": "大白菜", "prodCat": "蔬菜", "lowPrice": "0.5", "avgPrice": "0.6",
                 "highPrice": "0.7", "place": "冀", "unitInfo": "斤", "pubDate": "2025-12-24 00:00:00",
                 "id": 1, "prodCatid": 1186},
                {"prodName": "苹果", "prodCat": "水果", "prodPcat": null, "lowPrice": 3,
                 "avgPrice": 4, "highPrice": 5, "pubDate": "2025-12-24 00:00:00"}
            ]
        }"#;
        let page = parse_price_page(body).unwrap();
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.total, Some(3));
        assert_eq!(page.rows[0].prod_name.as_deref(), Some("大白菜"));
        assert_eq!(page.rows[1].prod_pcat, None);
    }

    #[test]
    fn test_odd_field_types_stay_row_level() {
        let body = r#"{"count": 3, "list": [
            {"prodName": "土豆", "prodCat": "蔬菜", "lowPrice": "1", "avgPrice": "1.2",
             "highPrice": "1.5", "specInfo": "", "pubDate": "2025-12-24 00:00:00"},
            {"prodName": "鸡蛋", "prodCat": "肉禽蛋", "lowPrice": "4", "avgPrice": "4.5",
             "highPrice": "5", "specInfo": 5, "place": 110, "unitInfo": "斤",
             "pubDate": "2025-12-24 00:00:00"},
            {"prodName": {"zh": "鲤鱼"}, "prodCat": "水产", "lowPrice": "8", "avgPrice": "9",
             "highPrice": "10", "pubDate": "2025-12-24 00:00:00"}
        ]}"#;
        let page = parse_price_page(body).unwrap();
        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.rows[1].spec_info.as_deref(), Some("5"));
        assert_eq!(page.rows[1].place.as_deref(), Some("110"));
        assert_eq!(page.rows[2].prod_name, None);

        let normalizer = Normalizer::default();
        let rec = normalizer.normalize(&page.rows[1]).unwrap();
        assert_eq!(rec.spec.as_deref(), Some("5"));
        assert_eq!(
            normalizer.normalize(&page.rows[2]),
            Err(SkipRecord::MissingField("prodName"))
        );
    }

    #[test]
    fn test_total_falls_back_to_total_key() {
        let page = parse_price_page(r#"{"list": [], "count": 0, "total": "12"}"#).unwrap();
        assert_eq!(page.total, Some(12));
        assert!(page.rows.is_empty());
    }

    #[test]
    fn test_structure_changes_are_parse_errors() {
        for body in [
            "<html><body>维护中</body></html>",
            "not json",
            r#"{"data": []}"#,
            r#"{"list": {"a": 1}}"#,
            r#"{"list": [1, 2]}"#,
        ] {
            let err = parse_price_page(body).unwrap_err();
            assert!(matches!(err, AppError::Parse(_)), "{body}: {err}");
        }
    }
}
