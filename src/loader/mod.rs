//! CSV loader for re-reading exported price files (used by `feishu-auth --upload`).

use crate::error::{AppError, Result};
use crate::models::{COLUMNS, DateRange, PriceRecord, PriceTable};
use crate::scraper::cleaner::{parse_date, parse_price};
use csv::StringRecord;
use std::path::Path;
use tracing::{debug, info, warn};

const UTF8_BOM: &str = "\u{feff}";

/// Column positions resolved from the header, so reordered files still load.
struct Layout([usize; 10]);

impl Layout {
    fn from_header(header: &StringRecord, path: &Path) -> Result<Self> {
        let mut idx = [0usize; 10];
        for (slot, name) in idx.iter_mut().zip(COLUMNS) {
            *slot = header
                .iter()
                .position(|h| h.trim_start_matches(UTF8_BOM).trim() == name)
                .ok_or_else(|| {
                    AppError::InvalidInput(format!("{}: missing column {}", path.display(), name))
                })?;
        }
        Ok(Self(idx))
    }

    fn get<'r>(&self, record: &'r StringRecord, col: usize) -> &'r str {
        record.get(self.0[col]).map(str::trim).unwrap_or("")
    }

    fn optional(&self, record: &StringRecord, col: usize) -> Option<String> {
        Some(self.get(record, col)).filter(|s| !s.is_empty()).map(str::to_string)
    }

    fn to_record(&self, record: &StringRecord) -> Option<PriceRecord> {
        Some(PriceRecord {
            primary_category: Some(self.get(record, 0)).filter(|s| !s.is_empty())?.to_string(),
            secondary_category: self.optional(record, 1),
            product_name: Some(self.get(record, 2)).filter(|s| !s.is_empty())?.to_string(),
            min_price: parse_price(self.get(record, 3))?,
            avg_price: parse_price(self.get(record, 4))?,
            max_price: parse_price(self.get(record, 5))?,
            spec: self.optional(record, 6),
            origin: self.get(record, 7).to_string(),
            unit: self.get(record, 8).to_string(),
            publish_date: parse_date(self.get(record, 9))?,
        })
    }
}

/// Parse a CSV written by the exporter back into a table. Malformed rows are
/// logged and skipped; the table's range spans the dates found.
pub fn load_price_csv(path: &Path) -> Result<PriceTable> {
    debug!("Loading price CSV {:?}", path);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| AppError::io(path, std::io::Error::other(e)))?;

    let header = reader
        .headers()
        .map_err(|e| AppError::io(path, std::io::Error::other(e)))?
        .clone();
    let layout = Layout::from_header(&header, path)?;

    let mut records = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 2, path, e);
                continue;
            }
        };
        match layout.to_record(&row) {
            Some(rec) => records.push(rec),
            None => warn!("Row {} in {:?}: incomplete, skipped", i + 2, path),
        }
    }

    let (Some(start), Some(end)) = (
        records.iter().map(|r| r.publish_date).min(),
        records.iter().map(|r| r.publish_date).max(),
    ) else {
        return Err(AppError::InvalidInput(format!("{} contains no price rows", path.display())));
    };

    info!("{:?}: {} rows loaded ({} to {})", path, records.len(), start, end);
    Ok(PriceTable::from_records(DateRange::new(start, end)?, records))
}
