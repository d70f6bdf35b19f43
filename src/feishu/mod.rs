//! Push a `PriceTable` into a brand-new Feishu spreadsheet.

pub mod client;
pub mod credential;
pub mod oauth;

pub use client::{CreatedSpreadsheet, FeishuClient};
pub use credential::{CredentialStore, JsonFileStore, TokenProvider};

use crate::error::{AppError, Result};
use crate::models::{COLUMNS, DateRange, PriceTable, RemoteDocument};
use crate::utils::column_letter;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{info, warn};

/// The handful of drive/sheets calls a sync needs.
#[async_trait]
pub trait SpreadsheetApi: Send + Sync {
    async fn list_titles(&self, token: &str, folder: Option<&str>) -> Result<Vec<String>>;
    async fn create_spreadsheet(&self, token: &str, title: &str, folder: Option<&str>)
    -> Result<CreatedSpreadsheet>;
    async fn first_sheet_id(&self, token: &str, spreadsheet: &str) -> Result<String>;
    async fn write_values(&self, token: &str, spreadsheet: &str, range: &str, values: Vec<Vec<Value>>)
    -> Result<()>;
}

/// `<prefix>_<date>` for one day, `<prefix>_<start>_to_<end>` otherwise.
pub fn document_title(prefix: &str, range: DateRange) -> String {
    if range.start() == range.end() {
        format!("{}_{}", prefix, range.start())
    } else {
        format!("{}_{}_to_{}", prefix, range.start(), range.end())
    }
}

/// `base`, or `base_(n)` with the smallest free n.
pub fn unique_title(base: &str, existing: &[String]) -> String {
    let taken: HashSet<&str> = existing.iter().map(String::as_str).collect();
    if !taken.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}_({})", base, n))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}

fn price_cell(price: Decimal) -> Value {
    price.to_f64().map(Value::from).unwrap_or_else(|| Value::from(price.to_string()))
}

fn text_cell(s: Option<&str>) -> Value {
    Value::from(s.unwrap_or(""))
}

/// Header row followed by one row per record, ready for a value write.
pub fn table_values(table: &PriceTable) -> Vec<Vec<Value>> {
    let mut rows = Vec::with_capacity(table.len() + 1);
    rows.push(COLUMNS.iter().map(|c| Value::from(*c)).collect());

    for rec in table.records() {
        rows.push(vec![
            Value::from(rec.primary_category.as_str()),
            text_cell(rec.secondary_category.as_deref()),
            Value::from(rec.product_name.as_str()),
            price_cell(rec.min_price),
            price_cell(rec.avg_price),
            price_cell(rec.max_price),
            text_cell(rec.spec.as_deref()),
            Value::from(rec.origin.as_str()),
            Value::from(rec.unit.as_str()),
            Value::from(rec.publish_date.format("%Y-%m-%d").to_string()),
        ]);
    }

    rows
}

pub struct RemoteSync<'a> {
    api: &'a dyn SpreadsheetApi,
    tokens: &'a dyn TokenProvider,
    folder: Option<String>,
    batch_rows: usize,
}

impl<'a> RemoteSync<'a> {
    pub fn new(api: &'a dyn SpreadsheetApi, tokens: &'a dyn TokenProvider) -> Self {
        Self {
            api,
            tokens,
            folder: None,
            batch_rows: 4000,
        }
    }

    pub fn with_folder(mut self, folder: Option<String>) -> Self {
        self.folder = folder.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn with_batch_rows(mut self, rows: usize) -> Self {
        self.batch_rows = rows.max(1);
        self
    }

    /// Create a new spreadsheet titled after `base_title` and fill it with the table.
    pub async fn sync(&self, table: &PriceTable, base_title: &str) -> Result<RemoteDocument> {
        let token = self.tokens.bearer_token().await?;
        let folder = self.folder.as_deref();

        let existing = match self.api.list_titles(&token, folder).await {
            Ok(titles) => titles,
            Err(e @ AppError::Auth(_)) => return Err(e),
            Err(e) => {
                warn!("Could not list existing documents, assuming none: {}", e);
                Vec::new()
            }
        };
        let title = unique_title(base_title, &existing);

        let created = self.api.create_spreadsheet(&token, &title, folder).await?;
        info!("Created spreadsheet \"{}\" ({})", title, created.token);

        let sheet_id = self.api.first_sheet_id(&token, &created.token).await?;
        let values = table_values(table);
        let last_col = column_letter(COLUMNS.len());

        let mut first_row = 1;
        for chunk in values.chunks(self.batch_rows) {
            let last_row = first_row + chunk.len() - 1;
            let range = format!("{}!A{}:{}{}", sheet_id, first_row, last_col, last_row);
            self.api
                .write_values(&token, &created.token, &range, chunk.to_vec())
                .await?;
            first_row = last_row + 1;
        }
        info!("Wrote {} rows to \"{}\"", table.len(), title);

        Ok(RemoteDocument {
            title,
            identifier: created.token,
            parent_folder: self.folder.clone(),
            url: created.url,
        })
    }
}
