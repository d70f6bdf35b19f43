//! Pipeline orchestrator: ties scraper → aggregator → export → Feishu together.
//!
//! One `run()` is one sequential pass over a date range:
//!   1. Fetch every date (one request in flight at a time) and normalize rows
//!   2. Write the table to CSV and/or XLSX under the output directory
//!   3. Optionally push the same table into a new Feishu spreadsheet
//! Re-running with the same inputs rewrites the same files; the Feishu step
//! always creates a fresh document.

pub mod aggregator;
pub mod schedule;

use crate::config::AppConfig;
use crate::export::{Exporter, OutputFormat};
use crate::feishu::credential::{self, CredentialStore, JsonFileStore};
use crate::feishu::{FeishuClient, RemoteSync, document_title};
use crate::models::{CategoryFilter, DateRange, PriceTable, RemoteDocument};
use crate::scraper::cleaner::Normalizer;
use crate::scraper::{PriceSource, XinfadiScraper};
use aggregator::Aggregator;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// What one run should fetch and where it should go.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub range: DateRange,
    pub categories: CategoryFilter,
    pub product: Option<String>,
    pub format: OutputFormat,
    pub file_name: Option<String>,
    pub sync_feishu: bool,
}

impl RunRequest {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            categories: CategoryFilter::all(),
            product: None,
            format: OutputFormat::default(),
            file_name: None,
            sync_feishu: false,
        }
    }
}

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, request: &RunRequest) -> Result<PipelineStats> {
        let scraper = XinfadiScraper::new(&self.config.scraper).context("Failed to build scraper")?;
        self.run_with(&scraper, request).await
    }

    pub async fn run_with(&self, source: &dyn PriceSource, request: &RunRequest) -> Result<PipelineStats> {
        let range = request.range;

        // ── 1. Fetch + normalize ──────────────────────────────────────────────
        info!(
            "=== Step 1: Fetching {} ({} day(s), category: {}) ===",
            range,
            range.len_days(),
            request.categories
        );
        let aggregation = Aggregator::new(
            source,
            Normalizer::new(request.categories.clone()),
            self.config.pipeline.on_date_error,
        )
        .with_product(request.product.clone())
        .collect(range)
        .await
        .with_context(|| format!("Fetching prices for {} failed", range))?;

        let table = aggregation.table;
        if table.is_empty() {
            warn!("No price records for {}; files will only carry the header", range);
        }

        // ── 2. Local files ────────────────────────────────────────────────────
        info!("=== Step 2: Writing {} records ===", table.len());
        let files = Exporter::new(&self.config.export.output_dir, &self.config.export.file_prefix)
            .with_file_name(request.file_name.clone())
            .export(&table, request.format)
            .context("Export failed")?;

        // ── 3. Feishu ─────────────────────────────────────────────────────────
        let document = if request.sync_feishu {
            info!("=== Step 3: Syncing to Feishu ===");
            let doc = self.sync_feishu(&table).await.context("Feishu sync failed")?;
            if let Some(url) = &doc.url {
                info!("Spreadsheet URL: {}", url);
            }
            Some(doc)
        } else {
            None
        };

        let stats = PipelineStats {
            dates_requested: range.len_days(),
            records: table.len(),
            skipped_rows: aggregation.skipped_rows,
            failed_dates: aggregation.failed_dates.len(),
            files,
            document,
        };

        info!(
            "=== Done: {} records | {} skipped rows | {} failed dates ===",
            stats.records, stats.skipped_rows, stats.failed_dates
        );

        Ok(stats)
    }

    async fn sync_feishu(&self, table: &PriceTable) -> crate::error::Result<RemoteDocument> {
        let cfg = &self.config.feishu;
        let client = FeishuClient::new(cfg)?;
        let store: Arc<dyn CredentialStore> = Arc::new(JsonFileStore::new(&cfg.credentials_path));

        let folder = match &cfg.folder_token {
            Some(folder) => Some(folder.clone()),
            None => store.load()?.folder_token,
        };
        let tokens = credential::token_provider(client.clone(), store)?;

        RemoteSync::new(&client, tokens.as_ref())
            .with_folder(folder)
            .with_batch_rows(cfg.write_batch_rows)
            .sync(table, &document_title(&cfg.title_prefix, table.range()))
            .await
    }
}

#[derive(Debug)]
pub struct PipelineStats {
    pub dates_requested: usize,
    pub records: usize,
    pub skipped_rows: usize,
    pub failed_dates: usize,
    pub files: Vec<PathBuf>,
    pub document: Option<RemoteDocument>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{Category, RawPriceRow};
    use crate::scraper::DayQuery;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct OneDay(NaiveDate);

    #[async_trait]
    impl PriceSource for OneDay {
        async fn fetch_day(&self, query: &DayQuery) -> crate::error::Result<Vec<RawPriceRow>> {
            if query.date != self.0 {
                return Ok(Vec::new());
            }
            Ok(vec![RawPriceRow {
                prod_name: Some("香蕉".into()),
                prod_cat: Some("水果".into()),
                low_price: Some("2.5".into()),
                avg_price: Some("3".into()),
                high_price: Some("3.5".into()),
                place: Some("海南".into()),
                unit_info: Some("斤".into()),
                pub_date: Some(format!("{} 00:00:00", self.0)),
                ..RawPriceRow::default()
            }])
        }
    }

    fn pipeline(dir: &std::path::Path) -> Pipeline {
        let mut config = AppConfig::default();
        config.export.output_dir = dir.to_path_buf();
        Pipeline::new(config)
    }

    #[tokio::test]
    async fn test_run_writes_requested_formats() {
        let dir = tempfile::tempdir().unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 12, 24).unwrap();

        let mut request = RunRequest::new(DateRange::new(day.pred_opt().unwrap(), day).unwrap());
        request.categories = [Category::Fruit].into_iter().collect();
        request.format = OutputFormat::Both;

        let stats = pipeline(dir.path()).run_with(&OneDay(day), &request).await.unwrap();
        assert_eq!(stats.dates_requested, 2);
        assert_eq!(stats.records, 1);
        assert_eq!(stats.files.len(), 2);
        assert!(stats.files.iter().all(|p| p.exists()));
        assert!(stats.document.is_none());
    }

    #[tokio::test]
    async fn test_sync_without_credentials_fails_after_export() {
        let dir = tempfile::tempdir().unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 12, 24).unwrap();

        let mut p = pipeline(dir.path());
        p.config.feishu.credentials_path = dir.path().join("missing.json");

        let mut request = RunRequest::new(DateRange::single(day));
        request.sync_feishu = true;

        let err = p.run_with(&OneDay(day), &request).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Auth(_))));
        assert!(dir.path().join("xinfadi_price_2025-12-24_to_2025-12-24.csv").exists());
    }
}
