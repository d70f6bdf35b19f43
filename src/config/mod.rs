use crate::error::Result;
use crate::export::OutputFormat;
use crate::pipeline::aggregator::DateErrorPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub feishu: FeishuConfig,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_price_path")]
    pub price_path: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Local file export configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    #[serde(default)]
    pub format: OutputFormat,
}

/// Pipeline configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// What to do when one date of a range cannot be fetched.
    #[serde(default)]
    pub on_date_error: DateErrorPolicy,
}

/// Feishu spreadsheet sync configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeishuConfig {
    #[serde(default = "default_feishu_base_url")]
    pub base_url: String,

    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,

    /// Overrides the folder stored in the credential file.
    #[serde(default)]
    pub folder_token: Option<String>,

    #[serde(default = "default_title_prefix")]
    pub title_prefix: String,

    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,

    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,

    #[serde(default = "default_write_batch_rows")]
    pub write_batch_rows: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "http://www.xinfadi.com.cn".to_string()
}
fn default_price_path() -> String {
    "/getPriceData.html".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    500
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_page_size() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    200
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_file_prefix() -> String {
    "xinfadi_price".to_string()
}
fn default_feishu_base_url() -> String {
    "https://open.feishu.cn/open-apis".to_string()
}
fn default_credentials_path() -> PathBuf {
    PathBuf::from("feishu_config.json")
}
fn default_title_prefix() -> String {
    "新发地价格".to_string()
}
fn default_redirect_port() -> u16 {
    9000
}
fn default_auth_timeout_secs() -> u64 {
    300
}
fn default_write_batch_rows() -> usize {
    4000
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            price_path: default_price_path(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
            format: OutputFormat::default(),
        }
    }
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            base_url: default_feishu_base_url(),
            credentials_path: default_credentials_path(),
            folder_token: None,
            title_prefix: default_title_prefix(),
            redirect_port: default_redirect_port(),
            auth_timeout_secs: default_auth_timeout_secs(),
            write_batch_rows: default_write_batch_rows(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("XINFADI").separator("__"))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[scraper]\npage_size = 20\n\n[pipeline]\non_date_error = \"skip-and-continue\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.scraper.page_size, 20);
        assert_eq!(cfg.scraper.max_retries, 3);
        assert_eq!(cfg.pipeline.on_date_error, DateErrorPolicy::SkipAndContinue);
        assert_eq!(cfg.export.file_prefix, "xinfadi_price");
        assert_eq!(cfg.feishu.redirect_port, 9000);
    }
}
