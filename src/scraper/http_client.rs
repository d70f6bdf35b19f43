use crate::config::ScraperConfig;
use crate::error::{AppError, Result};
use rand::Rng;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER};
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};
use url::Url;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        let referer = format!("{}/priceDetail.html", config.base_url.trim_end_matches('/'));
        let referer = HeaderValue::from_str(&referer)
            .map_err(|e| AppError::Config(format!("bad base_url for Referer: {}", e)))?;
        headers.insert(REFERER, referer);

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // The listing endpoint hands out a session cookie on first use
            .cookie_store(true)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as text with polite delay and bounded retry.
    pub async fn get_text(&self, url: &Url) -> Result<String> {
        self.polite_delay().await;

        let mut attempt = 0u32;
        RetryIf::spawn(
            self.backoff(),
            || {
                attempt += 1;
                debug!("GET {} (attempt {})", url, attempt);
                self.try_get(url)
            },
            |e: &AppError| {
                let retry = e.is_transient();
                if retry {
                    warn!("{}, retrying", e);
                }
                retry
            },
        )
        .await
    }

    async fn try_get(&self, url: &Url) -> Result<String> {
        let resp = self
            .inner
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AppError::network(format!("request to {} failed: {}", url, e), true))?;

        let status = resp.status();
        if !status.is_success() {
            // 429 and 5xx are the server asking us to come back later
            let transient = status.as_u16() == 429 || status.is_server_error();
            return Err(AppError::network(format!("HTTP {} from {}", status, url), transient));
        }

        resp.text()
            .await
            .map_err(|e| AppError::network(format!("failed to read body from {}: {}", url, e), true))
    }

    /// base, 2×base, 4×base … capped, jittered, `max_retries` long.
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor((self.config.retry_base_delay_ms / 2).max(1))
            .max_delay(MAX_BACKOFF)
            .map(jitter)
            .take(self.config.max_retries as usize)
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter_ms = rand::rng().random_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + jitter_ms);
        if !total.is_zero() {
            sleep(total).await;
        }
    }
}
