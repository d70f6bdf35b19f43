pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::error::{AppError, Result};
use crate::models::{Category, RawPriceRow};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info, warn};
use url::Url;

use self::http_client::HttpClient;
use self::parsers::parse_price_page;

// ── Source trait ──────────────────────────────────────────────────────────────

/// What to ask the site for: one publish date, optionally narrowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayQuery {
    pub date: NaiveDate,
    pub category: Option<Category>,
    pub product: Option<String>,
}

impl DayQuery {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            category: None,
            product: None,
        }
    }
}

/// Swappable price listing source.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Every raw row published for the query's date, all pages exhausted.
    async fn fetch_day(&self, query: &DayQuery) -> Result<Vec<RawPriceRow>>;
}

// ── xinfadi.com.cn scraper ────────────────────────────────────────────────────

pub struct XinfadiScraper {
    client: HttpClient,
    endpoint: Url,
    page_size: u32,
    max_pages: u32,
}

impl XinfadiScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let endpoint = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.price_path.trim_start_matches('/')
        );
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| AppError::Config(format!("invalid price endpoint {}: {}", endpoint, e)))?;

        Ok(Self {
            client: HttpClient::new(config)?,
            endpoint,
            page_size: config.page_size.max(1),
            max_pages: config.max_pages.max(1),
        })
    }

    /// URL for one page of one day's listing.
    fn page_url(&self, query: &DayQuery, page: u32) -> Url {
        let date = query.date.format("%Y-%m-%d").to_string();
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("limit", &self.page_size.to_string())
                .append_pair("current", &page.to_string())
                .append_pair("pubDateStartTime", &date)
                .append_pair("pubDateEndTime", &date);
            if let Some(category) = query.category {
                pairs.append_pair("prodCat", category.name());
            }
            if let Some(product) = &query.product {
                pairs.append_pair("prodName", product);
            }
        }
        url
    }

    /// Lazy page-by-page walk over one day's listing.
    pub fn pages<'a>(&'a self, query: &'a DayQuery) -> DayPages<'a> {
        DayPages {
            scraper: self,
            query,
            next_page: 1,
            seen: 0,
            done: false,
        }
    }
}

pub struct DayPages<'a> {
    scraper: &'a XinfadiScraper,
    query: &'a DayQuery,
    next_page: u32,
    seen: u64,
    done: bool,
}

impl DayPages<'_> {
    /// Next non-empty page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RawPriceRow>>> {
        if self.done {
            return Ok(None);
        }
        if self.next_page > self.scraper.max_pages {
            warn!(
                "{}: reached page limit ({}), stopping",
                self.query.date, self.scraper.max_pages
            );
            self.done = true;
            return Ok(None);
        }

        let page = self.next_page;
        let url = self.scraper.page_url(self.query, page);
        let body = self.scraper.client.get_text(&url).await?;
        let parsed = parse_price_page(&body)?;

        if parsed.rows.is_empty() {
            debug!("{}: empty page {}, stopping pagination", self.query.date, page);
            self.done = true;
            return Ok(None);
        }

        self.seen += parsed.rows.len() as u64;
        self.next_page += 1;
        debug!(
            "{}: page {} → {} rows ({}/{})",
            self.query.date,
            page,
            parsed.rows.len(),
            self.seen,
            parsed.total.map(|t| t.to_string()).unwrap_or_else(|| "?".into())
        );

        if parsed.total.is_some_and(|total| self.seen >= total) {
            self.done = true;
        }

        Ok(Some(parsed.rows))
    }
}

#[async_trait]
impl PriceSource for XinfadiScraper {
    async fn fetch_day(&self, query: &DayQuery) -> Result<Vec<RawPriceRow>> {
        let mut pages = self.pages(query);
        let mut rows = Vec::new();

        while let Some(page) = pages.next_page().await? {
            rows.extend(page);
        }

        info!("{}: {} raw rows", query.date, rows.len());
        Ok(rows)
    }
}
