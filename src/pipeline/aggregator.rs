//! Date-range fan-in: one sequential fetch per day, normalized and concatenated.

use crate::error::Result;
use crate::models::{DateRange, PriceTable};
use crate::scraper::cleaner::{Normalizer, SkipRecord};
use crate::scraper::{DayQuery, PriceSource};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What a failed date does to the rest of the range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateErrorPolicy {
    /// Abort the whole run on the first date that cannot be fetched.
    #[default]
    FailFast,
    /// Log the failure, remember the date, move on to the next one.
    SkipAndContinue,
}

#[derive(Debug)]
pub struct Aggregation {
    pub table: PriceTable,
    pub skipped_rows: usize,
    pub failed_dates: Vec<(NaiveDate, String)>,
}

pub struct Aggregator<'a> {
    source: &'a dyn PriceSource,
    normalizer: Normalizer,
    policy: DateErrorPolicy,
    product: Option<String>,
}

impl<'a> Aggregator<'a> {
    pub fn new(source: &'a dyn PriceSource, normalizer: Normalizer, policy: DateErrorPolicy) -> Self {
        Self {
            source,
            normalizer,
            policy,
            product: None,
        }
    }

    pub fn with_product(mut self, product: Option<String>) -> Self {
        self.product = product.filter(|p| !p.trim().is_empty());
        self
    }

    pub async fn collect(&self, range: DateRange) -> Result<Aggregation> {
        let mut table = PriceTable::new(range);
        let mut skipped_rows = 0usize;
        let mut failed_dates = Vec::new();

        for date in range.days() {
            let query = DayQuery {
                date,
                category: self.normalizer.filter().single(),
                product: self.product.clone(),
            };

            let raw = match self.source.fetch_day(&query).await {
                Ok(raw) => raw,
                Err(e) if self.policy == DateErrorPolicy::SkipAndContinue => {
                    warn!("{}: fetch failed, skipping date: {}", date, e);
                    failed_dates.push((date, e.to_string()));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let before = table.len();
            for row in &raw {
                let outcome = self.normalizer.normalize(row).and_then(|rec| {
                    if rec.publish_date == date {
                        Ok(rec)
                    } else {
                        Err(SkipRecord::OutOfRange {
                            date: rec.publish_date,
                        })
                    }
                });
                match outcome {
                    Ok(rec) => table.extend([rec]),
                    Err(SkipRecord::FilteredOut { .. }) => skipped_rows += 1,
                    Err(reason) => {
                        debug!("{}: skipping row {:?}: {}", date, row.prod_name, reason);
                        skipped_rows += 1;
                    }
                }
            }

            info!(
                "{}: kept {} of {} rows (filter: {})",
                date,
                table.len() - before,
                raw.len(),
                self.normalizer.filter()
            );
        }

        Ok(Aggregation {
            table,
            skipped_rows,
            failed_dates,
        })
    }
}
