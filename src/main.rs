use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use xinfadi_scraper::config::AppConfig;
use xinfadi_scraper::error::AppError;
use xinfadi_scraper::export::OutputFormat;
use xinfadi_scraper::models::{Category, DateRange};
use xinfadi_scraper::pipeline::aggregator::DateErrorPolicy;
use xinfadi_scraper::pipeline::{Pipeline, PipelineStats, RunRequest, schedule};
use xinfadi_scraper::utils;

#[derive(Parser)]
#[command(
    name = "xinfadi-scraper",
    about = "Xinfadi (新发地) wholesale market price scraper",
    version
)]
struct Cli {
    /// Fetch today's prices (the default)
    #[arg(long, conflicts_with_all = ["yesterday", "days", "start", "end"])]
    today: bool,

    /// Fetch yesterday's prices
    #[arg(long, conflicts_with_all = ["days", "start", "end"])]
    yesterday: bool,

    /// Fetch the last N days, today included
    #[arg(long, value_name = "N", conflicts_with_all = ["start", "end"])]
    days: Option<u32>,

    /// First date (YYYY-MM-DD); runs through today unless --end is given
    #[arg(long, value_name = "DATE")]
    start: Option<NaiveDate>,

    /// Last date (YYYY-MM-DD); alone it fetches just that day
    #[arg(long, value_name = "DATE")]
    end: Option<NaiveDate>,

    /// Category filter: 蔬菜, 水果, 肉禽蛋, 水产, 粮油, 豆制品, 调料 (repeatable or comma separated)
    #[arg(short, long, value_delimiter = ',')]
    category: Vec<Category>,

    /// Product name filter passed to the site
    #[arg(short, long)]
    product: Option<String>,

    /// Output format [default: from config, else csv]
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Output directory [default: from config, else data/]
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Fixed output file name; the extension follows the format
    #[arg(long)]
    filename: Option<String>,

    /// Also upload the result to a new Feishu spreadsheet
    #[arg(long)]
    sync_feishu: bool,

    /// Log and skip dates that cannot be fetched instead of aborting
    #[arg(long)]
    skip_failed_dates: bool,

    /// Run today's fetch now, then every day at --schedule-time
    #[arg(long, conflicts_with_all = ["yesterday", "days", "start", "end"])]
    schedule: bool,

    /// Daily run time for --schedule (HH:MM, local time)
    #[arg(long, default_value = "08:00", value_name = "HH:MM")]
    schedule_time: String,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

impl Cli {
    fn date_range(&self, today: NaiveDate) -> Result<DateRange, AppError> {
        if self.yesterday {
            return Ok(DateRange::single(today - Duration::days(1)));
        }
        if let Some(days) = self.days {
            return DateRange::last_n_days(days, today);
        }
        match (self.start, self.end) {
            (Some(start), Some(end)) => DateRange::new(start, end),
            (Some(start), None) => DateRange::new(start, today),
            (None, Some(end)) => Ok(DateRange::single(end)),
            (None, None) => Ok(DateRange::single(today)),
        }
    }

    fn request(&self, range: DateRange, default_format: OutputFormat) -> RunRequest {
        RunRequest {
            range,
            categories: self.category.iter().copied().collect(),
            product: self.product.clone(),
            format: self.format.unwrap_or(default_format),
            file_name: self.filename.clone(),
            sync_feishu: self.sync_feishu,
        }
    }
}

fn report(stats: &PipelineStats) {
    for path in &stats.files {
        println!("Saved: {}", path.display());
    }
    if let Some(doc) = &stats.document {
        println!(
            "Feishu: {} ({})",
            doc.title,
            doc.url.as_deref().unwrap_or(&doc.identifier)
        );
    }
    println!(
        "{} records from {} date(s), {} rows skipped, {} dates failed",
        utils::fmt_number(stats.records as i64),
        stats.dates_requested,
        stats.skipped_rows,
        stats.failed_dates
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_tracing(cli.verbose);

    let mut config = AppConfig::load().context("Failed to load configuration")?;
    if let Some(dir) = &cli.output {
        config.export.output_dir = dir.clone();
    }
    if cli.skip_failed_dates {
        config.pipeline.on_date_error = DateErrorPolicy::SkipAndContinue;
    }
    let default_format = config.export.format;

    if cli.schedule {
        let at = schedule::parse_schedule_time(&cli.schedule_time)?;
        let base = cli.request(DateRange::single(Local::now().date_naive()), default_format);
        let pipeline = Pipeline::new(config);

        info!("Scheduled mode: first run now, then daily at {}", at.format("%H:%M"));
        let pipeline = &pipeline;
        let base = &base;
        let job = move || async move {
            let _t = utils::Timer::start("Scheduled fetch");
            let mut request = base.clone();
            request.range = DateRange::single(Local::now().date_naive());
            let stats = pipeline.run(&request).await?;
            report(&stats);
            Ok::<(), anyhow::Error>(())
        };

        if let Err(e) = job().await {
            tracing::error!("Initial run failed: {:#}", e);
        }
        schedule::run_daily(at, job).await;
        return Ok(());
    }

    let range = cli.date_range(Local::now().date_naive())?;
    let request = cli.request(range, default_format);

    let _t = utils::Timer::start(format!("Fetch {}", range));
    let stats = Pipeline::new(config).run(&request).await?;
    report(&stats);

    Ok(())
}
