//! Xinfadi wholesale market price scraper: daily price listings to CSV/XLSX,
//! with optional upload to a Feishu spreadsheet.

pub mod config;
pub mod error;
pub mod export;
pub mod feishu;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod scraper;
pub mod utils;
