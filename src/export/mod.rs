//! Local file export of a `PriceTable`: CSV (UTF-8 with BOM) and XLSX.

pub mod xlsx;

use crate::error::{AppError, Result};
use crate::models::{DateRange, PriceTable};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Lets Excel detect UTF-8 on double-click.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    #[value(alias = "spreadsheet")]
    #[serde(alias = "spreadsheet")]
    Xlsx,
    Both,
}

impl OutputFormat {
    pub fn wants_csv(self) -> bool {
        matches!(self, OutputFormat::Csv | OutputFormat::Both)
    }

    pub fn wants_xlsx(self) -> bool {
        matches!(self, OutputFormat::Xlsx | OutputFormat::Both)
    }
}

pub struct Exporter {
    output_dir: PathBuf,
    prefix: String,
    file_name: Option<String>,
}

impl Exporter {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
            file_name: None,
        }
    }

    /// Use a fixed file name; its extension is replaced per format.
    pub fn with_file_name(mut self, file_name: Option<String>) -> Self {
        self.file_name = file_name.filter(|f| !f.trim().is_empty());
        self
    }

    /// `<prefix>_<start>_to_<end>.<ext>` unless a fixed name was given.
    /// A fixed name that is only an extension (`.csv`) falls back to the default.
    pub fn file_name(&self, range: DateRange, ext: &str) -> String {
        match self.file_name.as_deref().and_then(fixed_stem) {
            Some(stem) => format!("{}.{}", stem, ext),
            None => format!("{}_{}_to_{}.{}", self.prefix, range.start(), range.end(), ext),
        }
    }

    /// Write every requested format, returning the paths written.
    pub fn export(&self, table: &PriceTable, format: OutputFormat) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir).map_err(|e| AppError::io(&self.output_dir, e))?;

        let mut written = Vec::new();

        if format.wants_csv() {
            let path = self.output_dir.join(self.file_name(table.range(), "csv"));
            write_file(&path, &csv_bytes(table, &path)?)?;
            info!("CSV saved to {} ({} rows)", path.display(), table.len());
            written.push(path);
        }

        if format.wants_xlsx() {
            let path = self.output_dir.join(self.file_name(table.range(), "xlsx"));
            write_file(&path, &xlsx::xlsx_bytes(table, &path)?)?;
            info!("XLSX saved to {} ({} rows)", path.display(), table.len());
            written.push(path);
        }

        Ok(written)
    }
}

/// File name without directories and without its last extension.
fn fixed_stem(name: &str) -> Option<&str> {
    let base = Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let stem = base.rsplit_once('.').map_or(base, |(head, _)| head);
    Some(stem).filter(|s| !s.trim().is_empty())
}

/// CSV rendering of the table; `path` is only used in error messages.
pub fn csv_bytes(table: &PriceTable, path: &Path) -> Result<Vec<u8>> {
    let to_io = |e: csv::Error| AppError::io(path, std::io::Error::other(e));

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(UTF8_BOM.to_vec());

    // Written explicitly so an empty table still gets its header row
    wtr.write_record(crate::models::COLUMNS).map_err(to_io)?;
    for record in table.records() {
        wtr.serialize(record).map_err(to_io)?;
    }

    wtr.into_inner()
        .map_err(|e| AppError::io(path, std::io::Error::other(e.to_string())))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|e| AppError::io(path, e))
}
