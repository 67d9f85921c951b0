//! # reliability-ingest
//!
//! Loads content briefs (one product per row) from CSV or XLSX files, to be
//! turned into prompts for reliability runs.
//!
//! Recognised columns: `product`, `price`, `key_features`, `audience`,
//! `primary_keyword`, `secondary_keywords`, `intent`, `marketplace`.
//! Header names are matched case-insensitively; missing columns read as
//! empty strings and unknown columns are ignored.
//!
//! XLSX support needs the `xlsx` cargo feature.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "xlsx")]
mod xlsx;

/// Errors from brief ingestion.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported file type: '{0}'. Use .csv or .xlsx")]
    UnsupportedFormat(String),

    #[error("{0}")]
    MissingCapability(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),
}

/// One content brief.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBrief {
    pub product: String,
    pub price: String,
    pub key_features: String,
    pub audience: String,
    pub primary_keyword: String,
    pub secondary_keywords: Vec<String>,
    pub intent: String,
    pub marketplace: String,
}

impl ContentBrief {
    /// Build a brief from a header-name to cell-value map.
    fn from_row(row: &HashMap<String, String>) -> Self {
        let field = |name: &str| row.get(name).map(|v| v.trim().to_string()).unwrap_or_default();
        Self {
            product: field("product"),
            price: field("price"),
            key_features: field("key_features"),
            audience: field("audience"),
            primary_keyword: field("primary_keyword"),
            secondary_keywords: split_keywords(
                row.get("secondary_keywords").map(String::as_str).unwrap_or(""),
            ),
            intent: field("intent"),
            marketplace: field("marketplace"),
        }
    }
}

/// Split a keyword list separated by `,` or `;`, dropping empty entries.
pub fn split_keywords(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load briefs from a `.csv` or `.xlsx` file, chosen by extension.
pub fn load_briefs(path: impl AsRef<Path>) -> Result<Vec<ContentBrief>, IngestError> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    match ext.as_str() {
        ".csv" => load_briefs_from_csv(path),
        ".xlsx" => load_briefs_from_xlsx(path),
        // Legacy binary workbooks are not zip archives.
        ".xls" if cfg!(feature = "xlsx") => Err(IngestError::UnsupportedFormat(ext)),
        ".xls" => Err(missing_xlsx()),
        _ => Err(IngestError::UnsupportedFormat(ext)),
    }
}

/// Load briefs from a CSV file with a header row.
pub fn load_briefs_from_csv(path: impl AsRef<Path>) -> Result<Vec<ContentBrief>, IngestError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();

    let mut briefs = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = zip_row(&headers, record.iter());
        briefs.push(ContentBrief::from_row(&row));
    }

    tracing::info!(path = %path.display(), briefs = briefs.len(), "Loaded briefs from CSV");
    Ok(briefs)
}

#[cfg(feature = "xlsx")]
fn load_briefs_from_xlsx(path: &Path) -> Result<Vec<ContentBrief>, IngestError> {
    let mut rows = xlsx::read_first_sheet(path)?.into_iter();

    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row.iter().map(|h| normalize_header(h)).collect(),
        None => return Ok(Vec::new()),
    };

    let briefs: Vec<ContentBrief> = rows
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|row| ContentBrief::from_row(&zip_row(&headers, row.iter().map(String::as_str))))
        .collect();

    tracing::info!(path = %path.display(), briefs = briefs.len(), "Loaded briefs from XLSX");
    Ok(briefs)
}

#[cfg(not(feature = "xlsx"))]
fn load_briefs_from_xlsx(_path: &Path) -> Result<Vec<ContentBrief>, IngestError> {
    Err(missing_xlsx())
}

fn missing_xlsx() -> IngestError {
    IngestError::MissingCapability(
        "XLSX ingestion requires the 'xlsx' feature; rebuild with --features xlsx".to_string(),
    )
}

fn normalize_header(header: &str) -> String {
    header.trim_start_matches('\u{feff}').trim().to_lowercase()
}

fn zip_row<'a>(
    headers: &[String],
    cells: impl Iterator<Item = &'a str>,
) -> HashMap<String, String> {
    headers
        .iter()
        .cloned()
        .zip(cells.map(str::to_string))
        .collect()
}
