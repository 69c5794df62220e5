//! Brand source parsing: inline lists, text files and CSV tables.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::session::{brand_key, InputSource};

/// Header names tried, in order, when locating the brand column of a table.
/// The first column is used when none match.
pub const BRAND_COLUMNS: [&str; 5] = ["Brand Name", "Brand", "brand", "name", "Brand_Name"];

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot read brand source {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CSV in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("no brands found in {0}")]
    Empty(String),
}

/// Index of the brand column for a header row
pub fn detect_brand_column(headers: &csv::StringRecord) -> Option<usize> {
    BRAND_COLUMNS
        .iter()
        .find_map(|wanted| headers.iter().position(|header| header == *wanted))
        .or(if headers.is_empty() { None } else { Some(0) })
}

/// Blank cells and the `nan` marker spreadsheet exports leave behind
pub fn is_blank_brand(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case("nan")
}

/// Drop blanks and case-insensitive duplicates, keeping first occurrence
pub fn dedup_brands<I, S>(brands: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    brands
        .into_iter()
        .filter_map(|brand| {
            let brand = brand.as_ref().trim();
            if is_blank_brand(brand) || !seen.insert(brand_key(brand)) {
                None
            } else {
                Some(brand.to_string())
            }
        })
        .collect()
}

/// Read the ordered, deduplicated brand list of a source
pub fn load_brands(input: &InputSource) -> Result<Vec<String>, SourceError> {
    let raw = match input {
        InputSource::Inline { text } => parse_inline(text),
        InputSource::TextFile { path } => parse_text_file(path)?,
        InputSource::CsvFile { path } => parse_csv_file(path)?,
    };

    let brands = dedup_brands(raw);
    if brands.is_empty() {
        return Err(SourceError::Empty(input.describe()));
    }
    tracing::debug!(source = %input.describe(), count = brands.len(), "Parsed brand source");
    Ok(brands)
}

fn parse_inline(text: &str) -> Vec<String> {
    text.split(',').map(|brand| brand.trim().to_string()).collect()
}

fn parse_text_file(path: &Path) -> Result<Vec<String>, SourceError> {
    let contents = fs::read_to_string(path).map_err(|source| SourceError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents.lines().map(|line| line.trim().to_string()).collect())
}

fn parse_csv_file(path: &Path) -> Result<Vec<String>, SourceError> {
    let csv_err = |source: csv::Error| SourceError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();
    let Some(column) = detect_brand_column(&headers) else {
        return Ok(Vec::new());
    };
    tracing::debug!(column = headers.get(column).unwrap_or_default(), "Detected brand column");

    let mut brands = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        if let Some(value) = record.get(column) {
            brands.push(value.trim().to_string());
        }
    }
    Ok(brands)
}
