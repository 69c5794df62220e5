//! Result exporter: writes the original CSV input back out with a
//! `Brand Data` column holding each brand's summary.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifacts::summary_path;
use crate::session::{BrandItem, Session};
use crate::sources::{detect_brand_column, is_blank_brand};

pub const DATA_COLUMN: &str = "Brand Data";
pub const NOT_PROCESSED: &str = "Brand not processed in this session";
const OUTPUT_SUFFIX: &str = "_with_brand_data.csv";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("original input {} no longer exists", .0.display())]
    MissingInput(PathBuf),

    #[error("original input {} has no columns", .0.display())]
    NoColumns(PathBuf),

    #[error("CSV error on {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    /// Data rows written
    pub rows: usize,
    /// Rows filled with summary content
    pub filled: usize,
    /// Rows whose brand is not in the session
    pub unmatched: usize,
}

/// Output path for a tabular input, inside the session folder
pub fn export_path(session: &Session) -> Option<PathBuf> {
    let input = session.config.input.tabular_path()?;
    let stem = input.file_stem()?.to_string_lossy();
    Some(session.config.folders.root.join(format!("{stem}{OUTPUT_SUFFIX}")))
}

/// Export `session` if its input was a CSV file; `Ok(None)` otherwise
pub fn export_session(session: &Session) -> Result<Option<ExportSummary>, ExportError> {
    let (Some(input), Some(output)) = (session.config.input.tabular_path(), export_path(session))
    else {
        debug!(session = %session.name(), "Input is not tabular, nothing to export");
        return Ok(None);
    };
    if !input.is_file() {
        return Err(ExportError::MissingInput(input.to_path_buf()));
    }

    let csv_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: csv::Error| ExportError::Csv { path, source }
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(input)
        .map_err(csv_err(input))?;
    let mut headers = reader.headers().map_err(csv_err(input))?.clone();
    let brand_column =
        detect_brand_column(&headers).ok_or_else(|| ExportError::NoColumns(input.to_path_buf()))?;

    let data_column = match headers.iter().position(|h| h == DATA_COLUMN) {
        Some(idx) => idx,
        None => {
            headers.push_field(DATA_COLUMN);
            headers.len() - 1
        }
    };
    let width = headers.len();

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|source| ExportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp = output.with_extension("csv.tmp");
    let mut writer = csv::Writer::from_path(&tmp).map_err(csv_err(&tmp))?;
    writer.write_record(&headers).map_err(csv_err(&tmp))?;

    let mut summary = ExportSummary {
        path: output.clone(),
        rows: 0,
        filled: 0,
        unmatched: 0,
    };

    for record in reader.records() {
        let record = record.map_err(csv_err(input))?;
        let mut cells: Vec<String> = record.iter().map(ToString::to_string).collect();
        cells.resize(width.max(cells.len()), String::new());

        let brand = cells[brand_column].trim().to_string();
        if !is_blank_brand(&brand) {
            cells[data_column] = match session.get(&brand) {
                Some(item) => {
                    let (cell, filled) = cell_for(item, &session.config.folders.processed);
                    if filled {
                        summary.filled += 1;
                    }
                    cell
                }
                None => {
                    summary.unmatched += 1;
                    NOT_PROCESSED.to_string()
                }
            };
        }

        writer.write_record(&cells).map_err(csv_err(&tmp))?;
        summary.rows += 1;
    }

    writer.flush().map_err(|source| ExportError::Io {
        path: tmp.clone(),
        source,
    })?;
    drop(writer);
    fs::rename(&tmp, &output).map_err(|source| ExportError::Io {
        path: output.clone(),
        source,
    })?;

    info!(
        path = %output.display(),
        rows = summary.rows,
        filled = summary.filled,
        unmatched = summary.unmatched,
        "Exported results"
    );
    Ok(Some(summary))
}

/// Summary content, or a marker explaining why there is none
fn cell_for(item: &BrandItem, processed_dir: &Path) -> (String, bool) {
    let path = summary_path(processed_dir, &item.name);
    if !path.is_file() {
        return (format!("Summary Status: {}", item.status), false);
    }
    match fs::read_to_string(&path) {
        Ok(text) => (text.trim().to_string(), true),
        Err(err) => (format!("Error loading summary: {err}"), false),
    }
}
