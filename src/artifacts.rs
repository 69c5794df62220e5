//! Deterministic artifact naming and the on-disk completeness checks that
//! back up (and sometimes contradict) an item's recorded status.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// File stem shared by both artifacts of a brand: spaces and path
/// separators become underscores, everything lowercased. Leading dots are
/// dropped so the stem is always a single visible path component.
pub fn artifact_stem(brand: &str) -> String {
    let stem: String = brand
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .to_lowercase();

    match stem.trim_start_matches('.') {
        "" => "_".to_string(),
        rest => rest.to_string(),
    }
}

pub fn raw_report_path(raw_dir: &Path, brand: &str) -> PathBuf {
    raw_dir.join(format!("{}_report.html", artifact_stem(brand)))
}

pub fn summary_path(processed_dir: &Path, brand: &str) -> PathBuf {
    processed_dir.join(format!("{}_analysis.txt", artifact_stem(brand)))
}

pub fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(std::fs::Metadata::is_file)
        .map(|meta| meta.len())
}

/// A fetched report counts as complete at or above `min_bytes`
pub fn is_complete_report(path: &Path, min_bytes: u64) -> bool {
    file_size(path).is_some_and(|size| size >= min_bytes)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// A summary must be regenerated when it is missing or older than its report
pub fn summary_is_stale(report: &Path, summary: &Path) -> bool {
    match (modified(report), modified(summary)) {
        (_, None) => true,
        (Some(report_time), Some(summary_time)) => report_time > summary_time,
        (None, Some(_)) => false,
    }
}

/// File count and total size of a folder tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStats {
    pub files: usize,
    pub bytes: u64,
}

impl FolderStats {
    pub fn human_size(&self) -> String {
        human_size(self.bytes)
    }
}

/// Walk `dir` recursively, skipping hidden files. A missing folder is empty.
pub fn folder_stats(dir: &Path) -> FolderStats {
    let mut stats = FolderStats::default();
    let Ok(entries) = fs::read_dir(dir) else {
        return stats;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            let nested = folder_stats(&path);
            stats.files += nested.files;
            stats.bytes += nested.bytes;
        } else if let Some(size) = file_size(&path) {
            stats.files += 1;
            stats.bytes += size;
        }
    }
    stats
}

pub fn human_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let value = bytes as f64;
    if value < KB {
        format!("{bytes} B")
    } else if value < KB * KB {
        format!("{:.1} KB", value / KB)
    } else if value < KB * KB * KB {
        format!("{:.1} MB", value / (KB * KB))
    } else {
        format!("{:.1} GB", value / (KB * KB * KB))
    }
}

/// Compact size for table cells, `-` when the file is absent
pub fn short_size(path: &Path) -> String {
    match file_size(path) {
        None => "-".to_string(),
        Some(size) if size < 1024 => format!("{size}B"),
        Some(size) if size < 1024 * 1024 => format!("{}KB", size / 1024),
        Some(size) => format!("{}MB", size / (1024 * 1024)),
    }
}
