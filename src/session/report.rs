//! Read-only views of a session: the status structure handed to UI
//! consumers, the per-item progress table, and the final tally.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{BrandItem, BrandStatus, Session, Step};
use crate::artifacts::{
    file_size, folder_stats, raw_report_path, short_size, summary_path, FolderStats,
};
use crate::runner::{ProgressEvent, ProgressSink};

/// Names listed per status before the list is cut short
pub const DISPLAY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemStatus {
    pub name: String,
    pub status: BrandStatus,
    pub attempts: BTreeMap<Step, u32>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    pub raw_bytes: Option<u64>,
    pub summary_ready: bool,
}

/// Snapshot of a session for progress rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub name: String,
    pub total: usize,
    pub summarized: usize,
    pub failed: usize,
    /// Every status, zero counts included
    pub counts: BTreeMap<BrandStatus, usize>,
    pub success_rate: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items: Vec<ItemStatus>,
}

impl SessionStatus {
    pub fn from_session(session: &Session) -> Self {
        let folders = &session.config.folders;
        let mut counts: BTreeMap<BrandStatus, usize> =
            BrandStatus::all().iter().map(|&status| (status, 0)).collect();
        for item in &session.items {
            *counts.entry(item.status).or_insert(0) += 1;
        }

        let items = session
            .items
            .iter()
            .map(|item| ItemStatus {
                name: item.name.clone(),
                status: item.status,
                attempts: item.attempts.clone(),
                last_attempt: item.last_activity(),
                errors: item.errors.clone(),
                raw_bytes: file_size(&raw_report_path(&folders.raw, &item.name)),
                summary_ready: summary_path(&folders.processed, &item.name).is_file(),
            })
            .collect();

        let count = |status: BrandStatus| counts.get(&status).copied().unwrap_or(0);
        let summarized = count(BrandStatus::Summarized);
        let failed = count(BrandStatus::Failed);
        Self {
            name: session.name().to_string(),
            total: session.items.len(),
            summarized,
            failed,
            counts,
            success_rate: success_rate(summarized, session.items.len()),
            started_at: session.started_at,
            completed_at: session.completed_at,
            items,
        }
    }
}

/// Percentage of summarized items
pub fn success_rate(summarized: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        summarized as f64 * 100.0 / total as f64
    }
}

fn step_mark(item: &BrandItem, step: Step) -> char {
    if item.attempted(step) {
        '✓'
    } else {
        '·'
    }
}

/// One row per item: status, collect/download/summarize marks, raw report
/// size and last attempt time.
pub fn render_table(session: &Session) -> String {
    let width = session
        .items
        .iter()
        .map(|item| item.name.chars().count())
        .max()
        .unwrap_or(0)
        .clamp(5, 40);

    let mut out = String::new();
    out.push_str(&format!(
        "{:<width$}  {:<18}  {:<5}  {:>6}  {}\n",
        "Brand", "Status", "C D S", "Report", "Last attempt"
    ));
    out.push_str(&format!("{}\n", "─".repeat(width + 50)));

    for item in &session.items {
        let name: String = item.name.chars().take(width).collect();
        let marks = format!(
            "{} {} {}",
            step_mark(item, Step::Collect),
            step_mark(item, Step::Download),
            step_mark(item, Step::Summarize)
        );
        let last = item
            .last_activity()
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<width$}  {:<18}  {:<5}  {:>6}  {}\n",
            name,
            item.status.label(),
            marks,
            short_size(&raw_report_path(&session.config.folders.raw, &item.name)),
            last
        ));
    }
    out
}

/// End-of-run summary
#[derive(Debug, Clone, PartialEq)]
pub struct FinalTally {
    pub name: String,
    pub total: usize,
    pub counts: BTreeMap<BrandStatus, usize>,
    pub success_rate: f64,
    pub failed: Vec<String>,
    pub not_found: Vec<String>,
    pub folders: Vec<(&'static str, FolderStats)>,
}

impl FinalTally {
    pub fn from_session(session: &Session) -> Self {
        let folders = &session.config.folders;
        let names = |status: BrandStatus| -> Vec<String> {
            session
                .items
                .iter()
                .filter(|item| item.status == status)
                .map(|item| item.name.clone())
                .collect()
        };
        let counts = session.status_counts();
        let summarized = counts.get(&BrandStatus::Summarized).copied().unwrap_or(0);

        Self {
            name: session.name().to_string(),
            total: session.items.len(),
            success_rate: success_rate(summarized, session.items.len()),
            counts,
            failed: names(BrandStatus::Failed),
            not_found: names(BrandStatus::NoBrandFound),
            folders: vec![
                ("Raw reports", folder_stats(&folders.raw)),
                ("Summaries", folder_stats(&folders.processed)),
                ("Session", folder_stats(&folders.root)),
            ],
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Session '{}' ({} brands)\n", self.name, self.total));
        out.push_str(&format!("{}\n", "─".repeat(50)));
        for (status, count) in &self.counts {
            out.push_str(&format!("  {:<20} {}\n", status.label(), count));
        }
        out.push_str(&format!("  Success rate: {:.1}%\n", self.success_rate));

        for (title, names) in [("Failed", &self.failed), ("Brand not found", &self.not_found)] {
            if names.is_empty() {
                continue;
            }
            out.push('\n');
            out.push_str(&format!("{title} ({}):\n", names.len()));
            for name in names.iter().take(DISPLAY_LIMIT) {
                out.push_str(&format!("  - {name}\n"));
            }
            if names.len() > DISPLAY_LIMIT {
                out.push_str(&format!(
                    "  ... and {} more\n",
                    names.len() - DISPLAY_LIMIT
                ));
            }
        }

        out.push('\n');
        for (label, stats) in &self.folders {
            out.push_str(&format!(
                "  {:<12} {} files, {}\n",
                label,
                stats.files,
                stats.human_size()
            ));
        }
        out
    }
}

fn minutes_seconds(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}m {:02}s", secs / 60, secs % 60)
}

/// Prints scheduler progress to stdout
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::BatchStarted { kind, count } => {
                println!();
                println!("▶ {kind}: {count} brand(s)");
            }
            ProgressEvent::ItemFinished {
                position,
                count,
                brand,
                status,
                cached,
                ..
            } => {
                let suffix = if *cached { " (cached)" } else { "" };
                println!("  [{position}/{count}] {brand} → {}{suffix}", status.label());
            }
            ProgressEvent::PhaseStarted {
                phase,
                phases,
                outstanding,
                wait,
            } => {
                println!();
                println!(
                    "Retry phase {phase}/{phases}: {outstanding} brand(s) outstanding, waiting {}",
                    minutes_seconds(*wait)
                );
            }
            ProgressEvent::WaitRemaining { remaining } => {
                println!("  {} remaining", minutes_seconds(*remaining));
            }
            ProgressEvent::PhasesSkipped => {
                println!();
                println!("All brands finished, skipping remaining retry phases");
            }
            ProgressEvent::Exported { path, rows, filled } => {
                println!("  Exported {filled}/{rows} rows to {}", path.display());
            }
        }
    }

    fn snapshot(&self, session: &Session) {
        println!();
        print!("{}", render_table(session));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::{InputSource, SessionConfig, SessionOverrides, SessionStore};
    use std::fs;
    use tempfile::TempDir;

    fn session(temp_dir: &TempDir, brands: &[&str]) -> Session {
        let store = SessionStore::new(temp_dir.path());
        let config = SessionConfig::new(
            "report",
            InputSource::from_arg("x"),
            store.folders_for("report"),
            &Config::default(),
            SessionOverrides::default(),
        );
        let mut session = Session::new(config);
        session.add_brands(brands.iter().copied());
        session
    }

    #[test]
    fn test_success_rate() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(1, 4), 25.0);
    }

    #[test]
    fn test_status_structure_counts_every_status() {
        let temp_dir = TempDir::new().unwrap();
        let mut session = session(&temp_dir, &["Acme", "Beta"]);
        session.items[0].set_status(BrandStatus::Summarized);
        fs::create_dir_all(&session.config.folders.raw).unwrap();
        fs::write(raw_report_path(&session.config.folders.raw, "Acme"), "abc").unwrap();

        let status = SessionStatus::from_session(&session);
        assert_eq!(status.total, 2);
        assert_eq!(status.summarized, 1);
        assert_eq!(status.counts.len(), BrandStatus::all().len());
        assert_eq!(status.counts[&BrandStatus::Pending], 1);
        assert_eq!(status.success_rate, 50.0);
        assert_eq!(status.items[0].raw_bytes, Some(3));
        assert_eq!(status.items[1].raw_bytes, None);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["counts"]["summarized"], 1);
        assert_eq!(json["items"][1]["status"], "pending");
    }

    #[test]
    fn test_table_marks_attempted_steps() {
        let temp_dir = TempDir::new().unwrap();
        let mut session = session(&temp_dir, &["Acme"]);
        session.items[0].record_attempt(Step::Collect);
        session.items[0].set_status(BrandStatus::Analyzed);

        let table = render_table(&session);
        let row = table.lines().nth(2).unwrap();
        assert!(row.starts_with("Acme "));
        assert!(row.contains("✓ · ·"));
        assert!(row.contains("analyzed"));
        assert!(row.contains(" - "));
    }

    #[test]
    fn test_tally_caps_name_lists() {
        let temp_dir = TempDir::new().unwrap();
        let names: Vec<String> = (0..12).map(|n| format!("Brand {n}")).collect();
        let mut session = session(&temp_dir, &names.iter().map(String::as_str).collect::<Vec<_>>());
        for item in &mut session.items {
            item.set_status(BrandStatus::Failed);
        }
        session.items[0].set_status(BrandStatus::NoBrandFound);

        let tally = FinalTally::from_session(&session);
        assert_eq!(tally.failed.len(), 11);
        assert_eq!(tally.not_found, vec!["Brand 0".to_string()]);

        let text = tally.render();
        assert!(text.contains("Failed (11):"));
        assert!(text.contains("... and 1 more"));
        assert!(text.contains("Success rate: 0.0%"));
        assert!(text.contains("Brand not found (1):"));
    }
}
