//! Frozen run settings recorded into the session document at creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::llm::Provider;

/// Subfolder holding fetched raw reports
pub const RAW_DIR: &str = "html";
/// Subfolder holding post-processed summaries
pub const PROCESSED_DIR: &str = "summary";
pub const LOGS_DIR: &str = "logs";

/// Where the brand list of a session came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSource {
    /// Comma-separated list typed on the command line
    Inline { text: String },
    /// One brand per line
    TextFile { path: PathBuf },
    /// Tabular input; the only kind the result exporter can augment
    CsvFile { path: PathBuf },
}

impl InputSource {
    /// Classify a raw `--brands` argument by its file extension
    pub fn from_arg(arg: &str) -> Self {
        let path = Path::new(arg.trim());
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("csv") => InputSource::CsvFile {
                path: path.to_path_buf(),
            },
            Some("txt") => InputSource::TextFile {
                path: path.to_path_buf(),
            },
            _ => InputSource::Inline {
                text: arg.to_string(),
            },
        }
    }

    pub fn tabular_path(&self) -> Option<&Path> {
        match self {
            InputSource::CsvFile { path } => Some(path),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            InputSource::Inline { text } => format!("inline list ({text})"),
            InputSource::TextFile { path } | InputSource::CsvFile { path } => {
                path.display().to_string()
            }
        }
    }
}

/// Folder layout of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFolders {
    pub root: PathBuf,
    pub raw: PathBuf,
    pub processed: PathBuf,
    pub logs: PathBuf,
}

impl SessionFolders {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            raw: root.join(RAW_DIR),
            processed: root.join(PROCESSED_DIR),
            logs: root.join(LOGS_DIR),
            root,
        }
    }

    pub fn all(&self) -> [&Path; 4] {
        [&self.root, &self.raw, &self.processed, &self.logs]
    }
}

/// Pacing and retry-phase schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Wait before each retry phase, in order
    pub phase_minutes: Vec<u64>,
    /// Pause between two items of a batch
    pub item_delay_secs: u64,
    /// Items processed between two checkpoints
    pub checkpoint_every: usize,
    /// Remaining-time report interval during a phase wait
    pub progress_interval_secs: u64,
}

impl RetryPolicy {
    pub fn phases(&self) -> Vec<Duration> {
        self.phase_minutes
            .iter()
            .map(|minutes| Duration::from_secs(minutes * 60))
            .collect()
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_secs(self.item_delay_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }

    /// Checkpoint cadence, never zero
    pub fn checkpoint_every(&self) -> usize {
        self.checkpoint_every.max(1)
    }
}

/// Completeness thresholds applied by the production executors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_report_bytes: u64,
    /// Summaries must be strictly longer than this
    pub min_summary_chars: usize,
    pub fetch_wait_secs: u64,
    pub fetch_extended_wait_secs: u64,
}

/// Per-invocation overrides from the command line
#[derive(Debug, Clone, Default)]
pub struct SessionOverrides {
    pub headless: Option<bool>,
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub force_regenerate: bool,
}

/// Settings of one session, immutable after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub name: String,
    pub input: InputSource,
    pub folders: SessionFolders,
    pub retry: RetryPolicy,
    pub thresholds: Thresholds,
    pub headless: bool,
    pub provider: Provider,
    /// `None` selects the provider's default model
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub force_regenerate: bool,
    pub created_at: DateTime<Utc>,
}

impl SessionConfig {
    pub fn new(
        name: impl Into<String>,
        input: InputSource,
        folders: SessionFolders,
        config: &Config,
        overrides: SessionOverrides,
    ) -> Self {
        let pipeline = &config.pipeline;
        Self {
            name: name.into(),
            input,
            folders,
            retry: RetryPolicy {
                phase_minutes: pipeline.retry_phase_minutes.clone(),
                item_delay_secs: pipeline.item_delay_secs,
                checkpoint_every: pipeline.checkpoint_every,
                progress_interval_secs: pipeline.progress_interval_secs,
            },
            thresholds: Thresholds {
                min_report_bytes: pipeline.min_report_bytes,
                min_summary_chars: pipeline.min_summary_chars,
                fetch_wait_secs: pipeline.fetch_wait_secs,
                fetch_extended_wait_secs: pipeline.fetch_extended_wait_secs,
            },
            headless: overrides.headless.unwrap_or(config.scraper.headless),
            provider: overrides.provider.unwrap_or(config.llm.provider),
            model: overrides.model.or_else(|| config.llm.model.clone()),
            force_regenerate: overrides.force_regenerate,
            created_at: Utc::now(),
        }
    }

    /// Model name handed to the post-process step
    pub fn effective_model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}
