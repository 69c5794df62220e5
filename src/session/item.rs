//! Per-brand processing record and the closed status set it moves through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Processing status of a single brand.
///
/// Serialized as its snake_case tag; that tag is the only string form used
/// outside this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrandStatus {
    /// Not yet attempted
    Pending,
    /// Trigger step in flight
    Collecting,
    /// Upstream has no record of the brand
    NoBrandFound,
    /// Upstream accepted the brand, analysis not started
    Collected,
    /// Upstream analysis running
    Analyzing,
    /// Upstream report ready to fetch
    Analyzed,
    /// Fetch step in flight
    Downloading,
    /// Raw report on disk
    Downloaded,
    /// Post-process step in flight
    Summarizing,
    /// Summary on disk
    Summarized,
    Failed,
}

impl BrandStatus {
    /// Every status, in pipeline order
    pub fn all() -> &'static [BrandStatus] {
        &[
            BrandStatus::Pending,
            BrandStatus::Collecting,
            BrandStatus::NoBrandFound,
            BrandStatus::Collected,
            BrandStatus::Analyzing,
            BrandStatus::Analyzed,
            BrandStatus::Downloading,
            BrandStatus::Downloaded,
            BrandStatus::Summarizing,
            BrandStatus::Summarized,
            BrandStatus::Failed,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BrandStatus::Pending => "pending",
            BrandStatus::Collecting => "collecting",
            BrandStatus::NoBrandFound => "no_brand_found",
            BrandStatus::Collected => "collected",
            BrandStatus::Analyzing => "analyzing",
            BrandStatus::Analyzed => "analyzed",
            BrandStatus::Downloading => "downloading",
            BrandStatus::Downloaded => "downloaded",
            BrandStatus::Summarizing => "summarizing",
            BrandStatus::Summarized => "summarized",
            BrandStatus::Failed => "failed",
        }
    }

    /// Status with a glyph for progress tables
    pub fn label(&self) -> &'static str {
        match self {
            BrandStatus::Pending => "⏳ pending",
            BrandStatus::Collecting => "🔄 collecting",
            BrandStatus::NoBrandFound => "❌ not found",
            BrandStatus::Collected => "✅ collected",
            BrandStatus::Analyzing => "⚡ analyzing",
            BrandStatus::Analyzed => "📊 analyzed",
            BrandStatus::Downloading => "📥 downloading",
            BrandStatus::Downloaded => "💾 downloaded",
            BrandStatus::Summarizing => "🤖 summarizing",
            BrandStatus::Summarized => "📋 summarized",
            BrandStatus::Failed => "💥 failed",
        }
    }

    /// No further automatic step runs for this status within a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BrandStatus::Summarized | BrandStatus::Failed | BrandStatus::NoBrandFound
        )
    }

    /// A step executor is (or was, if the process died) running for the item
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            BrandStatus::Collecting | BrandStatus::Downloading | BrandStatus::Summarizing
        )
    }

    /// The status that made an in-flight item eligible for its step.
    /// Non in-flight statuses map to themselves.
    pub fn before_in_flight(&self) -> BrandStatus {
        match self {
            BrandStatus::Collecting => BrandStatus::Pending,
            BrandStatus::Downloading => BrandStatus::Analyzed,
            BrandStatus::Summarizing => BrandStatus::Downloaded,
            other => *other,
        }
    }
}

impl fmt::Display for BrandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BrandStatus::all()
            .iter()
            .find(|status| status.as_str() == s.trim())
            .copied()
            .ok_or_else(|| format!("unknown brand status '{s}'"))
    }
}

/// Pipeline step an attempt is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Collect,
    Download,
    Summarize,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Collect => "collect",
            Step::Download => "download",
            Step::Summarize => "summarize",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandItem {
    /// Brand name as first seen in the input
    pub name: String,
    pub status: BrandStatus,
    /// Executions per step
    #[serde(default)]
    pub attempts: BTreeMap<Step, u32>,
    /// Most recent execution per step
    #[serde(default)]
    pub last_attempt: BTreeMap<Step, DateTime<Utc>>,
    /// Append-only error log, cleared only by [`BrandItem::reset_for_retry`]
    #[serde(default)]
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BrandItem {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            status: BrandStatus::Pending,
            attempts: BTreeMap::new(),
            last_attempt: BTreeMap::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Case-insensitive identity key
    pub fn key(&self) -> String {
        brand_key(&self.name)
    }

    pub fn set_status(&mut self, status: BrandStatus) {
        self.status = status;
        self.touch();
    }

    /// Count one execution of `step` and stamp its time
    pub fn record_attempt(&mut self, step: Step) {
        let now = Utc::now();
        *self.attempts.entry(step).or_insert(0) += 1;
        self.last_attempt.insert(step, now);
        self.updated_at = now;
    }

    pub fn push_error(&mut self, step: Step, message: impl fmt::Display) {
        let attempt = self.attempts(step).max(1);
        self.errors
            .push(format!("{step} attempt {attempt} failed: {message}"));
        self.touch();
    }

    /// Back to `pending` with a clean error log
    pub fn reset_for_retry(&mut self) {
        self.status = BrandStatus::Pending;
        self.errors.clear();
        self.touch();
    }

    pub fn attempts(&self, step: Step) -> u32 {
        self.attempts.get(&step).copied().unwrap_or(0)
    }

    pub fn attempted(&self, step: Step) -> bool {
        self.attempts(step) > 0
    }

    /// Latest execution time across all steps
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_attempt.values().max().copied()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Normalized identity key for a brand name
pub fn brand_key(name: &str) -> String {
    name.trim().to_lowercase()
}
