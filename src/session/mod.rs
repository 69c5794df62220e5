//! Session aggregate: frozen settings plus one [`BrandItem`] per unique brand.

pub mod item;
pub mod report;
pub mod settings;
pub mod store;

pub use item::{brand_key, BrandItem, BrandStatus, Step};
pub use settings::{
    InputSource, RetryPolicy, SessionConfig, SessionFolders, SessionOverrides, Thresholds,
};
pub use store::{MergeSummary, SessionListing, SessionStore, StoreError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub config: SessionConfig,
    /// Unique by case-insensitive name, in first-seen order
    pub items: Vec<BrandItem>,
    pub started_at: DateTime<Utc>,
    /// Set once the scheduler loop finishes
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total: usize,
    /// Items in `summarized`
    #[serde(default)]
    pub completed_count: usize,
    /// Items in `failed`
    #[serde(default)]
    pub failed_count: usize,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            items: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            total: 0,
            completed_count: 0,
            failed_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Add brands not already present. Returns how many were added.
    pub fn add_brands<I, S>(&mut self, brands: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for brand in brands {
            let name = brand.as_ref().trim();
            if name.is_empty() || self.position(name).is_some() {
                continue;
            }
            self.items.push(BrandItem::new(name));
            added += 1;
        }
        self.refresh_counters();
        added
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        let key = brand_key(name);
        self.items.iter().position(|item| item.key() == key)
    }

    pub fn get(&self, name: &str) -> Option<&BrandItem> {
        self.position(name).and_then(|idx| self.items.get(idx))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BrandItem> {
        let idx = self.position(name)?;
        self.items.get_mut(idx)
    }

    /// Indices of items currently in one of `statuses`, in insertion order
    pub fn indices_in(&self, statuses: &[BrandStatus]) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| statuses.contains(&item.status))
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn count(&self, status: BrandStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    /// Items that may still make progress in this run
    pub fn outstanding(&self) -> Vec<&BrandItem> {
        self.items
            .iter()
            .filter(|item| !item.status.is_terminal())
            .collect()
    }

    pub fn status_counts(&self) -> BTreeMap<BrandStatus, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn refresh_counters(&mut self) {
        self.total = self.items.len();
        self.completed_count = self.count(BrandStatus::Summarized);
        self.failed_count = self.count(BrandStatus::Failed);
    }

    /// Roll items left in an in-flight status by a dead process back to the
    /// status that made them eligible. Returns the names touched.
    pub fn normalize_in_flight(&mut self) -> Vec<String> {
        let mut touched = Vec::new();
        for item in &mut self.items {
            if item.status.is_in_flight() {
                let previous = item.status.before_in_flight();
                tracing::info!(
                    brand = %item.name,
                    from = %item.status,
                    to = %previous,
                    "Rolling back interrupted step"
                );
                item.set_status(previous);
                touched.push(item.name.clone());
            }
        }
        touched
    }

    /// Reset `failed` and `no_brand_found` items to `pending` with a clean
    /// error log. Returns the names reset.
    pub fn reset_for_resume(&mut self) -> Vec<String> {
        let mut reset = Vec::new();
        for item in &mut self.items {
            if matches!(item.status, BrandStatus::Failed | BrandStatus::NoBrandFound) {
                tracing::debug!(brand = %item.name, from = %item.status, "Resetting for retry");
                item.reset_for_retry();
                reset.push(item.name.clone());
            }
        }
        self.refresh_counters();
        reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn session_with(brands: &[&str]) -> Session {
        let config = SessionConfig::new(
            "test",
            InputSource::from_arg("inline"),
            SessionFolders::new("/tmp/test"),
            &Config::default(),
            SessionOverrides::default(),
        );
        let mut session = Session::new(config);
        session.add_brands(brands.iter().copied());
        session
    }

    #[test]
    fn test_add_brands_dedups_case_insensitively() {
        let session = session_with(&["Acme", "acme", "ACME Corp", " Beta ", ""]);
        let names: Vec<_> = session.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "ACME Corp", "Beta"]);
        assert_eq!(session.total, 3);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut session = session_with(&["Acme Corp"]);
        assert!(session.get("acme corp").is_some());
        session
            .get_mut("ACME CORP")
            .unwrap()
            .set_status(BrandStatus::Analyzed);
        assert_eq!(session.items[0].status, BrandStatus::Analyzed);
    }

    #[test]
    fn test_indices_in_preserves_order() {
        let mut session = session_with(&["A", "B", "C"]);
        session.items[0].set_status(BrandStatus::Analyzed);
        session.items[2].set_status(BrandStatus::Analyzed);
        assert_eq!(session.indices_in(&[BrandStatus::Analyzed]), vec![0, 2]);
    }

    #[test]
    fn test_outstanding_excludes_terminal() {
        let mut session = session_with(&["A", "B", "C", "D"]);
        session.items[0].set_status(BrandStatus::Summarized);
        session.items[1].set_status(BrandStatus::Failed);
        session.items[2].set_status(BrandStatus::NoBrandFound);
        let outstanding: Vec<_> = session.outstanding().iter().map(|i| i.name.clone()).collect();
        assert_eq!(outstanding, vec!["D"]);
    }

    #[test]
    fn test_reset_for_resume() {
        let mut session = session_with(&["A", "B", "C"]);
        session.items[0].set_status(BrandStatus::Failed);
        session.items[0].push_error(Step::Download, "incomplete");
        session.items[1].set_status(BrandStatus::NoBrandFound);
        session.items[2].set_status(BrandStatus::Summarized);

        let reset = session.reset_for_resume();

        assert_eq!(reset, vec!["A", "B"]);
        assert_eq!(session.items[0].status, BrandStatus::Pending);
        assert!(session.items[0].errors.is_empty());
        assert_eq!(session.items[2].status, BrandStatus::Summarized);
    }

    #[test]
    fn test_normalize_in_flight() {
        let mut session = session_with(&["A", "B", "C", "D"]);
        session.items[0].set_status(BrandStatus::Collecting);
        session.items[1].set_status(BrandStatus::Downloading);
        session.items[2].set_status(BrandStatus::Summarizing);
        session.items[3].set_status(BrandStatus::Analyzing);

        let touched = session.normalize_in_flight();

        assert_eq!(touched.len(), 3);
        let statuses: Vec<_> = session.items.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![
                BrandStatus::Pending,
                BrandStatus::Analyzed,
                BrandStatus::Downloaded,
                BrandStatus::Analyzing
            ]
        );
    }

    #[test]
    fn test_refresh_counters() {
        let mut session = session_with(&["A", "B", "C"]);
        session.items[0].set_status(BrandStatus::Summarized);
        session.items[1].set_status(BrandStatus::Failed);
        session.refresh_counters();
        assert_eq!(
            (session.total, session.completed_count, session.failed_count),
            (3, 1, 1)
        );
        assert_eq!(session.status_counts()[&BrandStatus::Pending], 1);
    }
}
