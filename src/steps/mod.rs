//! Step executors: the three external-latency operations an item passes
//! through, each behind an async trait so the runner can be driven by fakes.
//!
//! An executor returns `Err` only for unexpected failures; the runner records
//! those against the item and moves on. Expected upstream answers, including
//! "not found" and "incomplete", are outcome variants.

pub mod command;
pub mod summarize;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::llm::Provider;
use crate::session::{BrandStatus, Thresholds};

pub use command::ScraperCommand;
pub use summarize::LlmSummarizer;

/// Answer of the trigger step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Collected,
    Analyzing,
    Analyzed,
    NoBrandFound,
    Error(String),
}

impl TriggerOutcome {
    /// Parse a result tag printed by the scraper
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "collected" => TriggerOutcome::Collected,
            "analyzing" => TriggerOutcome::Analyzing,
            "analyzed" => TriggerOutcome::Analyzed,
            "no_brand_found" => TriggerOutcome::NoBrandFound,
            other => TriggerOutcome::Error(format!("unexpected collect result '{other}'")),
        }
    }

    /// Status an item moves to, `None` for an error
    pub fn status(&self) -> Option<BrandStatus> {
        match self {
            TriggerOutcome::Collected => Some(BrandStatus::Collected),
            TriggerOutcome::Analyzing => Some(BrandStatus::Analyzing),
            TriggerOutcome::Analyzed => Some(BrandStatus::Analyzed),
            TriggerOutcome::NoBrandFound => Some(BrandStatus::NoBrandFound),
            TriggerOutcome::Error(_) => None,
        }
    }
}

/// Answer of the fetch step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Raw report complete on disk; `cached` when no upstream call was made
    Downloaded { cached: bool },
    /// Report still undersized after the extended-wait retry
    Incomplete { bytes: u64 },
    Error(String),
}

/// Answer of the post-process step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcessOutcome {
    /// Summary text; `cached` when read back from an up-to-date artifact
    Produced { text: String, cached: bool },
    Failed(String),
}

pub struct FetchRequest<'a> {
    pub brand: &'a str,
    pub headless: bool,
    pub force_regenerate: bool,
    pub output_folder: &'a Path,
    pub thresholds: &'a Thresholds,
}

pub struct PostProcessRequest<'a> {
    pub brand: &'a str,
    pub provider: Provider,
    pub model: &'a str,
    pub force_regenerate: bool,
    pub input_folder: &'a Path,
    pub output_folder: &'a Path,
}

#[async_trait]
pub trait TriggerExecutor: Send + Sync {
    /// Ask upstream to start (or locate) report generation for `brand`
    async fn trigger(&self, brand: &str, headless: bool) -> anyhow::Result<TriggerOutcome>;
}

#[async_trait]
pub trait FetchExecutor: Send + Sync {
    /// Retrieve the finished raw report into `request.output_folder`
    async fn fetch(&self, request: FetchRequest<'_>) -> anyhow::Result<FetchOutcome>;
}

#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Derive summary text from the raw report in `request.input_folder`
    async fn postprocess(&self, request: PostProcessRequest<'_>)
        -> anyhow::Result<PostProcessOutcome>;
}

/// The executor set a runner drives
#[derive(Clone)]
pub struct Executors {
    pub trigger: Arc<dyn TriggerExecutor>,
    pub fetch: Arc<dyn FetchExecutor>,
    pub postprocess: Arc<dyn PostProcessor>,
}

impl Executors {
    pub fn new(
        trigger: Arc<dyn TriggerExecutor>,
        fetch: Arc<dyn FetchExecutor>,
        postprocess: Arc<dyn PostProcessor>,
    ) -> Self {
        Self {
            trigger,
            fetch,
            postprocess,
        }
    }
}
