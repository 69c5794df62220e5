//! Batch runner: drives one step over every eligible item of a session.
//!
//! Items run strictly one after another in session order. The session is
//! checkpointed every `checkpoint_every` items and once at the end. A
//! failing executor only ever fails its own item.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifacts::summary_path;
use crate::session::{BrandStatus, Session, SessionStore, Step, StoreError};
use crate::steps::{
    Executors, FetchOutcome, FetchRequest, PostProcessOutcome, PostProcessRequest, TriggerOutcome,
};

/// Which executor a batch applies, and to which statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// First collect attempt for `pending` items
    Trigger,
    /// Re-query upstream for `analyzing` and `collected` items
    Recheck,
    /// Retrieve reports of `analyzed` items
    Fetch,
    /// Summarize `downloaded` items
    PostProcess,
}

impl BatchKind {
    pub fn eligible(&self) -> &'static [BrandStatus] {
        match self {
            BatchKind::Trigger => &[BrandStatus::Pending],
            BatchKind::Recheck => &[BrandStatus::Analyzing, BrandStatus::Collected],
            BatchKind::Fetch => &[BrandStatus::Analyzed],
            BatchKind::PostProcess => &[BrandStatus::Downloaded],
        }
    }

    pub fn step(&self) -> Step {
        match self {
            BatchKind::Trigger | BatchKind::Recheck => Step::Collect,
            BatchKind::Fetch => Step::Download,
            BatchKind::PostProcess => Step::Summarize,
        }
    }

    /// Status held while the executor runs. Rechecks keep the item's status.
    pub fn in_flight(&self) -> Option<BrandStatus> {
        match self {
            BatchKind::Trigger => Some(BrandStatus::Collecting),
            BatchKind::Recheck => None,
            BatchKind::Fetch => Some(BrandStatus::Downloading),
            BatchKind::PostProcess => Some(BrandStatus::Summarizing),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BatchKind::Trigger => "collect",
            BatchKind::Recheck => "recheck",
            BatchKind::Fetch => "download",
            BatchKind::PostProcess => "summarize",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Interruptible sleep
#[async_trait]
pub trait Waiter: Send + Sync {
    /// Sleep for `duration` unless `cancel` fires first. Returns `false` when cancelled.
    async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> bool;
}

/// Real-time waiter
pub struct TokioWaiter;

#[async_trait]
impl Waiter for TokioWaiter {
    async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

/// Progress notifications for whatever renders them
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    BatchStarted {
        kind: BatchKind,
        count: usize,
    },
    ItemFinished {
        kind: BatchKind,
        position: usize,
        count: usize,
        brand: String,
        status: BrandStatus,
        cached: bool,
    },
    PhaseStarted {
        phase: usize,
        phases: usize,
        outstanding: usize,
        wait: Duration,
    },
    WaitRemaining {
        remaining: Duration,
    },
    PhasesSkipped,
    Exported {
        path: PathBuf,
        rows: usize,
        filled: usize,
    },
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: &ProgressEvent);

    /// Called after the initial pass and after every retry phase
    fn snapshot(&self, _session: &Session) {}
}

/// Discards every event
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: &ProgressEvent) {}
}

/// Result of one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Executor calls that finished
    pub processed: usize,
    /// Item names by their status after the batch
    pub buckets: BTreeMap<BrandStatus, Vec<String>>,
    /// Items whose call raised or reported an error
    pub errors: usize,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn names(&self, status: BrandStatus) -> &[String] {
        self.buckets.get(&status).map(Vec::as_slice).unwrap_or_default()
    }
}

enum StepResult {
    Trigger(TriggerOutcome),
    Fetch(FetchOutcome),
    PostProcess(PostProcessOutcome),
}

/// Applied outcome of one executor call
struct Applied {
    cached: bool,
    error: bool,
}

pub struct BatchRunner {
    store: SessionStore,
    executors: Executors,
    waiter: Arc<dyn Waiter>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(store: SessionStore, executors: Executors) -> Self {
        Self {
            store,
            executors,
            waiter: Arc::new(TokioWaiter),
            progress: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_waiter(mut self, waiter: Arc<dyn Waiter>) -> Self {
        self.waiter = waiter;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn waiter(&self) -> &Arc<dyn Waiter> {
        &self.waiter
    }

    pub fn progress(&self) -> &Arc<dyn ProgressSink> {
        &self.progress
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `kind` over every currently eligible item.
    ///
    /// Only persistence failures surface as `Err`; executor failures are
    /// recorded on their items.
    pub async fn run(
        &self,
        session: &mut Session,
        kind: BatchKind,
    ) -> Result<BatchReport, StoreError> {
        let indices = session.indices_in(kind.eligible());
        let mut report = BatchReport::default();
        if indices.is_empty() {
            debug!(batch = %kind, "No eligible items");
            return Ok(report);
        }

        let count = indices.len();
        let checkpoint_every = session.config.retry.checkpoint_every();
        let delay = session.config.retry.item_delay();
        info!(batch = %kind, count, "Starting batch");
        self.progress.event(&ProgressEvent::BatchStarted { kind, count });

        for (n, &idx) in indices.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let name = session.items[idx].name.clone();
            let before = session.items[idx].status;
            {
                let item = &mut session.items[idx];
                item.record_attempt(kind.step());
                if let Some(status) = kind.in_flight() {
                    item.set_status(status);
                }
            }

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                result = self.execute(kind, &name, session) => Some(result),
            };

            let Some(result) = result else {
                info!(brand = %name, batch = %kind, "Cancelled mid-step, rolling back");
                session.items[idx].set_status(before);
                report.cancelled = true;
                break;
            };

            let applied = self.apply(session, idx, kind, before, result).await;
            let status = session.items[idx].status;
            report.processed += 1;
            if applied.error {
                report.errors += 1;
            }
            report.buckets.entry(status).or_default().push(name.clone());
            self.progress.event(&ProgressEvent::ItemFinished {
                kind,
                position: n + 1,
                count,
                brand: name,
                status,
                cached: applied.cached,
            });

            if (n + 1) % checkpoint_every == 0 {
                self.store.save(session)?;
            }

            let last = n + 1 == count;
            if !applied.cached
                && !last
                && !delay.is_zero()
                && !self.waiter.wait(delay, &self.cancel).await
            {
                report.cancelled = true;
                break;
            }
        }

        self.store.save(session)?;
        info!(
            batch = %kind,
            processed = report.processed,
            errors = report.errors,
            cancelled = report.cancelled,
            "Batch finished"
        );
        Ok(report)
    }

    async fn execute(
        &self,
        kind: BatchKind,
        brand: &str,
        session: &Session,
    ) -> anyhow::Result<StepResult> {
        let config = &session.config;
        match kind {
            BatchKind::Trigger | BatchKind::Recheck => self
                .executors
                .trigger
                .trigger(brand, config.headless)
                .await
                .map(StepResult::Trigger),
            BatchKind::Fetch => self
                .executors
                .fetch
                .fetch(FetchRequest {
                    brand,
                    headless: config.headless,
                    force_regenerate: config.force_regenerate,
                    output_folder: &config.folders.raw,
                    thresholds: &config.thresholds,
                })
                .await
                .map(StepResult::Fetch),
            BatchKind::PostProcess => self
                .executors
                .postprocess
                .postprocess(PostProcessRequest {
                    brand,
                    provider: config.provider,
                    model: config.effective_model(),
                    force_regenerate: config.force_regenerate,
                    input_folder: &config.folders.raw,
                    output_folder: &config.folders.processed,
                })
                .await
                .map(StepResult::PostProcess),
        }
    }

    async fn apply(
        &self,
        session: &mut Session,
        idx: usize,
        kind: BatchKind,
        before: BrandStatus,
        result: anyhow::Result<StepResult>,
    ) -> Applied {
        let step = kind.step();
        let min_summary_chars = session.config.thresholds.min_summary_chars;
        let name = session.items[idx].name.clone();

        // (next status, served from a local artifact) or an error message
        let outcome: Result<(BrandStatus, bool), String> = match (kind, result) {
            (_, Err(err)) => Err(format!("{err:#}")),

            (BatchKind::Recheck, Ok(StepResult::Trigger(outcome))) => match outcome {
                TriggerOutcome::Analyzing | TriggerOutcome::Analyzed => {
                    Ok((outcome.status().unwrap_or(before), false))
                }
                // analysis never moves backwards to collected
                TriggerOutcome::Collected => Ok((before, false)),
                TriggerOutcome::NoBrandFound => {
                    debug!(brand = %name, "Recheck reported no brand, keeping status");
                    Ok((before, false))
                }
                TriggerOutcome::Error(message) => Err(message),
            },

            (_, Ok(StepResult::Trigger(outcome))) => match outcome {
                TriggerOutcome::Error(message) => Err(message),
                other => Ok((other.status().unwrap_or(BrandStatus::Failed), false)),
            },

            (_, Ok(StepResult::Fetch(outcome))) => match outcome {
                FetchOutcome::Downloaded { cached } => Ok((BrandStatus::Downloaded, cached)),
                FetchOutcome::Incomplete { bytes } => Err(format!(
                    "report incomplete after extended wait ({bytes} bytes)"
                )),
                FetchOutcome::Error(message) => Err(message),
            },

            (_, Ok(StepResult::PostProcess(outcome))) => match outcome {
                PostProcessOutcome::Produced { text, cached } => {
                    let chars = text.trim().chars().count();
                    if chars <= min_summary_chars {
                        Err(format!("summary too short ({chars} characters)"))
                    } else if cached {
                        Ok((BrandStatus::Summarized, true))
                    } else {
                        write_summary(&session.config.folders.processed, &name, &text)
                            .await
                            .map(|()| (BrandStatus::Summarized, false))
                            .map_err(|err| format!("failed to write summary: {err}"))
                    }
                }
                PostProcessOutcome::Failed(message) => Err(message),
            },
        };

        let item = &mut session.items[idx];
        let applied = match outcome {
            Ok((status, cached)) => {
                item.set_status(status);
                Applied {
                    cached,
                    error: false,
                }
            }
            Err(message) => {
                warn!(brand = %name, %step, error = %message, "Step failed");
                item.push_error(step, &message);
                // A failed recheck leaves the item where it was
                item.set_status(if kind == BatchKind::Recheck {
                    before
                } else {
                    BrandStatus::Failed
                });
                Applied {
                    cached: false,
                    error: true,
                }
            }
        };

        debug!(brand = %name, %step, status = %item.status, "Step applied");
        applied
    }
}

async fn write_summary(dir: &Path, brand: &str, text: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(summary_path(dir, brand), text).await
}
