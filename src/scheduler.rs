//! Phase scheduler: the full session run.
//!
//! A run resumes whatever was left over, pushes every item through
//! collect, download and summarize once, then works through the timed
//! retry phases while anything is still outstanding. Cancellation is
//! honoured at every await point and always ends with a save.

use chrono::Utc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::export::export_session;
use crate::runner::{BatchKind, BatchRunner, ProgressEvent};
use crate::session::{Session, StoreError};

/// How a session run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Cancelled by the user; the session is saved and resumable
    Interrupted,
    /// Unexpected failure; the session is saved in its last known state
    Errored(String),
}

/// Whether a stage ran to the end or was cut short
enum Flow {
    Continue,
    Cancelled,
}

pub struct PhaseScheduler {
    runner: BatchRunner,
}

impl PhaseScheduler {
    pub fn new(runner: BatchRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &BatchRunner {
        &self.runner
    }

    #[instrument(skip_all, fields(session = %session.name()))]
    pub async fn run(&self, session: &mut Session) -> RunOutcome {
        let outcome = match self.drive(session).await {
            Ok(Flow::Continue) => RunOutcome::Completed,
            Ok(Flow::Cancelled) => RunOutcome::Interrupted,
            Err(err) => RunOutcome::Errored(err.to_string()),
        };

        match &outcome {
            RunOutcome::Completed => info!("Session complete"),
            RunOutcome::Interrupted => {
                info!("Session interrupted");
                self.save_last_state(session);
            }
            RunOutcome::Errored(message) => {
                error!(error = %message, "Session run failed");
                self.save_last_state(session);
            }
        }
        outcome
    }

    async fn drive(&self, session: &mut Session) -> Result<Flow, StoreError> {
        if let Flow::Cancelled = self.resume(session).await? {
            return Ok(Flow::Cancelled);
        }

        info!(items = session.items.len(), "Initial pass");
        if let Flow::Cancelled = self
            .batches(
                session,
                &[BatchKind::Trigger, BatchKind::Fetch, BatchKind::PostProcess],
            )
            .await?
        {
            return Ok(Flow::Cancelled);
        }
        self.runner.progress().snapshot(session);

        let phases = session.config.retry.phases();
        let count = phases.len();
        for (n, wait) in phases.into_iter().enumerate() {
            let outstanding = session.outstanding().len();
            if outstanding == 0 {
                info!("Nothing outstanding, skipping remaining retry phases");
                self.runner.progress().event(&ProgressEvent::PhasesSkipped);
                break;
            }

            info!(
                phase = n + 1,
                phases = count,
                outstanding,
                wait_secs = wait.as_secs(),
                "Retry phase"
            );
            self.runner.progress().event(&ProgressEvent::PhaseStarted {
                phase: n + 1,
                phases: count,
                outstanding,
                wait,
            });
            self.export(session);

            let slice = session.config.retry.progress_interval();
            if let Flow::Cancelled = self.wait_phase(wait, slice).await {
                return Ok(Flow::Cancelled);
            }

            if let Flow::Cancelled = self.retry_pass(session, n + 1 == count).await? {
                return Ok(Flow::Cancelled);
            }
            self.runner.progress().snapshot(session);
        }

        session.completed_at = Some(Utc::now());
        self.runner.store().save(session)?;
        self.export(session);
        Ok(Flow::Continue)
    }

    /// Leftovers from an earlier run: interrupted steps go back to their
    /// eligible status, failures get a fresh attempt, and anything still
    /// waiting on upstream analysis is re-queried.
    async fn resume(&self, session: &mut Session) -> Result<Flow, StoreError> {
        let rolled_back = session.normalize_in_flight();
        let reset = session.reset_for_resume();
        session.completed_at = None;
        if !rolled_back.is_empty() || !reset.is_empty() {
            info!(
                rolled_back = rolled_back.len(),
                reset = reset.len(),
                "Prepared leftover items for another attempt"
            );
        }
        self.runner.store().save(session)?;

        if self.runner.cancel_token().is_cancelled() {
            return Ok(Flow::Cancelled);
        }
        self.batches(session, &[BatchKind::Recheck]).await
    }

    /// Batches run after a phase's wait. The last phase also sweeps up
    /// anything still `pending` before fetching.
    async fn retry_pass(&self, session: &mut Session, last: bool) -> Result<Flow, StoreError> {
        let kinds: &[BatchKind] = if last {
            &[
                BatchKind::Recheck,
                BatchKind::Trigger,
                BatchKind::Fetch,
                BatchKind::PostProcess,
            ]
        } else {
            &[BatchKind::Recheck, BatchKind::Fetch, BatchKind::PostProcess]
        };
        self.batches(session, kinds).await
    }

    async fn batches(
        &self,
        session: &mut Session,
        kinds: &[BatchKind],
    ) -> Result<Flow, StoreError> {
        for &kind in kinds {
            let report = self.runner.run(session, kind).await?;
            if report.cancelled || self.runner.cancel_token().is_cancelled() {
                return Ok(Flow::Cancelled);
            }
        }
        Ok(Flow::Continue)
    }

    /// Sleep through a retry phase in `progress_interval` slices
    async fn wait_phase(&self, total: Duration, slice: Duration) -> Flow {
        let mut remaining = total;
        while !remaining.is_zero() {
            self.runner
                .progress()
                .event(&ProgressEvent::WaitRemaining { remaining });
            let step = remaining.min(slice);
            if !self
                .runner
                .waiter()
                .wait(step, self.runner.cancel_token())
                .await
            {
                return Flow::Cancelled;
            }
            remaining -= step;
        }
        Flow::Continue
    }

    fn export(&self, session: &Session) {
        match export_session(session) {
            Ok(Some(summary)) => self.runner.progress().event(&ProgressEvent::Exported {
                path: summary.path,
                rows: summary.rows,
                filled: summary.filled,
            }),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Export failed"),
        }
    }

    fn save_last_state(&self, session: &mut Session) {
        if let Err(err) = self.runner.store().save(session) {
            error!(error = %err, "Failed to save session state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::runner::{ProgressSink, Waiter};
    use crate::session::{
        BrandStatus, InputSource, SessionConfig, SessionOverrides, SessionStore,
    };
    use crate::steps::{
        Executors, FetchExecutor, FetchOutcome, FetchRequest, PostProcessOutcome,
        PostProcessRequest, PostProcessor, TriggerExecutor, TriggerOutcome,
    };
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    /// Upstream that never finishes its analysis
    struct AlwaysAnalyzing;

    #[async_trait]
    impl TriggerExecutor for AlwaysAnalyzing {
        async fn trigger(&self, _brand: &str, _headless: bool) -> anyhow::Result<TriggerOutcome> {
            Ok(TriggerOutcome::Analyzing)
        }
    }

    #[async_trait]
    impl FetchExecutor for AlwaysAnalyzing {
        async fn fetch(&self, _request: FetchRequest<'_>) -> anyhow::Result<FetchOutcome> {
            Ok(FetchOutcome::Error("unreachable".into()))
        }
    }

    #[async_trait]
    impl PostProcessor for AlwaysAnalyzing {
        async fn postprocess(
            &self,
            _request: PostProcessRequest<'_>,
        ) -> anyhow::Result<PostProcessOutcome> {
            Ok(PostProcessOutcome::Failed("unreachable".into()))
        }
    }

    /// Every step succeeds; each call is logged as `<step> <brand>`
    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn log(&self, step: &str, brand: &str) {
            self.0.lock().unwrap().push(format!("{step} {brand}"));
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TriggerExecutor for Journal {
        async fn trigger(&self, brand: &str, _headless: bool) -> anyhow::Result<TriggerOutcome> {
            self.log("trigger", brand);
            Ok(TriggerOutcome::Analyzed)
        }
    }

    #[async_trait]
    impl FetchExecutor for Journal {
        async fn fetch(&self, request: FetchRequest<'_>) -> anyhow::Result<FetchOutcome> {
            self.log("fetch", request.brand);
            Ok(FetchOutcome::Downloaded { cached: false })
        }
    }

    #[async_trait]
    impl PostProcessor for Journal {
        async fn postprocess(
            &self,
            request: PostProcessRequest<'_>,
        ) -> anyhow::Result<PostProcessOutcome> {
            self.log("summarize", request.brand);
            Ok(PostProcessOutcome::Produced {
                text: format!("{}: {}", request.brand, "x".repeat(300)),
                cached: false,
            })
        }
    }

    #[derive(Default)]
    struct RecordingWaiter {
        waits: Mutex<Vec<Duration>>,
        cancel_on_first: bool,
    }

    #[async_trait]
    impl Waiter for RecordingWaiter {
        async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> bool {
            self.waits.lock().unwrap().push(duration);
            if self.cancel_on_first {
                cancel.cancel();
                return false;
            }
            true
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Events {
        fn event(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn setup(
        temp_dir: &TempDir,
        waiter: Arc<RecordingWaiter>,
        events: Arc<Events>,
    ) -> (PhaseScheduler, Session) {
        let store = SessionStore::new(temp_dir.path());
        let mut config = Config::default();
        config.pipeline.item_delay_secs = 0;
        config.pipeline.retry_phase_minutes = vec![1];
        config.pipeline.progress_interval_secs = 25;
        let session_config = SessionConfig::new(
            "slow",
            InputSource::from_arg("Acme"),
            store.folders_for("slow"),
            &config,
            SessionOverrides::default(),
        );
        let mut session = Session::new(session_config);
        session.add_brands(["Acme"]);

        let fake = Arc::new(AlwaysAnalyzing);
        let runner = BatchRunner::new(store, Executors::new(fake.clone(), fake.clone(), fake))
            .with_waiter(waiter)
            .with_progress(events);
        (PhaseScheduler::new(runner), session)
    }

    /// Acme never got triggered, Beta is waiting on upstream analysis
    fn journal_setup(temp_dir: &TempDir) -> (PhaseScheduler, Session, Arc<Journal>) {
        let (scheduler, mut session) = setup(
            temp_dir,
            Arc::new(RecordingWaiter::default()),
            Arc::new(Events::default()),
        );
        session.add_brands(["Beta"]);
        session.items[1].set_status(BrandStatus::Analyzing);

        let journal = Arc::new(Journal::default());
        let runner = BatchRunner::new(
            scheduler.runner().store().clone(),
            Executors::new(journal.clone(), journal.clone(), journal.clone()),
        );
        let scheduler = PhaseScheduler::new(runner);
        scheduler.runner().store().save(&mut session).unwrap();
        (scheduler, session, journal)
    }

    #[tokio::test]
    async fn test_final_phase_sweeps_pending_before_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, mut session, journal) = journal_setup(&temp_dir);

        scheduler.retry_pass(&mut session, true).await.unwrap();

        assert_eq!(
            journal.entries(),
            vec![
                "trigger Beta",
                "trigger Acme",
                "fetch Acme",
                "fetch Beta",
                "summarize Acme",
                "summarize Beta",
            ]
        );
        assert_eq!(session.items[0].status, BrandStatus::Summarized);
        assert_eq!(session.items[1].status, BrandStatus::Summarized);
    }

    #[tokio::test]
    async fn test_earlier_phases_leave_pending_alone() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, mut session, journal) = journal_setup(&temp_dir);

        scheduler.retry_pass(&mut session, false).await.unwrap();

        assert_eq!(
            journal.entries(),
            vec!["trigger Beta", "fetch Beta", "summarize Beta"]
        );
        assert_eq!(session.items[0].status, BrandStatus::Pending);
        assert_eq!(session.items[1].status, BrandStatus::Summarized);
    }

    #[tokio::test]
    async fn test_phase_wait_is_sliced_by_progress_interval() {
        let temp_dir = TempDir::new().unwrap();
        let waiter = Arc::new(RecordingWaiter::default());
        let events = Arc::new(Events::default());
        let (scheduler, mut session) = setup(&temp_dir, waiter.clone(), events.clone());

        let outcome = scheduler.run(&mut session).await;

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(
            *waiter.waits.lock().unwrap(),
            vec![
                Duration::from_secs(25),
                Duration::from_secs(25),
                Duration::from_secs(10)
            ]
        );
        let remaining: Vec<u64> = events
            .0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::WaitRemaining { remaining } => Some(remaining.as_secs()),
                _ => None,
            })
            .collect();
        assert_eq!(remaining, vec![60, 35, 10]);
        assert_eq!(session.items[0].status, BrandStatus::Analyzing);
        assert!(session.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_wait_interrupts_and_saves() {
        let temp_dir = TempDir::new().unwrap();
        let waiter = Arc::new(RecordingWaiter {
            cancel_on_first: true,
            ..Default::default()
        });
        let (scheduler, mut session) = setup(&temp_dir, waiter, Arc::new(Events::default()));

        let outcome = scheduler.run(&mut session).await;

        assert_eq!(outcome, RunOutcome::Interrupted);
        let stored = scheduler.runner().store().load("slow").unwrap();
        assert_eq!(stored.items[0].status, BrandStatus::Analyzing);
        assert!(stored.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_errored() {
        let temp_dir = TempDir::new().unwrap();
        let (_, mut session) = setup(
            &temp_dir,
            Arc::new(RecordingWaiter::default()),
            Arc::new(Events::default()),
        );
        // Sessions root is a regular file, so no session folder can be created
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let fake = Arc::new(AlwaysAnalyzing);
        let runner = BatchRunner::new(
            SessionStore::new(&blocker),
            Executors::new(fake.clone(), fake.clone(), fake),
        );
        session.config.folders = SessionStore::new(&blocker).folders_for("slow");

        let outcome = PhaseScheduler::new(runner).run(&mut session).await;
        assert!(matches!(outcome, RunOutcome::Errored(_)));
    }
}
