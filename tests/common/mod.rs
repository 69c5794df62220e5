//! Fakes and fixtures shared by the pipeline integration tests.
//!
//! Executors answer from a closure and record every brand they were called
//! with; the waiter records requested durations and never sleeps.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use brandscout::config::Config;
use brandscout::runner::{BatchRunner, ProgressEvent, ProgressSink, Waiter};
use brandscout::scheduler::PhaseScheduler;
use brandscout::session::{InputSource, Session, SessionConfig, SessionOverrides, SessionStore};
use brandscout::steps::{
    Executors, FetchExecutor, FetchOutcome, FetchRequest, PostProcessOutcome, PostProcessRequest,
    PostProcessor, TriggerExecutor, TriggerOutcome,
};

type Respond<T> = Box<dyn Fn(&str) -> anyhow::Result<T> + Send + Sync>;

pub struct FakeTrigger {
    respond: Respond<TriggerOutcome>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeTrigger {
    pub fn new(
        respond: impl Fn(&str) -> anyhow::Result<TriggerOutcome> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TriggerExecutor for FakeTrigger {
    async fn trigger(&self, brand: &str, _headless: bool) -> anyhow::Result<TriggerOutcome> {
        self.calls.lock().unwrap().push(brand.to_string());
        (self.respond)(brand)
    }
}

pub struct FakeFetch {
    respond: Respond<FetchOutcome>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeFetch {
    pub fn new(
        respond: impl Fn(&str) -> anyhow::Result<FetchOutcome> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchExecutor for FakeFetch {
    async fn fetch(&self, request: FetchRequest<'_>) -> anyhow::Result<FetchOutcome> {
        self.calls.lock().unwrap().push(request.brand.to_string());
        (self.respond)(request.brand)
    }
}

pub struct FakePostProcess {
    respond: Respond<PostProcessOutcome>,
    pub calls: Mutex<Vec<String>>,
}

impl FakePostProcess {
    pub fn new(
        respond: impl Fn(&str) -> anyhow::Result<PostProcessOutcome> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostProcessor for FakePostProcess {
    async fn postprocess(
        &self,
        request: PostProcessRequest<'_>,
    ) -> anyhow::Result<PostProcessOutcome> {
        self.calls.lock().unwrap().push(request.brand.to_string());
        (self.respond)(request.brand)
    }
}

/// Executor set where every step succeeds
pub struct Fakes {
    pub trigger: Arc<FakeTrigger>,
    pub fetch: Arc<FakeFetch>,
    pub postprocess: Arc<FakePostProcess>,
}

impl Fakes {
    pub fn happy() -> Self {
        Self {
            trigger: FakeTrigger::new(|_| Ok(TriggerOutcome::Analyzed)),
            fetch: FakeFetch::new(|_| Ok(FetchOutcome::Downloaded { cached: false })),
            postprocess: FakePostProcess::new(|brand| {
                Ok(PostProcessOutcome::Produced {
                    text: long_summary(brand),
                    cached: false,
                })
            }),
        }
    }

    pub fn executors(&self) -> Executors {
        Executors::new(
            self.trigger.clone(),
            self.fetch.clone(),
            self.postprocess.clone(),
        )
    }
}

/// Summary text that clears the minimum length
pub fn long_summary(brand: &str) -> String {
    let mut text = format!("{brand}: ");
    while text.chars().count() < 150 {
        text.push('x');
    }
    text
}

#[derive(Default)]
pub struct RecordingWaiter {
    pub waits: Mutex<Vec<Duration>>,
}

impl RecordingWaiter {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Waiter for RecordingWaiter {
    async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        self.waits.lock().unwrap().push(duration);
        !cancel.is_cancelled()
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn event(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Application config with no pacing and a single one-minute retry phase
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.pipeline.item_delay_secs = 0;
    config.pipeline.retry_phase_minutes = vec![1];
    config
}

pub fn session_config(
    store: &SessionStore,
    name: &str,
    input: InputSource,
    config: &Config,
) -> SessionConfig {
    SessionConfig::new(
        name,
        input,
        store.folders_for(name),
        config,
        SessionOverrides::default(),
    )
}

/// Fresh session with `brands`, saved to `root`
pub fn new_session(
    root: &Path,
    name: &str,
    brands: &[&str],
    config: &Config,
) -> (SessionStore, Session) {
    let store = SessionStore::new(root);
    let brands: Vec<String> = brands.iter().map(ToString::to_string).collect();
    let input = InputSource::from_arg(&brands.join(","));
    let (session, _) = store
        .create_or_merge(session_config(&store, name, input, config), &brands)
        .unwrap();
    (store, session)
}

pub struct Harness {
    pub waiter: Arc<RecordingWaiter>,
    pub progress: Arc<RecordingProgress>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            waiter: Arc::new(RecordingWaiter::default()),
            progress: Arc::new(RecordingProgress::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn runner(&self, store: SessionStore, executors: Executors) -> BatchRunner {
        BatchRunner::new(store, executors)
            .with_waiter(self.waiter.clone())
            .with_progress(self.progress.clone())
            .with_cancel(self.cancel.clone())
    }

    pub fn scheduler(&self, store: SessionStore, executors: Executors) -> PhaseScheduler {
        PhaseScheduler::new(self.runner(store, executors))
    }
}
