#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{routing::post, Json, Router};
use safesurf::analysis::{AnalysisClient, AnalysisError};
use safesurf::cache::ResultCache;
use safesurf::events::{EventBindings, LastSeenUrls};
use safesurf::metrics::Metrics;
use safesurf::notify::{ContentMessage, DeliveryError, Dispatcher, MessageSink};
use safesurf::pipeline::Pipeline;
use safesurf::tabs::{TabId, TabStore};
use safesurf::util::ManualClock;
use safesurf::{AnalysisOutcome, NormalizedUrl, RiskSet};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// A pair of notifications used to hold a request open until the test lets
/// it finish.
#[derive(Default)]
pub struct Gate {
    pub started: Notify,
    pub release: Notify,
}

pub enum Scripted {
    Verdict(serde_json::Value),
    Status(u16),
    Gated(serde_json::Value, Arc<Gate>),
}

/// Analysis client answering from a per-URL script.  Unscripted URLs come
/// back as `legitimate`.
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<HashMap<String, Scripted>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, response: Scripted) {
        self.script.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AnalysisClient for ScriptedClient {
    async fn analyze(&self, url: &NormalizedUrl) -> Result<AnalysisOutcome, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(url.to_string());
        enum Step {
            Now(serde_json::Value),
            Fail(u16),
            Wait(serde_json::Value, Arc<Gate>),
        }
        let step = match self.script.lock().unwrap().get(url.as_str()) {
            Some(Scripted::Verdict(v)) => Step::Now(v.clone()),
            Some(Scripted::Status(code)) => Step::Fail(*code),
            Some(Scripted::Gated(v, gate)) => Step::Wait(v.clone(), gate.clone()),
            None => Step::Now(serde_json::json!({"result": "legitimate", "probability": 0.01})),
        };
        match step {
            Step::Now(v) => Ok(AnalysisOutcome::from_response(v)),
            Step::Fail(code) => Err(AnalysisError::Status(code)),
            Step::Wait(v, gate) => {
                gate.started.notify_one();
                gate.release.notified().await;
                Ok(AnalysisOutcome::from_response(v))
            }
        }
    }
}

/// Sink recording every message; tabs listed in `unreachable` reject sends.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(TabId, ContentMessage)>>,
    pub unreachable: Mutex<Vec<TabId>>,
    pub attached: Mutex<Vec<TabId>>,
    pub detached: Mutex<Vec<TabId>>,
}

impl RecordingSink {
    pub fn messages_for(&self, tab_id: TabId) -> Vec<ContentMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == tab_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl MessageSink for RecordingSink {
    async fn try_send(&self, tab_id: TabId, message: &ContentMessage) -> Result<(), DeliveryError> {
        if self.unreachable.lock().unwrap().contains(&tab_id) {
            return Err(DeliveryError::Unreachable(tab_id));
        }
        self.sent.lock().unwrap().push((tab_id, message.clone()));
        Ok(())
    }

    fn attach(&self, tab_id: TabId) {
        self.attached.lock().unwrap().push(tab_id);
    }

    fn detach(&self, tab_id: TabId) {
        self.detached.lock().unwrap().push(tab_id);
    }
}

pub struct Harness {
    pub bindings: Arc<EventBindings>,
    pub pipeline: Arc<Pipeline>,
    pub client: Arc<ScriptedClient>,
    pub sink: Arc<RecordingSink>,
    pub clock: ManualClock,
}

pub const TEST_TTL_MS: u64 = 300_000;

pub fn harness() -> Harness {
    harness_with(Arc::new(ScriptedClient::new()))
}

pub fn harness_with(client: Arc<ScriptedClient>) -> Harness {
    let clock = ManualClock::default();
    let metrics = Arc::new(Metrics::default());
    let store = Arc::new(TabStore::new());
    let sink = Arc::new(RecordingSink::default());
    let cache = Arc::new(ResultCache::new(TEST_TTL_MS, 100, Arc::new(clock.clone())));
    let dispatcher = Arc::new(Dispatcher::new(
        sink.clone(),
        store.clone(),
        RiskSet::default(),
        Arc::new(clock.clone()),
        metrics.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(
        cache,
        store,
        client.clone(),
        dispatcher,
        Arc::new(clock.clone()),
        metrics,
    ));
    let bindings = Arc::new(EventBindings::new(
        pipeline.clone(),
        Arc::new(LastSeenUrls::new()),
        sink.clone(),
    ));
    Harness {
        bindings,
        pipeline,
        client,
        sink,
        clock,
    }
}

/// Spin up a mock analysis service on an ephemeral port.
pub async fn start_mock_service(router: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, handle)
}

/// Mock `/api/analyze` that echoes a fixed verdict and counts requests.
pub async fn start_counting_service(
    verdict: serde_json::Value,
) -> (SocketAddr, Arc<AtomicUsize>, JoinHandle<()>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let router = Router::new().route(
        "/api/analyze",
        post(move |Json(_body): Json<serde_json::Value>| {
            let counter = counter.clone();
            let verdict = verdict.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Json(verdict)
            }
        }),
    );
    let (addr, handle) = start_mock_service(router).await;
    (addr, hits, handle)
}
