//! The analysis request pipeline.
//!
//! `normalize -> cache -> service -> tab store -> notify`.  Every failure is
//! absorbed here: service errors become an `error` outcome shown to the user,
//! delivery errors are dropped, and URLs that cannot be analysed are ignored.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::analysis::AnalysisClient;
use crate::cache::ResultCache;
use crate::metrics::Metrics;
use crate::normalize::{normalize, NormalizedUrl};
use crate::notify::Dispatcher;
use crate::outcome::AnalysisOutcome;
use crate::tabs::{TabEvaluation, TabId, TabStore, Ticket};
use crate::util::Clock;

/// What a single pipeline invocation ended up doing.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// The URL was absent or not http(s); nothing was touched.
    Ignored,
    /// The evaluation was written to the store and the tab was notified.
    Recorded {
        evaluation: TabEvaluation,
        from_cache: bool,
    },
    /// A newer invocation for the same tab (or the tab's removal) made this
    /// result obsolete before it completed.
    Superseded,
}

/// An invocation whose ticket has been issued but whose lookup has not run
/// yet.  Issuing the ticket fixes the invocation's place in the tab's order.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingAnalysis {
    ticket: Ticket,
    url: NormalizedUrl,
}

impl PendingAnalysis {
    pub fn tab_id(&self) -> TabId {
        self.ticket.tab_id
    }

    pub fn url(&self) -> &NormalizedUrl {
        &self.url
    }
}

pub struct Pipeline {
    cache: Arc<ResultCache>,
    store: Arc<TabStore>,
    client: Arc<dyn AnalysisClient>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        cache: Arc<ResultCache>,
        store: Arc<TabStore>,
        client: Arc<dyn AnalysisClient>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache,
            store,
            client,
            dispatcher,
            clock,
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<TabStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Analyse `raw_url` on behalf of `tab_id`.
    pub async fn analyze(&self, tab_id: TabId, raw_url: Option<&str>) -> RunOutcome {
        match self.begin(tab_id, raw_url) {
            Some(pending) => self.run(pending).await,
            None => RunOutcome::Ignored,
        }
    }

    /// Normalize and take the tab's ticket without suspending.  Callers that
    /// hand the lookup to another task call this first so that invocations
    /// are ordered the way their events arrived.
    pub fn begin(&self, tab_id: TabId, raw_url: Option<&str>) -> Option<PendingAnalysis> {
        let Some(url) = normalize(raw_url) else {
            tracing::trace!(tab_id, "url not analyzable, skipping");
            return None;
        };
        self.metrics.analyses_total.fetch_add(1, Ordering::Relaxed);
        let ticket = self.store.begin(tab_id);
        Some(PendingAnalysis { ticket, url })
    }

    /// Resolve a pending invocation: cache, service, commit, notify.
    pub async fn run(&self, pending: PendingAnalysis) -> RunOutcome {
        let PendingAnalysis { ticket, url } = pending;
        let tab_id = ticket.tab_id;

        let (outcome, from_cache) = match self.cache.get(&url) {
            Some(cached) => {
                self.metrics.cache_hits_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(tab_id, url = %url, status = %cached.status, "cache hit");
                (cached, true)
            }
            None => {
                self.metrics
                    .cache_misses_total
                    .fetch_add(1, Ordering::Relaxed);
                (self.fetch(tab_id, &url).await, false)
            }
        };

        let evaluation = TabEvaluation::new(tab_id, url.clone(), &outcome, self.clock.now());
        if !self.store.commit(ticket, evaluation.clone()) {
            self.metrics
                .stale_discarded_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(tab_id, url = %url, seq = ticket.seq, "discarding superseded result");
            return RunOutcome::Superseded;
        }
        self.dispatcher.dispatch(tab_id, &url, &outcome).await;
        RunOutcome::Recorded {
            evaluation,
            from_cache,
        }
    }

    /// Ask the service.  Only successful verdicts are cached so that a
    /// transient failure is retried on the next trigger.
    async fn fetch(&self, tab_id: TabId, url: &NormalizedUrl) -> AnalysisOutcome {
        let start = Instant::now();
        match self.client.analyze(url).await {
            Ok(outcome) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                tracing::info!(
                    tab_id,
                    url = %url,
                    status = %outcome.status,
                    probability = ?outcome.probability,
                    elapsed_ms,
                    "url analyzed"
                );
                self.cache.put(url.clone(), outcome.clone());
                outcome
            }
            Err(err) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                self.metrics
                    .service_failures_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(tab_id, url = %url, error = %err, elapsed_ms, "analysis failed");
                AnalysisOutcome::error(err.to_string())
            }
        }
    }
}
