//! Delivery of evaluation results to the content layer and the popup.
//!
//! Pushes go through the [`MessageSink`] capability and are best effort: a tab
//! that cannot receive messages (browser-internal pages, discarded tabs, a
//! content layer that never attached) simply misses the notification.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::Metrics;
use crate::normalize::NormalizedUrl;
use crate::outcome::{AnalysisOutcome, RiskSet, Status};
use crate::tabs::{TabEvaluation, TabId, TabStore};
use crate::util::Clock;

pub const DEFAULT_OUTBOX_CAPACITY: usize = 32;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WarningPayload {
    pub url: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Fire-and-forget messages for the content overlay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentMessage {
    #[serde(rename = "WARNING", alias = "SAFESURF_WARNING")]
    Warning { payload: WarningPayload },
    #[serde(rename = "CLEAR", alias = "SAFESURF_CLEAR")]
    Clear,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("tab {0} cannot receive messages")]
    Unreachable(TabId),
    #[error("outbox for tab {0} is full")]
    Full(TabId),
}

#[async_trait::async_trait]
pub trait MessageSink: Send + Sync {
    async fn try_send(&self, tab_id: TabId, message: &ContentMessage) -> Result<(), DeliveryError>;

    /// Called when an event for the tab is accepted.
    fn attach(&self, _tab_id: TabId) {}

    /// Called when the tab goes away.
    fn detach(&self, _tab_id: TabId) {}
}

/// In-memory sink holding a bounded queue per tab.  A tab becomes reachable
/// once a lifecycle event for it is accepted ([`MessageSink::attach`] or an
/// explicit [`OutboxSink::open`]) and stops being reachable when it is closed.
/// Polling never registers a tab.
pub struct OutboxSink {
    queues: DashMap<TabId, VecDeque<ContentMessage>>,
    capacity: usize,
}

impl OutboxSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn open(&self, tab_id: TabId) {
        self.queues.entry(tab_id).or_default();
    }

    pub fn close(&self, tab_id: TabId) {
        self.queues.remove(&tab_id);
    }

    pub fn is_open(&self, tab_id: TabId) -> bool {
        self.queues.contains_key(&tab_id)
    }

    /// Take every queued message for the tab.  Unknown tabs yield nothing.
    pub fn drain(&self, tab_id: TabId) -> Vec<ContentMessage> {
        let Some(mut queue) = self.queues.get_mut(&tab_id) else {
            return Vec::new();
        };
        let drained = queue.drain(..).collect();
        drained
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

impl Default for OutboxSink {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }
}

#[async_trait::async_trait]
impl MessageSink for OutboxSink {
    async fn try_send(&self, tab_id: TabId, message: &ContentMessage) -> Result<(), DeliveryError> {
        let mut queue = self
            .queues
            .get_mut(&tab_id)
            .ok_or(DeliveryError::Unreachable(tab_id))?;
        if queue.len() >= self.capacity {
            return Err(DeliveryError::Full(tab_id));
        }
        queue.push_back(message.clone());
        Ok(())
    }

    fn attach(&self, tab_id: TabId) {
        self.open(tab_id);
    }

    fn detach(&self, tab_id: TabId) {
        self.close(tab_id);
    }
}

pub struct Dispatcher {
    sink: Arc<dyn MessageSink>,
    store: Arc<TabStore>,
    risk: RiskSet,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        store: Arc<TabStore>,
        risk: RiskSet,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            sink,
            store,
            risk,
            clock,
            metrics,
        }
    }

    pub fn risk_set(&self) -> &RiskSet {
        &self.risk
    }

    /// Errors and risky statuses get a warning; everything else clears.
    pub async fn dispatch(&self, tab_id: TabId, url: &NormalizedUrl, outcome: &AnalysisOutcome) {
        if outcome.is_error() || self.risk.contains(outcome.status) {
            self.push_warning(tab_id, url, outcome).await;
        } else {
            self.push_clear(tab_id).await;
        }
    }

    pub async fn push_warning(&self, tab_id: TabId, url: &NormalizedUrl, outcome: &AnalysisOutcome) {
        let message = ContentMessage::Warning {
            payload: WarningPayload {
                url: url.to_string(),
                status: outcome.status,
                probability: outcome.probability,
                timestamp: self.clock.now(),
                message: outcome.message.clone(),
            },
        };
        self.send(tab_id, &message).await;
    }

    pub async fn push_clear(&self, tab_id: TabId) {
        self.send(tab_id, &ContentMessage::Clear).await;
    }

    /// Popup pull.  Reads the store only; never triggers an analysis.
    pub fn answer_status_query(&self, tab_id: TabId) -> Option<TabEvaluation> {
        self.store.get(tab_id)
    }

    async fn send(&self, tab_id: TabId, message: &ContentMessage) {
        if let Err(err) = self.sink.try_send(tab_id, message).await {
            self.metrics
                .deliveries_failed_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(tab_id, error = %err, "content message not delivered");
        }
    }
}
