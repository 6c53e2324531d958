//! Browser lifecycle events and popup queries, mapped onto the pipeline.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;

use crate::notify::MessageSink;
use crate::pipeline::{PendingAnalysis, Pipeline, RunOutcome};
use crate::tabs::{TabEvaluation, TabId};

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ChangeInfo {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TabInfo {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BrowserEvent {
    #[serde(rename_all = "camelCase")]
    TabUpdated {
        tab_id: TabId,
        #[serde(default)]
        change_info: ChangeInfo,
        #[serde(default)]
        tab: Option<TabInfo>,
    },
    #[serde(rename_all = "camelCase")]
    TabActivated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TabRemoved { tab_id: TabId },
}

impl BrowserEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            BrowserEvent::TabUpdated { tab_id, .. }
            | BrowserEvent::TabActivated { tab_id, .. }
            | BrowserEvent::TabRemoved { tab_id } => *tab_id,
        }
    }
}

/// Request/response messages from the popup.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PopupRequest {
    #[serde(
        rename = "GET_STATUS",
        alias = "SAFESURF_GET_STATUS",
        rename_all = "camelCase"
    )]
    GetStatus { tab_id: TabId },
}

/// Resolves the URL a tab is currently showing.
#[async_trait::async_trait]
pub trait TabLocator: Send + Sync {
    async fn current_url(&self, tab_id: TabId) -> Option<String>;

    /// Record a URL reported for the tab by a lifecycle event.
    fn observe(&self, _tab_id: TabId, _url: &str) {}

    fn forget(&self, _tab_id: TabId) {}
}

/// Remembers the last raw URL each tab reported.
#[derive(Default)]
pub struct LastSeenUrls {
    urls: DashMap<TabId, String>,
}

impl LastSeenUrls {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TabLocator for LastSeenUrls {
    async fn current_url(&self, tab_id: TabId) -> Option<String> {
        self.urls.get(&tab_id).map(|u| u.value().clone())
    }

    fn observe(&self, tab_id: TabId, url: &str) {
        self.urls.insert(tab_id, url.to_string());
    }

    fn forget(&self, tab_id: TabId) {
        self.urls.remove(&tab_id);
    }
}

pub struct EventBindings {
    pipeline: Arc<Pipeline>,
    locator: Arc<dyn TabLocator>,
    sink: Arc<dyn MessageSink>,
}

impl EventBindings {
    pub fn new(
        pipeline: Arc<Pipeline>,
        locator: Arc<dyn TabLocator>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            pipeline,
            locator,
            sink,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Drive the pipeline for one event.  Returns `None` when the event did
    /// not lead to an analysis.
    pub async fn handle(&self, event: BrowserEvent) -> Option<RunOutcome> {
        let pending = self.admit(event).await?;
        Some(self.pipeline.run(pending).await)
    }

    /// Apply everything about `event` that fixes its order relative to other
    /// events: removals take effect, the tab is attached to the sink and a
    /// navigation takes its ticket.  Only the lookup itself is left to the
    /// returned [`PendingAnalysis`].
    pub async fn admit(&self, event: BrowserEvent) -> Option<PendingAnalysis> {
        self.pipeline
            .metrics()
            .events_total
            .fetch_add(1, Ordering::Relaxed);
        let (tab_id, target) = match event {
            BrowserEvent::TabUpdated {
                tab_id,
                change_info,
                tab,
            } => {
                let tab_url = tab.and_then(|t| t.url);
                let completed = change_info.status.as_deref() == Some("complete");
                match (completed, tab_url, change_info.url) {
                    (true, Some(url), _) => (tab_id, url),
                    (_, _, Some(url)) => (tab_id, url),
                    _ => return None,
                }
            }
            BrowserEvent::TabActivated { tab_id, url } => {
                let url = match url {
                    Some(url) => Some(url),
                    None => self.locator.current_url(tab_id).await,
                }?;
                (tab_id, url)
            }
            BrowserEvent::TabRemoved { tab_id } => {
                self.pipeline.store().remove(tab_id);
                self.locator.forget(tab_id);
                self.sink.detach(tab_id);
                tracing::debug!(tab_id, "tab removed");
                return None;
            }
        };
        self.locator.observe(tab_id, &target);
        self.sink.attach(tab_id);
        self.pipeline.begin(tab_id, Some(&target))
    }

    /// Popup pull, answered from the tab store without side effects.
    pub fn answer(&self, request: &PopupRequest) -> Option<TabEvaluation> {
        match request {
            PopupRequest::GetStatus { tab_id } => {
                self.pipeline.dispatcher().answer_status_query(*tab_id)
            }
        }
    }
}
