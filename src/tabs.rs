//! Per-tab evaluation state.
//!
//! Each live tab owns one slot holding its latest evaluation and the sequence
//! number of its most recent pipeline invocation.  Slots have no TTL; they
//! live until the tab is removed.  Sequence numbers come from one store-wide
//! counter, so a slot recreated after removal never matches an older ticket.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::normalize::NormalizedUrl;
use crate::outcome::{AnalysisOutcome, Status};

pub type TabId = i64;

/// What the popup sees for a tab.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabEvaluation {
    pub tab_id: TabId,
    pub url: NormalizedUrl,
    pub status: Status,
    pub probability: Option<f64>,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl TabEvaluation {
    pub fn new(
        tab_id: TabId,
        url: NormalizedUrl,
        outcome: &AnalysisOutcome,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tab_id,
            url,
            status: outcome.status,
            probability: outcome.probability,
            checked_at,
            message: outcome.message.clone(),
            raw: outcome.raw.clone(),
        }
    }
}

/// Identifies one pipeline invocation for a tab.  Only the most recently
/// issued ticket may write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticket {
    pub tab_id: TabId,
    pub seq: u64,
}

#[derive(Default)]
struct TabSlot {
    seq: u64,
    evaluation: Option<TabEvaluation>,
}

#[derive(Default)]
pub struct TabStore {
    slots: DashMap<TabId, TabSlot>,
    next_seq: AtomicU64,
}

impl TabStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional overwrite.
    pub fn set(&self, tab_id: TabId, evaluation: TabEvaluation) {
        self.slots.entry(tab_id).or_default().evaluation = Some(evaluation);
    }

    pub fn get(&self, tab_id: TabId) -> Option<TabEvaluation> {
        self.slots.get(&tab_id)?.evaluation.clone()
    }

    /// Forget the tab entirely, including its sequence counter, so that an
    /// invocation still in flight cannot write it back.
    pub fn remove(&self, tab_id: TabId) -> Option<TabEvaluation> {
        self.slots.remove(&tab_id).and_then(|(_, slot)| slot.evaluation)
    }

    pub fn begin(&self, tab_id: TabId) -> Ticket {
        let mut slot = self.slots.entry(tab_id).or_default();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        slot.seq = seq;
        Ticket { tab_id, seq }
    }

    /// Write `evaluation` if `ticket` is still the latest for its tab.
    pub fn commit(&self, ticket: Ticket, evaluation: TabEvaluation) -> bool {
        match self.slots.get_mut(&ticket.tab_id) {
            Some(mut slot) if slot.seq == ticket.seq => {
                slot.evaluation = Some(evaluation);
                true
            }
            _ => false,
        }
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.slots
            .get(&ticket.tab_id)
            .map(|slot| slot.seq == ticket.seq)
            .unwrap_or(false)
    }

    /// Number of tabs that currently hold an evaluation.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.evaluation.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
