//! Time-bounded verdict cache keyed by normalized URL.
//!
//! Two independent policies are composed here: [`ExpiryPolicy`] decides on
//! read whether an entry is still live, and [`FifoCapacity`] bounds the number
//! of entries on write by evicting the oldest insertion.  Access recency plays
//! no part in eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::normalize::NormalizedUrl;
use crate::outcome::AnalysisOutcome;
use crate::util::{elapsed_ms, Clock};

pub const DEFAULT_CACHE_TTL_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub outcome: AnalysisOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// Lazy expiry: an entry is live while `now - recorded_at <= ttl`.
#[derive(Clone, Copy, Debug)]
pub struct ExpiryPolicy {
    ttl_ms: u64,
}

impl ExpiryPolicy {
    pub fn new(ttl_ms: u64) -> Self {
        Self { ttl_ms }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    pub fn is_live(&self, recorded_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        elapsed_ms(recorded_at, now) <= self.ttl_ms
    }
}

/// Insertion-order bound.  Tracks keys in the order they were first inserted
/// and hands back the oldest once the bound is exceeded.
///
/// Every insert is stamped.  `forget` only drops the key from `live`, leaving
/// a tombstone in `order` that eviction skips, so both run in O(1) expected
/// time.  Tombstones are compacted once they outnumber the bound.
#[derive(Debug)]
pub struct FifoCapacity {
    capacity: usize,
    next_stamp: u64,
    order: VecDeque<(u64, NormalizedUrl)>,
    live: HashMap<NormalizedUrl, u64>,
}

impl FifoCapacity {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            next_stamp: 0,
            order: VecDeque::with_capacity(capacity + 1),
            live: HashMap::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a key that was not present before.  Returns the key to evict
    /// when the bound is now exceeded.
    pub fn record_insert(&mut self, key: NormalizedUrl) -> Option<NormalizedUrl> {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.live.insert(key.clone(), stamp);
        self.order.push_back((stamp, key));
        let evicted = if self.live.len() > self.capacity {
            self.pop_oldest()
        } else {
            None
        };
        if self.order.len() > 2 * self.capacity {
            let live = &self.live;
            self.order
                .retain(|(stamp, key)| live.get(key) == Some(stamp));
        }
        evicted
    }

    fn pop_oldest(&mut self) -> Option<NormalizedUrl> {
        while let Some((stamp, key)) = self.order.pop_front() {
            if self.live.get(&key) == Some(&stamp) {
                self.live.remove(&key);
                return Some(key);
            }
        }
        None
    }

    /// Drop a key removed for another reason (expiry) so it no longer
    /// counts against the bound.
    pub fn forget(&mut self, key: &NormalizedUrl) {
        self.live.remove(key);
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.live.clear();
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

struct Inner {
    entries: HashMap<NormalizedUrl, CacheEntry>,
    bound: FifoCapacity,
}

/// Shared verdict cache.  Every operation takes the lock briefly and never
/// across an await point.
pub struct ResultCache {
    inner: Mutex<Inner>,
    expiry: ExpiryPolicy,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    pub fn new(ttl_ms: u64, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity + 1),
                bound: FifoCapacity::new(capacity),
            }),
            expiry: ExpiryPolicy::new(ttl_ms),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the cached outcome for `key` if it has not expired.  An expired
    /// entry is removed as a side effect.
    pub fn get(&self, key: &NormalizedUrl) -> Option<AnalysisOutcome> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let recorded_at = inner.entries.get(key)?.recorded_at;
        if self.expiry.is_live(recorded_at, now) {
            return inner.entries.get(key).map(|e| e.outcome.clone());
        }
        inner.entries.remove(key);
        inner.bound.forget(key);
        tracing::trace!(url = %key, "cache entry expired");
        None
    }

    /// Insert or overwrite `key`.  An overwrite refreshes the timestamp but
    /// keeps the key's original insertion position.
    pub fn put(&self, key: NormalizedUrl, outcome: AnalysisOutcome) {
        let entry = CacheEntry {
            outcome,
            recorded_at: self.clock.now(),
        };
        let mut inner = self.lock();
        if inner.entries.insert(key.clone(), entry).is_some() {
            return;
        }
        if let Some(evicted) = inner.bound.record_insert(key) {
            inner.entries.remove(&evicted);
            tracing::trace!(url = %evicted, "cache entry evicted");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.bound.clear();
    }

    pub fn ttl_ms(&self) -> u64 {
        self.expiry.ttl_ms()
    }

    pub fn capacity(&self) -> usize {
        self.lock().bound.capacity()
    }
}
