//! Resolution result caching
//!
//! In-memory, keyed by [`RequestKey`]. Only successful payloads can be
//! stored, so a transient provider failure never poisons later lookups.

use crate::types::{CacheEntry, RequestKey, ResolutionPayload};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Source of "now" for TTL checks
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// TTL memo of resolution payloads
pub struct ResolutionCache {
    entries: RwLock<HashMap<RequestKey, CacheEntry<ResolutionPayload>>>,
    /// Hard bound on entries; oldest is evicted first
    capacity: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl ResolutionCache {
    pub fn new(capacity: Option<usize>) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: Option<usize>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Get cached payload if still fresh
    pub fn get(&self, key: &RequestKey) -> Option<ResolutionPayload> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            let entry = entries.get(key)?;
            if !is_expired(entry, now) {
                return Some(entry.data.clone());
            }
        }

        // Expired. Evict only if the lock is free right now; a later read or
        // sweep will get it otherwise.
        if let Some(mut entries) = self.entries.try_write() {
            if entries.get(key).is_some_and(|e| is_expired(e, now)) {
                entries.remove(key);
                debug!(kind = ?key.kind, id = %key.identifier, "evicted expired cache entry");
            }
        }
        None
    }

    /// Store a payload for `ttl`
    pub fn put(&self, key: RequestKey, data: ResolutionPayload, ttl: Duration) {
        let now = self.clock.now();
        let mut entries = self.entries.write();

        if let Some(capacity) = self.capacity {
            if !entries.contains_key(&key) && entries.len() >= capacity {
                entries.retain(|_, e| !is_expired(e, now));
            }
            while !entries.contains_key(&key) && entries.len() >= capacity.max(1) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.created_at)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(oldest) => {
                        entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                data,
                created_at: now,
                ttl,
            },
        );
    }

    /// Drop one entry, returning whether it existed
    pub fn invalidate(&self, key: &RequestKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Clear all cache
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Remove every expired entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !is_expired(e, now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "cache sweep");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep periodically until the returned handle is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.sweep();
            }
        })
    }
}

fn is_expired(entry: &CacheEntry<ResolutionPayload>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(entry.created_at)
        .to_std()
        .map(|age| age > entry.ttl)
        .unwrap_or(false)
}
