//! Key-value store seam and the in-process reference implementation
//!
//! The engine only needs a small Redis-shaped surface: string get/set with
//! TTL, delete, expire, and sorted-set increment/range. Production
//! deployments put a real store behind [`KeyValueStore`]; tests and the CLI
//! use [`InMemoryKvStore`].

use crate::error::{CacheError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Options for [`KeyValueStore::zrange`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZRangeOptions {
    /// Order by descending score
    pub rev: bool,
    /// Include scores in the result
    pub with_scores: bool,
}

impl ZRangeOptions {
    /// Descending order with scores, the shape prediction reads
    pub fn rev_with_scores() -> Self {
        Self {
            rev: true,
            with_scores: true,
        }
    }
}

/// A sorted-set member returned by `zrange`
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: Option<f64>,
}

/// Low-latency key-value store with sorted sets
///
/// Any `Err` returned from these methods means the store itself is
/// unreachable; callers treat it as [`CacheError::StoreUnavailable`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a string value; `ttl = None` keeps it until deleted
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key of any type; returns whether something was removed
    async fn del(&self, key: &str) -> Result<bool>;

    /// Set a TTL on an existing key; returns false if the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Increment `member`'s score in the sorted set at `key`, creating both
    /// as needed. Returns the new score.
    async fn zincrby(&self, key: &str, amount: f64, member: &str) -> Result<f64>;

    /// Inclusive index range over the sorted set; negative indices count from
    /// the end (`0, -1` is the whole set)
    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        options: ZRangeOptions,
    ) -> Result<Vec<ScoredMember>>;
}

#[derive(Debug, Clone)]
struct StoredString {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct SortedSet {
    members: HashMap<String, f64>,
    expires_at: Option<DateTime<Utc>>,
}

fn is_past(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expires_at, Some(at) if now >= at)
}

fn deadline(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(3600))
}

/// Internal storage
#[derive(Default)]
struct KvState {
    strings: HashMap<String, StoredString>,
    zsets: HashMap<String, SortedSet>,
}

impl KvState {
    fn purge_if_expired(&mut self, key: &str, now: DateTime<Utc>) {
        if self
            .strings
            .get(key)
            .map(|s| is_past(s.expires_at, now))
            .unwrap_or(false)
        {
            self.strings.remove(key);
        }
        if self
            .zsets
            .get(key)
            .map(|z| is_past(z.expires_at, now))
            .unwrap_or(false)
        {
            self.zsets.remove(key);
        }
    }
}

/// In-process [`KeyValueStore`] with lazy TTL expiry
///
/// Thread-safe async access via RwLock. Expired keys are dropped when
/// touched, or in bulk by [`InMemoryKvStore::cleanup_expired`].
#[derive(Clone, Default)]
pub struct InMemoryKvStore {
    state: Arc<RwLock<KvState>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the store: every operation fails while offline
    pub fn set_offline(&self, offline: bool) {
        if offline {
            warn!("In-memory KV store switched offline");
        }
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(CacheError::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Number of live string and sorted-set keys
    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        let now = Utc::now();
        state
            .strings
            .values()
            .filter(|s| !is_past(s.expires_at, now))
            .count()
            + state
                .zsets
                .values()
                .filter(|z| !is_past(z.expires_at, now))
                .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove all expired keys, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let before = state.strings.len() + state.zsets.len();
        state.strings.retain(|_, s| !is_past(s.expires_at, now));
        state.zsets.retain(|_, z| !is_past(z.expires_at, now));
        let removed = before - (state.strings.len() + state.zsets.len());
        if removed > 0 {
            debug!("Cleaned up {} expired keys", removed);
        }
        removed
    }

    /// Drop every key
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let count = state.strings.len() + state.zsets.len();
        state.strings.clear();
        state.zsets.clear();
        info!("Cleared {} keys from in-memory store", count);
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_online()?;
        let now = Utc::now();
        {
            let state = self.state.read().await;
            match state.strings.get(key) {
                Some(s) if !is_past(s.expires_at, now) => return Ok(Some(s.value.clone())),
                None => return Ok(None),
                Some(_) => {}
            }
        }
        // Expired: drop it under the write lock
        let mut state = self.state.write().await;
        state.purge_if_expired(key, now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.check_online()?;
        let mut state = self.state.write().await;
        state.zsets.remove(key);
        state.strings.insert(
            key.to_string(),
            StoredString {
                value,
                expires_at: ttl.map(deadline),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let now = Utc::now();
        state.purge_if_expired(key, now);
        let removed_string = state.strings.remove(key).is_some();
        let removed_zset = state.zsets.remove(key).is_some();
        Ok(removed_string || removed_zset)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let now = Utc::now();
        state.purge_if_expired(key, now);
        let at = Some(deadline(ttl));
        if let Some(s) = state.strings.get_mut(key) {
            s.expires_at = at;
            return Ok(true);
        }
        if let Some(z) = state.zsets.get_mut(key) {
            z.expires_at = at;
            return Ok(true);
        }
        Ok(false)
    }

    async fn zincrby(&self, key: &str, amount: f64, member: &str) -> Result<f64> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let now = Utc::now();
        state.purge_if_expired(key, now);
        state.strings.remove(key);
        let set = state.zsets.entry(key.to_string()).or_default();
        let score = set.members.entry(member.to_string()).or_insert(0.0);
        *score += amount;
        Ok(*score)
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        options: ZRangeOptions,
    ) -> Result<Vec<ScoredMember>> {
        self.check_online()?;
        let state = self.state.read().await;
        let now = Utc::now();
        let set = match state.zsets.get(key) {
            Some(set) if !is_past(set.expires_at, now) => set,
            _ => return Ok(Vec::new()),
        };

        let mut ordered: Vec<(&String, f64)> =
            set.members.iter().map(|(m, s)| (m, *s)).collect();
        ordered.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        if options.rev {
            ordered.reverse();
        }

        let len = ordered.len() as isize;
        let resolve = |idx: isize| if idx < 0 { len + idx } else { idx };
        let from = resolve(start).max(0);
        let to = resolve(stop).min(len - 1);
        if len == 0 || from > to {
            return Ok(Vec::new());
        }

        Ok(ordered[from as usize..=to as usize]
            .iter()
            .map(|(member, score)| ScoredMember {
                member: (*member).clone(),
                score: options.with_scores.then_some(*score),
            })
            .collect())
    }
}

/// Background task for automatic expiry of the in-memory store
pub async fn start_auto_cleanup(store: InMemoryKvStore, interval: Duration) {
    info!(
        "Starting automatic KV cleanup task (interval: {:?})",
        interval
    );

    loop {
        tokio::time::sleep(interval).await;
        let removed = store.cleanup_expired().await;
        if removed > 0 {
            debug!("Auto cleanup removed {} keys", removed);
        }
    }
}
