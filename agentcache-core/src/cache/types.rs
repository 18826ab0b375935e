//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fingerprint key, hex-encoded SHA-256
pub type CacheKey = String;

/// Cache tier for the multi-tier architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// Tier 1: exact fingerprint match
    L1,

    /// Tier 2: semantic similarity over recent responses
    L2,

    /// Tier 3: decayed long-term vector memory
    L3,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::L1 => write!(f, "l1"),
            CacheTier::L2 => write!(f, "l2"),
            CacheTier::L3 => write!(f, "l3"),
        }
    }
}

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,

    /// Of the L3 hits, how many came from the associatively completed query
    pub completion_hits: u64,

    pub misses: u64,

    /// L1 writes
    pub stores: u64,

    /// Content admitted to L2/L3
    pub admitted: u64,

    /// Content refused by the admission gate
    pub rejected: u64,

    /// Tier writes abandoned after retries
    pub failed_writes: u64,

    /// Manual invalidations
    pub invalidations: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.l1_hits + self.l2_hits + self.l3_hits
    }

    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits() as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ l1: {}, l2: {}, l3: {}, misses: {}, hit_rate: {:.2}%, admitted: {}, rejected: {} }}",
            self.l1_hits,
            self.l2_hits,
            self.l3_hits,
            self.misses,
            self.hit_rate(),
            self.admitted,
            self.rejected
        )
    }
}

/// Lock-free counters behind [`CacheStats`]
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub l1_hits: AtomicU64,
    pub l2_hits: AtomicU64,
    pub l3_hits: AtomicU64,
    pub completion_hits: AtomicU64,
    pub misses: AtomicU64,
    pub stores: AtomicU64,
    pub admitted: AtomicU64,
    pub rejected: AtomicU64,
    pub failed_writes: AtomicU64,
    pub invalidations: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self, tier: CacheTier) {
        match tier {
            CacheTier::L1 => Self::bump(&self.l1_hits),
            CacheTier::L2 => Self::bump(&self.l2_hits),
            CacheTier::L3 => Self::bump(&self.l3_hits),
        }
    }

    pub fn snapshot(&self) -> CacheStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheStats {
            l1_hits: load(&self.l1_hits),
            l2_hits: load(&self.l2_hits),
            l3_hits: load(&self.l3_hits),
            completion_hits: load(&self.completion_hits),
            misses: load(&self.misses),
            stores: load(&self.stores),
            admitted: load(&self.admitted),
            rejected: load(&self.rejected),
            failed_writes: load(&self.failed_writes),
            invalidations: load(&self.invalidations),
        }
    }
}
