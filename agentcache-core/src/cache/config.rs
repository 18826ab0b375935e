//! Configuration for the tiered cache

use crate::error::{CacheError, Result};
use crate::sector::Sector;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lowest and highest L2 threshold any sector or tuning may produce
pub const SEMANTIC_THRESHOLD_RANGE: (f64, f64) = (0.80, 0.95);

/// Configuration for the tiered cache
///
/// - L1 TTL defaults to 1 hour with 12.5% jitter so entries written together
///   do not expire together
/// - L2 is a per-model semantic cache with its own TTL
/// - L3 entries never expire; episodic decay pushes them below the floor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Base time-to-live for L1 entries
    pub default_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0)
    pub ttl_jitter: f64,

    /// Lifetime of L2 entries
    pub semantic_ttl: Duration,

    /// Nearest-neighbour candidates read per semantic query
    pub top_k: usize,

    /// Forces one L2 threshold instead of the sector profile's
    pub semantic_threshold_override: Option<f64>,

    /// Candidates within this margin of the best L2 score are "close"
    pub conflict_margin: f64,

    /// Only consider L2 entries written for the same provider and model
    pub scope_semantic_to_model: bool,

    /// Minimum decayed score for an L3 hit
    pub l3_floor: f64,

    /// Learn admitted L3 writes; retry L3 with the completed query on a miss
    pub associative_completion: bool,

    /// Synchronous recall steps for the second-chance query
    pub recall_steps: usize,

    /// Minimum agreement between the binarized probe and its completion
    pub completion_min_overlap: f64,

    /// Extra attempts per background tier write
    pub write_retries: u32,

    /// Fixed delay between tier write attempts
    pub write_retry_delay: Duration,

    /// Lifetime of the in-flight marker
    pub inflight_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            ttl_jitter: 0.125,
            semantic_ttl: Duration::from_secs(24 * 3600),
            top_k: 10,
            semantic_threshold_override: None,
            conflict_margin: 0.02,
            scope_semantic_to_model: true,
            l3_floor: 0.6,
            associative_completion: true,
            recall_steps: 3,
            completion_min_overlap: 0.5,
            write_retries: 1,
            write_retry_delay: Duration::from_millis(100),
            inflight_ttl: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(CacheError::Config("default_ttl must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::Config(
                "ttl_jitter must be between 0.0 and 1.0".into(),
            ));
        }
        if self.top_k == 0 {
            return Err(CacheError::Config("top_k must be greater than 0".into()));
        }
        if let Some(t) = self.semantic_threshold_override {
            if !(0.0..=1.0).contains(&t) {
                return Err(CacheError::Config(
                    "semantic_threshold_override must be between 0.0 and 1.0".into(),
                ));
            }
        }
        if !(0.0..=0.2).contains(&self.conflict_margin) {
            return Err(CacheError::Config(
                "conflict_margin must be between 0.0 and 0.2".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.l3_floor) {
            return Err(CacheError::Config(
                "l3_floor must be between 0.0 and 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.completion_min_overlap) {
            return Err(CacheError::Config(
                "completion_min_overlap must be between 0.0 and 1.0".into(),
            ));
        }
        if self.inflight_ttl.is_zero() {
            return Err(CacheError::Config("inflight_ttl must be positive".into()));
        }
        Ok(())
    }

    /// Calculate actual L1 TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_ttl;
        }

        let base_secs = self.default_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }

    /// L2 threshold for a sector after a tuning offset
    ///
    /// An explicit override is used as-is; sector thresholds plus the offset
    /// stay inside [`SEMANTIC_THRESHOLD_RANGE`].
    pub fn semantic_threshold(&self, sector: Sector, offset: f64) -> f64 {
        if let Some(t) = self.semantic_threshold_override {
            return t;
        }
        let (lo, hi) = SEMANTIC_THRESHOLD_RANGE;
        (sector.profile().semantic_threshold + offset).clamp(lo, hi)
    }

    /// L3 floor after a tuning offset
    pub fn decay_floor(&self, offset: f64) -> f64 {
        (self.l3_floor + offset).clamp(0.0, 1.0)
    }
}

/// Builder for cache configuration with validation
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    semantic_ttl: Option<Duration>,
    top_k: Option<usize>,
    semantic_threshold_override: Option<f64>,
    conflict_margin: Option<f64>,
    scope_semantic_to_model: Option<bool>,
    l3_floor: Option<f64>,
    associative_completion: Option<bool>,
    recall_steps: Option<usize>,
    completion_min_overlap: Option<f64>,
    write_retries: Option<u32>,
    write_retry_delay: Option<Duration>,
    inflight_ttl: Option<Duration>,
}

impl CacheConfigBuilder {
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    pub fn semantic_ttl(mut self, ttl: Duration) -> Self {
        self.semantic_ttl = Some(ttl);
        self
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    /// Use one L2 threshold for every sector
    pub fn semantic_threshold(mut self, threshold: f64) -> Self {
        self.semantic_threshold_override = Some(threshold);
        self
    }

    pub fn conflict_margin(mut self, margin: f64) -> Self {
        self.conflict_margin = Some(margin);
        self
    }

    pub fn scope_semantic_to_model(mut self, scoped: bool) -> Self {
        self.scope_semantic_to_model = Some(scoped);
        self
    }

    pub fn l3_floor(mut self, floor: f64) -> Self {
        self.l3_floor = Some(floor);
        self
    }

    pub fn associative_completion(mut self, enable: bool) -> Self {
        self.associative_completion = Some(enable);
        self
    }

    pub fn recall_steps(mut self, steps: usize) -> Self {
        self.recall_steps = Some(steps);
        self
    }

    pub fn completion_min_overlap(mut self, overlap: f64) -> Self {
        self.completion_min_overlap = Some(overlap);
        self
    }

    pub fn write_retries(mut self, retries: u32) -> Self {
        self.write_retries = Some(retries);
        self
    }

    pub fn write_retry_delay(mut self, delay: Duration) -> Self {
        self.write_retry_delay = Some(delay);
        self
    }

    pub fn inflight_ttl(mut self, ttl: Duration) -> Self {
        self.inflight_ttl = Some(ttl);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            semantic_ttl: self.semantic_ttl.unwrap_or(defaults.semantic_ttl),
            top_k: self.top_k.unwrap_or(defaults.top_k),
            semantic_threshold_override: self
                .semantic_threshold_override
                .or(defaults.semantic_threshold_override),
            conflict_margin: self.conflict_margin.unwrap_or(defaults.conflict_margin),
            scope_semantic_to_model: self
                .scope_semantic_to_model
                .unwrap_or(defaults.scope_semantic_to_model),
            l3_floor: self.l3_floor.unwrap_or(defaults.l3_floor),
            associative_completion: self
                .associative_completion
                .unwrap_or(defaults.associative_completion),
            recall_steps: self.recall_steps.unwrap_or(defaults.recall_steps),
            completion_min_overlap: self
                .completion_min_overlap
                .unwrap_or(defaults.completion_min_overlap),
            write_retries: self.write_retries.unwrap_or(defaults.write_retries),
            write_retry_delay: self.write_retry_delay.unwrap_or(defaults.write_retry_delay),
            inflight_ttl: self.inflight_ttl.unwrap_or(defaults.inflight_ttl),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Fast-moving content: short L1/L2 lifetimes, tighter L3 floor
    pub fn realtime() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            ttl_jitter: 0.15,
            semantic_ttl: Duration::from_secs(900),
            l3_floor: 0.7,
            ..Default::default()
        }
    }

    /// Reference material that rarely changes
    pub fn static_content() -> Self {
        Self {
            default_ttl: Duration::from_secs(48 * 3600),
            ttl_jitter: 0.05,
            semantic_ttl: Duration::from_secs(7 * 24 * 3600),
            ..Default::default()
        }
    }

    /// Deterministic settings for tests: no jitter, no retry delay
    pub fn testing() -> Self {
        Self {
            ttl_jitter: 0.0,
            write_retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }
}
