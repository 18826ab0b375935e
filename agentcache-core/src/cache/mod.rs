//! # Tiered Response Cache
//!
//! Three tiers between a caller and its LLM provider:
//!
//! - **L1**: exact fingerprint match in the key-value store, TTL with jitter
//! - **L2**: semantic match in a vector store, per provider and model, with
//!   sector-specific thresholds and recency-based conflict resolution
//! - **L3**: long-term vector memory re-ranked by episodic decay, with an
//!   associative-completion second chance
//!
//! L1 is written on every store. L2 and L3 are written in the background and
//! only for content the [`AdmissionGate`](crate::admission::AdmissionGate)
//! approves.
//!
//! ## Example
//!
//! ```no_run
//! use agentcache_core::admission::HeuristicGate;
//! use agentcache_core::backend::{HashingEmbedder, InMemoryKvStore, InMemoryVectorStore, Usage};
//! use agentcache_core::cache::{CacheBackends, CacheConfig, CachePayload, LookupContext, TieredCache};
//! use agentcache_core::maintenance::ScoringWeights;
//! use agentcache_core::memory::{AssociativeMemory, DEFAULT_BETA};
//! use std::sync::Arc;
//! use tokio::sync::RwLock;
//!
//! # async fn example() -> agentcache_core::Result<()> {
//! let backends = CacheBackends {
//!     kv: Arc::new(InMemoryKvStore::new()),
//!     semantic: Arc::new(InMemoryVectorStore::new()),
//!     episodic: Arc::new(InMemoryVectorStore::new()),
//!     embedder: Arc::new(HashingEmbedder::new(256)),
//! };
//! let cache = TieredCache::new(
//!     CacheConfig::default(),
//!     backends,
//!     Arc::new(HeuristicGate::default()),
//!     Arc::new(RwLock::new(AssociativeMemory::new(256, DEFAULT_BETA))),
//!     Arc::new(RwLock::new(ScoringWeights::default())),
//! );
//!
//! let ctx = LookupContext::new("openai", "gpt-4o");
//! let payload = CachePayload {
//!     content: "Paris is the capital of France.".into(),
//!     usage: Usage::default(),
//!     provider: "openai".into(),
//!     model: "gpt-4o".into(),
//! };
//! cache.store("capital of France?", payload, &ctx, None).await?;
//!
//! let result = cache.lookup("Capital of  France?", &ctx).await?;
//! assert!(result.hit);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod fingerprint;
pub mod tiered;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder, SEMANTIC_THRESHOLD_RANGE};
pub use entry::{CacheEntry, CachePayload};
pub use fingerprint::{fingerprint, inflight_key, l1_key, normalize, query_hash};
pub use tiered::{
    CacheBackends, LookupContext, LookupResult, StoreOutcome, TierWriteReport, TieredCache,
    WriteStatus,
};
pub use types::{CacheKey, CacheStats, CacheTier};
