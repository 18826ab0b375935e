//! # agentcache-core
//!
//! A cognitive cache engine that sits between an application and its LLM
//! providers.
//!
//! ## Features
//!
//! - Three-tier response cache: exact (L1), semantic (L2), decayed long-term
//!   memory (L3)
//! - Content admission gate: deterministic heuristics with an optional
//!   fail-open LLM classifier
//! - Episodic decay and recency-first conflict resolution
//! - Hopfield associative memory for pattern completion, with snapshots
//! - Markov transition graph to predict and prefetch follow-up queries
//! - Complexity routing between fast and deep-reasoning paths
//! - Bounded cross-instance tuning of scoring weights
//!
//! Only the loss of the key-value store is an error. Vector store, embedder
//! and classifier failures degrade to a cache miss or an unscreened pass.
//!
//! ## Example
//!
//! ```no_run
//! use agentcache_core::backend::{EchoProvider, HashingEmbedder, InMemoryKvStore, InMemoryVectorStore};
//! use agentcache_core::cache::CacheBackends;
//! use agentcache_core::{CognitiveEngine, EngineConfig, EngineRequest};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backends = CacheBackends {
//!         kv: Arc::new(InMemoryKvStore::new()),
//!         semantic: Arc::new(InMemoryVectorStore::new()),
//!         episodic: Arc::new(InMemoryVectorStore::new()),
//!         embedder: Arc::new(HashingEmbedder::new(256)),
//!     };
//!     let llm = Arc::new(EchoProvider::new("openai", "gpt-4o"));
//!     let engine = CognitiveEngine::new(EngineConfig::from_env()?, backends, llm, None)?;
//!
//!     let request = EngineRequest::new("What is 2+2?", "openai", "gpt-4o");
//!     let first = engine.respond(request.clone()).await?;
//!     let second = engine.respond(request).await?;
//!     println!("{:?} then {:?}", first.source(), second.source());
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod maintenance;
pub mod memory;
pub mod routing;
pub mod sector;
pub mod session;
pub mod synapse;

// Re-export main types for convenience
pub use admission::{
    build_admission_gate, AdmissionConfig, AdmissionGate, AdmissionMode, HeuristicGate,
    LlmAugmentedGate, Severity, ValidationResult,
};
pub use cache::{
    CacheBackends, CacheConfig, CachePayload, CacheStats, CacheTier, LookupContext, LookupResult,
    TieredCache,
};
pub use config::{EngineConfig, EngineConfigBuilder, MemoryConfig};
pub use engine::{CognitiveEngine, EngineRequest, EngineResponse, ResponseSource};
pub use error::{CacheError, Result};
pub use maintenance::{MaintenanceConfig, MaintenanceScheduler, ScoringWeights};
pub use memory::{AssociativeMemory, ConflictResolver};
pub use routing::{ComplexityRouter, Route, RouteDecision};
pub use sector::Sector;
pub use session::{SessionConfig, SessionStore};
pub use synapse::{Prediction, PredictiveSynapse, SynapseConfig};
