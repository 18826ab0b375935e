//! Three-tier lookup and write-through
//!
//! - L1: exact fingerprint in the KV store, O(1), TTL with jitter
//! - L2: nearest neighbours in the semantic vector store, per provider/model
//! - L3: long-term vector memory re-ranked by episodic decay, with a second
//!   chance through associative completion
//!
//! Only loss of the KV store is an error. Embedding or vector store failures
//! are logged and degrade to a miss.

use crate::admission::{AdmissionGate, ValidationResult};
use crate::backend::{cosine_similarity, EmbeddingProvider, KeyValueStore, VectorStore};
use crate::cache::config::CacheConfig;
use crate::cache::entry::{CacheEntry, CachePayload};
use crate::cache::fingerprint::{fingerprint, inflight_key, l1_key, normalize};
use crate::cache::types::{CacheStats, CacheTier, StatsCounters};
use crate::error::{CacheError, Result};
use crate::maintenance::{ScoringWeights, SharedWeights};
use crate::memory::{binarize, AssociativeMemory, Candidate, ConflictResolver};
use crate::sector::Sector;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// External stores the cache reads and writes
#[derive(Clone)]
pub struct CacheBackends {
    pub kv: Arc<dyn KeyValueStore>,
    /// L2
    pub semantic: Arc<dyn VectorStore>,
    /// L3
    pub episodic: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

/// Who is asking, which decides the fingerprint and thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct LookupContext {
    pub provider: String,
    pub model: String,
    pub sector: Sector,
}

impl LookupContext {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            sector: Sector::General,
        }
    }

    pub fn with_sector(mut self, sector: Sector) -> Self {
        self.sector = sector;
        self
    }
}

#[derive(Debug, Clone)]
pub struct LookupResult {
    pub hit: bool,
    pub tier: Option<CacheTier>,
    pub payload: Option<CachePayload>,
    /// 1.0 for L1, similarity for L2, decayed score for L3
    pub score: f64,
    pub fingerprint: String,
    /// Query embedding, when one was computed; reusable by `store`
    pub embedding: Option<Vec<f32>>,
    /// The L3 hit came from the associatively completed query
    pub completed: bool,
}

impl LookupResult {
    fn miss(fingerprint: String, embedding: Option<Vec<f32>>) -> Self {
        Self {
            hit: false,
            tier: None,
            payload: None,
            score: 0.0,
            fingerprint,
            embedding,
            completed: false,
        }
    }

    fn hit(
        fingerprint: String,
        tier: CacheTier,
        payload: CachePayload,
        score: f64,
        embedding: Option<Vec<f32>>,
    ) -> Self {
        Self {
            hit: true,
            tier: Some(tier),
            payload: Some(payload),
            score,
            fingerprint,
            embedding,
            completed: false,
        }
    }
}

/// Outcome of one background tier write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteStatus {
    Skipped,
    Written { attempts: u32 },
    Failed { attempts: u32, error: String },
}

impl WriteStatus {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteStatus::Written { .. })
    }
}

#[derive(Debug, Clone)]
pub struct TierWriteReport {
    pub admission: ValidationResult,
    pub l2: WriteStatus,
    pub l3: WriteStatus,
    /// The embedding was learned into associative memory
    pub learned: bool,
}

impl TierWriteReport {
    fn skipped(admission: ValidationResult) -> Self {
        Self {
            admission,
            l2: WriteStatus::Skipped,
            l3: WriteStatus::Skipped,
            learned: false,
        }
    }
}

/// Result of `store`: L1 is written, L2/L3 continue in the background
#[derive(Debug)]
pub struct StoreOutcome {
    pub fingerprint: String,
    pub background: JoinHandle<TierWriteReport>,
}

impl StoreOutcome {
    /// Wait for the background tier writes
    pub async fn wait(self) -> Result<TierWriteReport> {
        self.background
            .await
            .map_err(|e| CacheError::dependency("tier_writer", e))
    }
}

fn store_error(err: CacheError) -> CacheError {
    match err {
        CacheError::StoreUnavailable(_) => err,
        other => CacheError::StoreUnavailable(other.to_string()),
    }
}

#[derive(Clone)]
pub struct TieredCache {
    config: Arc<CacheConfig>,
    backends: CacheBackends,
    gate: Arc<dyn AdmissionGate>,
    memory: Arc<RwLock<AssociativeMemory>>,
    weights: SharedWeights,
    counters: Arc<StatsCounters>,
}

impl TieredCache {
    pub fn new(
        config: CacheConfig,
        backends: CacheBackends,
        gate: Arc<dyn AdmissionGate>,
        memory: Arc<RwLock<AssociativeMemory>>,
        weights: SharedWeights,
    ) -> Self {
        info!("Initializing tiered cache with config: {:?}", config);
        Self {
            config: Arc::new(config),
            backends,
            gate,
            memory,
            weights,
            counters: Arc::new(StatsCounters::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn memory(&self) -> Arc<RwLock<AssociativeMemory>> {
        self.memory.clone()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// L1 -> L2 -> L3 (then L3 with the completed query)
    pub async fn lookup(&self, query: &str, ctx: &LookupContext) -> Result<LookupResult> {
        let fp = fingerprint(query, &ctx.provider, &ctx.model);

        if let Some(payload) = self.lookup_exact(&fp).await? {
            debug!("L1 hit for {}", fp);
            self.counters.record_hit(CacheTier::L1);
            return Ok(LookupResult::hit(fp, CacheTier::L1, payload, 1.0, None));
        }

        let embedding = match self.backends.embedder.embed(&normalize(query)).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Embedding failed, treating as miss: {}", e);
                StatsCounters::bump(&self.counters.misses);
                return Ok(LookupResult::miss(fp, None));
            }
        };
        let weights = *self.weights.read().await;

        if let Some((payload, score)) = self.lookup_semantic(&embedding, ctx, weights).await {
            debug!("L2 hit for {} at {:.3}", fp, score);
            self.counters.record_hit(CacheTier::L2);
            return Ok(LookupResult::hit(fp, CacheTier::L2, payload, score, Some(embedding)));
        }

        if let Some((payload, score)) = self.lookup_episodic(&embedding, ctx, weights).await {
            debug!("L3 hit for {} at {:.3}", fp, score);
            self.counters.record_hit(CacheTier::L3);
            return Ok(LookupResult::hit(fp, CacheTier::L3, payload, score, Some(embedding)));
        }

        if self.config.associative_completion {
            if let Some(completed) = self.complete(&embedding).await {
                if let Some((payload, score)) =
                    self.lookup_completed(&completed, ctx, weights).await
                {
                    debug!("L3 hit for {} via associative completion", fp);
                    self.counters.record_hit(CacheTier::L3);
                    StatsCounters::bump(&self.counters.completion_hits);
                    let mut result =
                        LookupResult::hit(fp, CacheTier::L3, payload, score, Some(embedding));
                    result.completed = true;
                    return Ok(result);
                }
            }
        }

        debug!("Cache miss for {}", fp);
        StatsCounters::bump(&self.counters.misses);
        Ok(LookupResult::miss(fp, Some(embedding)))
    }

    async fn read_exact(&self, fp: &str) -> Result<Option<CacheEntry>> {
        let raw = self
            .backends
            .kv
            .get(&l1_key(fp))
            .await
            .map_err(store_error)?;
        match raw.map(|json| serde_json::from_str::<CacheEntry>(&json)) {
            Some(Ok(entry)) => Ok(Some(entry)),
            Some(Err(e)) => {
                warn!("Ignoring unreadable L1 entry {}: {}", fp, e);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn lookup_exact(&self, fp: &str) -> Result<Option<CachePayload>> {
        let Some(mut entry) = self.read_exact(fp).await? else {
            return Ok(None);
        };
        entry.mark_accessed();
        self.touch(&entry).await;
        Ok(Some(entry.payload))
    }

    /// Write back an accessed L1 entry without extending its expiry
    async fn touch(&self, entry: &CacheEntry) {
        let ttl = entry.remaining_ttl(entry.last_accessed_at);
        if ttl.is_some_and(|t| t.is_zero()) {
            return;
        }
        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode L1 entry {}: {}", entry.key, e);
                return;
            }
        };
        if let Err(e) = self.backends.kv.set(&l1_key(&entry.key), json, ttl).await {
            warn!("Failed to record access on {}: {}", entry.key, e);
        }
    }

    async fn lookup_semantic(
        &self,
        embedding: &[f32],
        ctx: &LookupContext,
        weights: ScoringWeights,
    ) -> Option<(CachePayload, f64)> {
        let matches = match self.backends.semantic.query(embedding, self.config.top_k).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("L2 query failed, skipping tier: {}", e);
                return None;
            }
        };

        let threshold = self
            .config
            .semantic_threshold(ctx.sector, weights.semantic_offset);
        let mut candidates: Vec<(CacheEntry, f64)> = matches
            .into_iter()
            .filter_map(|m| {
                let entry = CacheEntry::from_metadata(&m.metadata).ok()?;
                let in_scope = !self.config.scope_semantic_to_model
                    || (entry.provider == ctx.provider && entry.model == ctx.model);
                (in_scope && !entry.is_expired()).then_some((entry, m.score as f64))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let best = candidates.first()?.1;
        if best < threshold {
            return None;
        }

        let floor = (best - self.config.conflict_margin).max(threshold);
        let close: Vec<(CacheEntry, f64)> = candidates
            .into_iter()
            .take_while(|(_, score)| *score >= floor)
            .collect();
        let disagree = close
            .iter()
            .any(|(entry, _)| entry.payload.content != close[0].0.payload.content);

        if !disagree {
            let (entry, score) = close.into_iter().next()?;
            return Some((entry.payload, score));
        }

        let resolver = ConflictResolver::new(ctx.sector.profile().half_life);
        let resolution = resolver.resolve_conflicts(
            close
                .into_iter()
                .map(|(entry, score)| {
                    let created_at = entry.created_at;
                    Candidate::new(entry, score, created_at)
                })
                .collect(),
        )?;
        debug!(
            "L2 conflict between {} close candidates resolved by recency",
            resolution.losers.len() + 1
        );
        Some((resolution.winner.item.payload, resolution.winner.similarity))
    }

    async fn lookup_episodic(
        &self,
        embedding: &[f32],
        ctx: &LookupContext,
        weights: ScoringWeights,
    ) -> Option<(CachePayload, f64)> {
        let matches = match self.backends.episodic.query(embedding, self.config.top_k).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("L3 query failed, skipping tier: {}", e);
                return None;
            }
        };

        let candidates: Vec<Candidate<CacheEntry>> = matches
            .into_iter()
            .filter_map(|m| {
                let entry = CacheEntry::from_metadata(&m.metadata).ok()?;
                let created_at = entry.created_at;
                let confidence = entry.confidence;
                Some(Candidate::new(entry, m.score as f64, created_at).with_confidence(confidence))
            })
            .collect();
        self.best_episodic(candidates, ctx, weights)
    }

    /// L3 again with a completed state, scored against binarized stored vectors
    async fn lookup_completed(
        &self,
        completed: &[f32],
        ctx: &LookupContext,
        weights: ScoringWeights,
    ) -> Option<(CachePayload, f64)> {
        let matches = match self.backends.episodic.query(completed, self.config.top_k).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("L3 completion query failed: {}", e);
                return None;
            }
        };

        let mut candidates = Vec::with_capacity(matches.len());
        for m in matches {
            let record = match self.backends.episodic.fetch(&m.id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!("L3 fetch of {} failed: {}", m.id, e);
                    return None;
                }
            };
            let Ok(entry) = CacheEntry::from_metadata(&record.metadata) else {
                continue;
            };
            let similarity = cosine_similarity(&binarize(&record.vector), completed) as f64;
            let created_at = entry.created_at;
            let confidence = entry.confidence;
            candidates.push(Candidate::new(entry, similarity, created_at).with_confidence(confidence));
        }
        self.best_episodic(candidates, ctx, weights)
    }

    fn best_episodic(
        &self,
        candidates: Vec<Candidate<CacheEntry>>,
        ctx: &LookupContext,
        weights: ScoringWeights,
    ) -> Option<(CachePayload, f64)> {
        let resolver = ConflictResolver::new(ctx.sector.profile().half_life);
        let top = resolver.rank(candidates, Utc::now()).into_iter().next()?;
        let floor = self.config.decay_floor(weights.decay_floor_offset);
        (top.decayed_score >= floor).then(|| (top.candidate.item.payload, top.decayed_score))
    }

    /// Associatively complete the query, if memory holds anything comparable
    async fn complete(&self, embedding: &[f32]) -> Option<Vec<f32>> {
        let memory = self.memory.read().await;
        if memory.patterns_learned() == 0 || memory.dimension() != embedding.len() {
            return None;
        }
        let probe = binarize(embedding);
        let recall = match memory.recall(&probe, self.config.recall_steps) {
            Ok(recall) => recall,
            Err(e) => {
                debug!("Associative completion skipped: {}", e);
                return None;
            }
        };
        // A sparse memory completes almost any probe; only trust nearby basins.
        let overlap = cosine_similarity(&probe, &recall.state) as f64;
        if overlap < self.config.completion_min_overlap {
            debug!("Ignoring completion with overlap {:.3}", overlap);
            return None;
        }
        Some(recall.state)
    }

    /// Write L1 now; screen and write L2/L3 in the background
    pub async fn store(
        &self,
        query: &str,
        payload: CachePayload,
        ctx: &LookupContext,
        embedding: Option<Vec<f32>>,
    ) -> Result<StoreOutcome> {
        let fp = fingerprint(query, &ctx.provider, &ctx.model);
        let ttl = self.config.ttl_with_jitter();
        let mut entry =
            CacheEntry::new(fp.clone(), CacheTier::L1, normalize(query), payload, Some(ttl));
        // Scope by who was asked, not by who answered.
        entry.provider = ctx.provider.clone();
        entry.model = ctx.model.clone();

        let json = serde_json::to_string(&entry)?;
        self.backends
            .kv
            .set(&l1_key(&fp), json, Some(ttl))
            .await
            .map_err(store_error)?;
        StatsCounters::bump(&self.counters.stores);
        debug!("Stored L1 entry {} (ttl {:?})", fp, ttl);

        let cache = self.clone();
        let sector = ctx.sector;
        let background =
            tokio::spawn(async move { cache.write_tiers(entry, sector, embedding).await });

        Ok(StoreOutcome {
            fingerprint: fp,
            background,
        })
    }

    /// Admit a free-standing memory (e.g. a demoted session turn) into L3
    ///
    /// `text` is the lookup key; `payload` is what a hit returns and what
    /// admission screens.
    pub fn remember(
        &self,
        id: String,
        text: String,
        payload: CachePayload,
        sector: Sector,
    ) -> JoinHandle<TierWriteReport> {
        let cache = self.clone();
        tokio::spawn(async move {
            let admission = cache.gate.validate_memory(&payload.content, sector).await;
            if !admission.valid {
                StatsCounters::bump(&cache.counters.rejected);
                return TierWriteReport::skipped(admission);
            }
            StatsCounters::bump(&cache.counters.admitted);

            let entry = CacheEntry::new(id, CacheTier::L3, normalize(&text), payload, None);
            let embedding = match cache.backends.embedder.embed(&entry.query).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    warn!("Embedding failed, dropping memory {}: {}", entry.key, e);
                    StatsCounters::bump(&cache.counters.failed_writes);
                    return TierWriteReport {
                        l3: WriteStatus::Failed {
                            attempts: 0,
                            error: e.to_string(),
                        },
                        ..TierWriteReport::skipped(admission)
                    };
                }
            };
            let l3 = cache.write_episodic(&entry, &embedding).await;
            let learned = l3.is_written() && cache.learn(&embedding).await;
            TierWriteReport {
                admission,
                l2: WriteStatus::Skipped,
                l3,
                learned,
            }
        })
    }

    async fn write_tiers(
        &self,
        entry: CacheEntry,
        sector: Sector,
        embedding: Option<Vec<f32>>,
    ) -> TierWriteReport {
        let admission = self.gate.validate_memory(&entry.payload.content, sector).await;
        if !admission.valid {
            StatsCounters::bump(&self.counters.rejected);
            debug!("L2/L3 write for {} refused: {}", entry.key, admission.reason);
            return TierWriteReport::skipped(admission);
        }
        StatsCounters::bump(&self.counters.admitted);

        let embedding = match embedding {
            Some(embedding) => embedding,
            None => match self.backends.embedder.embed(&entry.query).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    warn!("Embedding failed, L2/L3 write for {} abandoned: {}", entry.key, e);
                    StatsCounters::bump(&self.counters.failed_writes);
                    let failed = WriteStatus::Failed {
                        attempts: 0,
                        error: e.to_string(),
                    };
                    return TierWriteReport {
                        admission,
                        l2: failed.clone(),
                        l3: failed,
                        learned: false,
                    };
                }
            },
        };

        let mut semantic = entry.clone().with_tier(CacheTier::L2);
        semantic.ttl_seconds = self.config.semantic_ttl.as_secs().max(1);
        let l2 = match semantic.to_metadata() {
            Ok(metadata) => {
                self.write_with_retry(CacheTier::L2, &self.backends.semantic, &entry.key, &embedding, metadata)
                    .await
            }
            Err(e) => WriteStatus::Failed {
                attempts: 0,
                error: e.to_string(),
            },
        };

        let l3 = self.write_episodic(&entry, &embedding).await;
        let learned = l3.is_written() && self.learn(&embedding).await;

        TierWriteReport {
            admission,
            l2,
            l3,
            learned,
        }
    }

    async fn write_episodic(&self, entry: &CacheEntry, embedding: &[f32]) -> WriteStatus {
        let mut episodic = entry.clone().with_tier(CacheTier::L3);
        episodic.ttl_seconds = 0;
        match episodic.to_metadata() {
            Ok(metadata) => {
                self.write_with_retry(CacheTier::L3, &self.backends.episodic, &entry.key, embedding, metadata)
                    .await
            }
            Err(e) => WriteStatus::Failed {
                attempts: 0,
                error: e.to_string(),
            },
        }
    }

    async fn write_with_retry(
        &self,
        tier: CacheTier,
        store: &Arc<dyn VectorStore>,
        id: &str,
        embedding: &[f32],
        metadata: Value,
    ) -> WriteStatus {
        let attempts = 1 + self.config.write_retries;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match store.upsert(id, embedding.to_vec(), metadata.clone()).await {
                Ok(()) => {
                    debug!("{} write for {} succeeded (attempt {})", tier, id, attempt);
                    return WriteStatus::Written { attempts: attempt };
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        debug!("{} write for {} failed, retrying: {}", tier, id, last_error);
                        tokio::time::sleep(self.config.write_retry_delay).await;
                    }
                }
            }
        }

        warn!(
            "Abandoning {} write for {} after {} attempts: {}",
            tier, id, attempts, last_error
        );
        StatsCounters::bump(&self.counters.failed_writes);
        WriteStatus::Failed {
            attempts,
            error: last_error,
        }
    }

    async fn learn(&self, embedding: &[f32]) -> bool {
        if !self.config.associative_completion {
            return false;
        }
        let mut memory = self.memory.write().await;
        if memory.dimension() != embedding.len() {
            debug!(
                "Skipping associative learning: memory N={}, embedding {}",
                memory.dimension(),
                embedding.len()
            );
            return false;
        }
        memory.learn(&binarize(embedding)).is_ok()
    }

    /// Claim the in-flight marker; false if another caller holds it
    ///
    /// Optimistic: read then set, not atomic across instances.
    pub async fn try_claim(&self, fingerprint: &str) -> Result<bool> {
        let key = inflight_key(fingerprint);
        let kv = &self.backends.kv;
        if kv.get(&key).await.map_err(store_error)?.is_some() {
            return Ok(false);
        }
        kv.set(&key, Utc::now().to_rfc3339(), Some(self.config.inflight_ttl))
            .await
            .map_err(store_error)?;
        Ok(true)
    }

    pub async fn release(&self, fingerprint: &str) -> Result<()> {
        self.backends
            .kv
            .del(&inflight_key(fingerprint))
            .await
            .map_err(store_error)?;
        Ok(())
    }

    /// The L1 payload for a query, without counting a lookup
    pub async fn peek(&self, query: &str, ctx: &LookupContext) -> Result<Option<CachePayload>> {
        let fp = fingerprint(query, &ctx.provider, &ctx.model);
        Ok(self.read_exact(&fp).await?.map(|entry| entry.payload))
    }

    pub async fn contains_exact(&self, query: &str, ctx: &LookupContext) -> Result<bool> {
        Ok(self.peek(query, ctx).await?.is_some())
    }

    /// Drop the L1 entry for a query
    pub async fn invalidate(&self, query: &str, ctx: &LookupContext) -> Result<bool> {
        let fp = fingerprint(query, &ctx.provider, &ctx.model);
        let removed = self
            .backends
            .kv
            .del(&l1_key(&fp))
            .await
            .map_err(store_error)?;
        if removed {
            StatsCounters::bump(&self.counters.invalidations);
            info!("Invalidated L1 entry {}", fp);
        }
        Ok(removed)
    }
}
