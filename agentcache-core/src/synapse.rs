//! Markov transition graph over query states, used to predict and prefetch
//!
//! Each source state is one sorted set `synapse:{from}` whose members are
//! successor hashes scored by observed count. Observation is a single
//! `zincrby`, so concurrent writers need no lock, and each observation
//! refreshes the source key's TTL so idle states age out as a whole.

use crate::backend::{KeyValueStore, ZRangeOptions};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const MAX_DEPTH: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynapseConfig {
    /// Out-edges considered per state
    pub top_k: usize,
    /// Only edges strictly above this are expanded
    pub expand_threshold: f64,
    /// Candidates below this are dropped
    pub min_probability: f64,
    /// Lifetime of an idle state's edges
    pub edge_ttl: Duration,
    /// Lifetime of the remembered query text
    pub text_ttl: Duration,
}

impl Default for SynapseConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            expand_threshold: 0.5,
            min_probability: 0.1,
            edge_ttl: Duration::from_secs(30 * 24 * 3600),
            text_ttl: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// A predicted next state; `next` holds its own expansion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub hash: String,
    pub probability: f64,
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next: Vec<Prediction>,
}

type PredictFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Prediction>>> + Send + 'a>>;

fn edges_key(hash: &str) -> String {
    format!("synapse:{}", hash)
}

fn text_key(hash: &str) -> String {
    format!("synapse:text:{}", hash)
}

#[derive(Clone)]
pub struct PredictiveSynapse {
    kv: Arc<dyn KeyValueStore>,
    config: SynapseConfig,
}

impl PredictiveSynapse {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: SynapseConfig) -> Self {
        Self { kv, config }
    }

    /// Count one `prev -> curr` transition; self-transitions are ignored
    pub async fn observe(&self, prev: &str, curr: &str) -> Result<()> {
        if prev == curr {
            return Ok(());
        }
        let key = edges_key(prev);
        let count = self.kv.zincrby(&key, 1.0, curr).await?;
        self.kv.expire(&key, self.config.edge_ttl).await?;
        debug!("Observed transition {} -> {} (count {})", prev, curr, count);
        Ok(())
    }

    pub async fn remember_text(&self, hash: &str, query: &str) -> Result<()> {
        self.kv
            .set(&text_key(hash), query.to_string(), Some(self.config.text_ttl))
            .await
    }

    pub async fn recall_text(&self, hash: &str) -> Result<Option<String>> {
        self.kv.get(&text_key(hash)).await
    }

    /// Likely successors of `curr`, expanded up to `depth` levels (1..=3)
    pub async fn predict(&self, curr: &str, depth: usize) -> Result<Vec<Prediction>> {
        self.expand(curr.to_string(), 1, depth.clamp(1, MAX_DEPTH)).await
    }

    fn expand(&self, hash: String, level: usize, max_depth: usize) -> PredictFuture<'_> {
        Box::pin(async move {
            let edges = self
                .kv
                .zrange(&edges_key(&hash), 0, -1, ZRangeOptions::rev_with_scores())
                .await?;
            let total: f64 = edges.iter().filter_map(|e| e.score).sum();
            if total <= 0.0 {
                return Ok(Vec::new());
            }

            let mut predictions = Vec::new();
            for edge in edges.into_iter().take(self.config.top_k) {
                let probability = edge.score.unwrap_or(0.0) / total;
                if probability < self.config.min_probability {
                    continue;
                }
                let next = if probability > self.config.expand_threshold && level < max_depth {
                    self.expand(edge.member.clone(), level + 1, max_depth).await?
                } else {
                    Vec::new()
                };
                predictions.push(Prediction {
                    hash: edge.member,
                    probability,
                    depth: level,
                    next,
                });
            }
            Ok(predictions)
        })
    }
}
