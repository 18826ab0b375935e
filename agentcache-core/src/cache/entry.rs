//! Cache entries and their payloads

use crate::backend::{ChatResponse, Usage};
use crate::cache::types::{CacheKey, CacheTier};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// What a hit returns: the model's answer and its usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePayload {
    pub content: String,
    pub usage: Usage,
    pub provider: String,
    pub model: String,
}

impl From<ChatResponse> for CachePayload {
    fn from(response: ChatResponse) -> Self {
        Self {
            content: response.content,
            usage: response.usage,
            provider: response.provider,
            model: response.model,
        }
    }
}

/// A cached answer in one tier
///
/// The same shape is serialized as the L1 string value and as the vector
/// store metadata for L2/L3 (without the embedding, which the vector store
/// already holds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fingerprint of (normalized query, provider, model)
    pub key: CacheKey,

    pub tier: CacheTier,

    /// Normalized query text the entry answers
    pub query: String,

    pub payload: CachePayload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub created_at: DateTime<Utc>,

    pub last_accessed_at: DateTime<Utc>,

    /// Zero means the entry does not expire
    pub ttl_seconds: u64,

    pub provider: String,

    pub model: String,

    /// Source reliability, multiplies the decayed score
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        tier: CacheTier,
        query: impl Into<String>,
        payload: CachePayload,
        ttl: Option<Duration>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            tier,
            query: query.into(),
            provider: payload.provider.clone(),
            model: payload.model.clone(),
            payload,
            embedding: None,
            created_at: now,
            last_accessed_at: now,
            ttl_seconds: ttl.map(|t| t.as_secs().max(1)).unwrap_or(0),
            confidence: 1.0,
        }
    }

    pub fn with_tier(mut self, tier: CacheTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_seconds > 0).then(|| Duration::from_secs(self.ttl_seconds))
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        match self.ttl() {
            None => false,
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
                Utc::now() > self.created_at + ttl
            }
        }
    }

    /// TTL left at `now`; `None` for permanent entries, zero once expired
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        let ttl = self.ttl()?;
        let elapsed = (now - self.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0));
        Some(ttl.saturating_sub(elapsed))
    }

    /// Mark the entry as accessed
    pub fn mark_accessed(&mut self) {
        self.last_accessed_at = Utc::now();
    }

    /// Vector store metadata: everything but the embedding
    pub fn to_metadata(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("embedding");
        }
        Ok(value)
    }

    pub fn from_metadata(metadata: &Value) -> Result<Self> {
        Ok(serde_json::from_value(metadata.clone())?)
    }
}
