//! Embedding and chat-completion provider seams
//!
//! Concrete model providers live outside this crate. The two stand-ins here
//! are deterministic so the cache can be exercised without network access:
//! [`HashingEmbedder`] (hashed word codes) and [`EchoProvider`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Text to fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    /// Must be deterministic for identical input
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Chat completion backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Deep-reasoning path requested by the router
    pub reasoning: bool,
}

impl ChatOptions {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub reasoning_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Usage,
    pub provider: String,
    pub model: String,
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Deterministic random-indexing embedder
///
/// Each lowercase word owns a dense ±1 code drawn from SHA-256 of the word
/// and a block counter; a text is the L2-normalized sum of its word codes.
/// Texts sharing vocabulary land close together and unrelated texts are
/// near-orthogonal, including after binarization.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            for (block, chunk) in vector.chunks_mut(256).enumerate() {
                let digest = Sha256::digest(format!("{}#{}", token, block).as_bytes());
                for (i, v) in chunk.iter_mut().enumerate() {
                    let bit = (digest[i / 8] >> (i % 8)) & 1;
                    *v += if bit == 1 { 1.0 } else { -1.0 };
                }
            }
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

/// Deterministic chat stand-in that echoes the last user message
///
/// Counts calls so callers can assert how many model invocations a flow made.
#[derive(Debug, Clone)]
pub struct EchoProvider {
    provider: String,
    model: String,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
}

impl EchoProvider {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delay every reply, to widen concurrency windows
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("provider {} is offline", self.provider);
        }

        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let content = format!("Answer to: {}", prompt);
        let model = if options.model.is_empty() {
            self.model.clone()
        } else {
            options.model.clone()
        };

        Ok(ChatResponse {
            usage: Usage {
                prompt_tokens: tokens(prompt).count() as u32,
                completion_tokens: tokens(&content).count() as u32,
                reasoning_tokens: options.reasoning.then_some(16),
            },
            content,
            provider: self.provider.clone(),
            model,
        })
    }
}
