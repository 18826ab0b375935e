//! Shared fixtures: in-memory backends and controllable providers

#![allow(dead_code)]

use agentcache_core::backend::{
    ChatMessage, ChatOptions, ChatResponse, EmbeddingProvider, HashingEmbedder, InMemoryKvStore,
    InMemoryVectorStore, LlmProvider, Usage,
};
use agentcache_core::cache::{normalize, CacheBackends};
use agentcache_core::{CognitiveEngine, EngineConfig};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Embeds only the texts it was given, by normalized text
pub struct TableEmbedder {
    dimension: usize,
    table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    pub fn new(dimension: usize, entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            dimension,
            table: entries
                .iter()
                .map(|(text, vector)| (normalize(text), vector.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.table
            .get(&normalize(text))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no embedding for {:?}", text))
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn dimension(&self) -> usize {
        256
    }

    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("embedding service unreachable")
    }
}

/// Hashing embedder that sleeps for the next queued delay on each call
pub struct DelayedEmbedder {
    inner: HashingEmbedder,
    delays: Mutex<VecDeque<Duration>>,
}

impl DelayedEmbedder {
    pub fn new(dimension: usize, delays: &[Duration]) -> Self {
        Self {
            inner: HashingEmbedder::new(dimension),
            delays: Mutex::new(delays.iter().copied().collect()),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for DelayedEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let delay = self.delays.lock().unwrap().pop_front().unwrap_or_default();
        tokio::time::sleep(delay).await;
        self.inner.embed(text).await
    }
}

/// Replies with fixed content and counts calls
#[derive(Clone)]
pub struct ScriptedLlm {
    reply: String,
    latency: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedLlm {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        Ok(ChatResponse {
            content: self.reply.clone(),
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 10,
                reasoning_tokens: None,
            },
            provider: "scripted".to_string(),
            model: options.model.clone(),
        })
    }
}

pub struct Harness {
    pub engine: CognitiveEngine,
    pub kv: InMemoryKvStore,
    pub semantic: InMemoryVectorStore,
    pub episodic: InMemoryVectorStore,
}

pub fn harness(
    config: EngineConfig,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    classifier: Option<Arc<dyn LlmProvider>>,
) -> Harness {
    let kv = InMemoryKvStore::new();
    let semantic = InMemoryVectorStore::new();
    let episodic = InMemoryVectorStore::new();
    let backends = CacheBackends {
        kv: Arc::new(kv.clone()),
        semantic: Arc::new(semantic.clone()),
        episodic: Arc::new(episodic.clone()),
        embedder,
    };
    let engine = CognitiveEngine::new(config, backends, llm, classifier)
        .expect("test config must be valid");
    Harness {
        engine,
        kv,
        semantic,
        episodic,
    }
}

pub fn hashing(llm: Arc<dyn LlmProvider>) -> Harness {
    harness(
        EngineConfig::testing(),
        llm,
        Arc::new(HashingEmbedder::new(256)),
        None,
    )
}
