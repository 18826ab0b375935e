//! The engine over in-process reference backends, as the CLI drives it

use crate::transcript::Transcript;
use agentcache_core::backend::{
    EchoProvider, HashingEmbedder, InMemoryKvStore, InMemoryVectorStore, LlmProvider,
};
use agentcache_core::cache::CacheBackends;
use agentcache_core::synapse::Prediction;
use agentcache_core::{CacheStats, CognitiveEngine, EngineConfig, EngineResponse, ResponseSource};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub query: String,
    pub outcome: &'static str,
    pub source: Option<ResponseSource>,
    pub score: f64,
    pub detail: String,
}

impl TurnReport {
    fn new(query: &str, response: EngineResponse) -> Self {
        let query = query.to_string();
        match response {
            EngineResponse::Answered {
                payload,
                source,
                score,
            } => Self {
                query,
                outcome: "answered",
                source: Some(source),
                score,
                detail: payload.content,
            },
            EngineResponse::Rejected { reason, score } => Self {
                query,
                outcome: "rejected",
                source: None,
                score,
                detail: reason,
            },
            EngineResponse::Blocked { reason, score } => Self {
                query,
                outcome: "blocked",
                source: None,
                score,
                detail: reason,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub turns: Vec<TurnReport>,
    /// Predicted successors of the last answered turn
    pub predictions: Vec<Prediction>,
    pub model_calls: usize,
    pub stats: CacheStats,
}

/// An engine whose model is the echo stand-in
pub struct LocalEngine {
    pub engine: CognitiveEngine,
    llm: EchoProvider,
}

impl LocalEngine {
    pub fn new(config: EngineConfig, provider: &str, model: &str) -> Result<Self> {
        let backends = CacheBackends {
            kv: Arc::new(InMemoryKvStore::new()),
            semantic: Arc::new(InMemoryVectorStore::new()),
            episodic: Arc::new(InMemoryVectorStore::new()),
            embedder: Arc::new(HashingEmbedder::new(config.memory.dimension)),
        };
        let llm = EchoProvider::new(provider, model);
        let classifier: Arc<dyn LlmProvider> = Arc::new(llm.clone());
        let engine = CognitiveEngine::new(config, backends, Arc::new(llm.clone()), Some(classifier))?;
        Ok(Self { engine, llm })
    }

    pub fn model_calls(&self) -> usize {
        self.llm.calls()
    }

    /// Run a transcript turn by turn, settling background work between turns
    pub async fn replay(
        &self,
        transcript: &Transcript,
        provider: &str,
        model: &str,
        depth: usize,
    ) -> Result<ReplayReport> {
        let requests = transcript.requests(provider, model);
        info!("Replaying {} turns", requests.len());

        let mut turns = Vec::with_capacity(requests.len());
        for request in requests {
            let query = request.query.clone();
            let response = self.engine.respond(request).await?;
            self.engine.flush().await;
            turns.push(TurnReport::new(&query, response));
        }

        let predictions = match turns.iter().rev().find(|t| t.outcome == "answered") {
            Some(last) => self.engine.predict_next(&last.query, depth).await?,
            None => Vec::new(),
        };

        Ok(ReplayReport {
            turns,
            predictions,
            model_calls: self.model_calls(),
            stats: self.engine.stats(),
        })
    }
}
