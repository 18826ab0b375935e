//! Engine-wide configuration
//!
//! [`EngineConfig`] aggregates the per-component configs and carries the
//! engine-level knobs (prefetch, deep model, in-flight wait). Values come from
//! defaults, the builder, or the environment via [`EngineConfig::from_env`].

use crate::admission::{AdmissionConfig, AdmissionMode};
use crate::cache::CacheConfig;
use crate::error::{CacheError, Result};
use crate::maintenance::MaintenanceConfig;
use crate::memory::DEFAULT_BETA;
use crate::session::SessionConfig;
use crate::synapse::SynapseConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Learn admitted L3 writes and try associative completion on L3 misses
    pub enabled: bool,
    /// Pattern dimension N; must match the embedder to take effect
    pub dimension: usize,
    pub beta: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dimension: 256,
            beta: DEFAULT_BETA,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub admission: AdmissionConfig,
    pub synapse: SynapseConfig,
    pub memory: MemoryConfig,
    pub session: SessionConfig,
    pub maintenance: MaintenanceConfig,

    /// Warm L1 with predicted follow-up queries
    pub prefetch: bool,
    pub prefetch_min_probability: f64,

    /// Model used for System 2 requests; `None` keeps the requested model
    pub deep_model: Option<String>,
    pub system_prompt: Option<String>,

    /// How long to wait for another instance holding the in-flight marker
    pub inflight_wait: Duration,
    pub inflight_poll: Duration,

    /// Identifies this instance to maintenance peers
    pub instance_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            admission: AdmissionConfig::default(),
            synapse: SynapseConfig::default(),
            memory: MemoryConfig::default(),
            session: SessionConfig::default(),
            maintenance: MaintenanceConfig::default(),
            prefetch: true,
            prefetch_min_probability: 0.5,
            deep_model: None,
            system_prompt: None,
            inflight_wait: Duration::from_secs(5),
            inflight_poll: Duration::from_millis(100),
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CacheError::Config(format!("{}={:?}: {}", name, value, e))),
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.admission.validate()?;

        if self.memory.dimension == 0 {
            return Err(CacheError::Config("memory dimension must be positive".into()));
        }
        if self.memory.beta <= 0.0 {
            return Err(CacheError::Config("memory beta must be positive".into()));
        }
        if self.session.max_messages == 0 {
            return Err(CacheError::Config("session max_messages must be positive".into()));
        }
        if self.synapse.top_k == 0 {
            return Err(CacheError::Config("synapse top_k must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.prefetch_min_probability) {
            return Err(CacheError::Config(
                "prefetch_min_probability must be between 0.0 and 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.maintenance.learning_rate) {
            return Err(CacheError::Config(
                "maintenance learning_rate must be between 0.0 and 1.0".into(),
            ));
        }
        if self.inflight_poll.is_zero() {
            return Err(CacheError::Config("inflight_poll must be positive".into()));
        }
        Ok(())
    }

    /// Defaults, then `.env`, then `AGENTCACHE_*` variables
    pub fn from_env() -> Result<Self> {
        if dotenv::dotenv().is_ok() {
            debug!("Loaded .env file");
        }
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AGENTCACHE_*` overrides from any variable source
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| (name.to_string(), lookup(name));

        let (name, raw) = var("AGENTCACHE_DEFAULT_TTL_SECS");
        if let Some(secs) = parse_var::<u64>(&name, raw)? {
            self.cache.default_ttl = Duration::from_secs(secs);
        }
        let (name, raw) = var("AGENTCACHE_L3_FLOOR");
        if let Some(floor) = parse_var::<f64>(&name, raw)? {
            self.cache.l3_floor = floor;
        }
        let (name, raw) = var("AGENTCACHE_ADMISSION_MODE");
        if let Some(mode) = parse_var::<AdmissionMode>(&name, raw)? {
            self.admission.mode = mode;
        }
        let (name, raw) = var("AGENTCACHE_LLM_TIMEOUT_MS");
        if let Some(ms) = parse_var::<u64>(&name, raw)? {
            self.admission.llm_timeout = Duration::from_millis(ms);
        }
        let (name, raw) = var("AGENTCACHE_HOPFIELD_DIM");
        if let Some(dimension) = parse_var::<usize>(&name, raw)? {
            self.memory.dimension = dimension;
        }
        let (name, raw) = var("AGENTCACHE_PREFETCH");
        if let Some(prefetch) = parse_var::<bool>(&name, raw)? {
            self.prefetch = prefetch;
        }
        Ok(())
    }

    /// Deterministic settings for tests: no jitter, no prefetch, no maintenance
    pub fn testing() -> Self {
        Self {
            cache: CacheConfig::testing(),
            prefetch: false,
            maintenance: MaintenanceConfig {
                enabled: false,
                ..Default::default()
            },
            inflight_wait: Duration::from_millis(500),
            inflight_poll: Duration::from_millis(10),
            instance_id: "test".to_string(),
            ..Default::default()
        }
    }
}

/// Builder for engine configuration with validation
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn admission(mut self, admission: AdmissionConfig) -> Self {
        self.config.admission = admission;
        self
    }

    pub fn synapse(mut self, synapse: SynapseConfig) -> Self {
        self.config.synapse = synapse;
        self
    }

    pub fn memory(mut self, memory: MemoryConfig) -> Self {
        self.config.memory = memory;
        self
    }

    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    pub fn maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.config.maintenance = maintenance;
        self
    }

    pub fn prefetch(mut self, enabled: bool) -> Self {
        self.config.prefetch = enabled;
        self
    }

    pub fn prefetch_min_probability(mut self, probability: f64) -> Self {
        self.config.prefetch_min_probability = probability;
        self
    }

    pub fn deep_model(mut self, model: impl Into<String>) -> Self {
        self.config.deep_model = Some(model.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn inflight_wait(mut self, wait: Duration) -> Self {
        self.config.inflight_wait = wait;
        self
    }

    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.config.instance_id = id.into();
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
