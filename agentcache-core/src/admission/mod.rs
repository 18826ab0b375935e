//! # Content Admission Gate
//!
//! Screens content before it is cached or returned.
//!
//! - [`HeuristicGate`]: deterministic pattern rules, no external dependency.
//!   Always runs and is the baseline defence.
//! - [`LlmAugmentedGate`]: decorator that asks a classifier model for a second
//!   opinion. Fails open to the heuristic verdict on timeout, provider error
//!   or an unparseable reply.
//!
//! A rejection is a designed outcome, reported as `valid == false` with a
//! reason; the gate itself never returns an error.

pub mod heuristics;
pub mod llm;
pub mod rules;

pub use heuristics::HeuristicGate;
pub use llm::LlmAugmentedGate;

use crate::backend::LlmProvider;
use crate::error::{CacheError, Result};
use crate::sector::Sector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Score deducted per match
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 0.2,
            Severity::Medium => 0.3,
            Severity::High => 0.5,
            Severity::Critical => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule: String,
    pub severity: Severity,
}

/// Verdict of one admission check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// In [0, 1]; higher is safer
    pub score: f64,
    pub reason: String,
    #[serde(default)]
    pub matches: Vec<RuleMatch>,
}

impl ValidationResult {
    pub fn accept(score: f64) -> Self {
        Self {
            valid: true,
            score: score.clamp(0.0, 1.0),
            reason: "accepted".to_string(),
            matches: Vec::new(),
        }
    }

    pub fn reject(score: f64, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            score: score.clamp(0.0, 1.0),
            reason: reason.into(),
            matches: Vec::new(),
        }
    }
}

/// Screens content for injection, hallucination and sector risk
#[async_trait]
pub trait AdmissionGate: Send + Sync {
    /// Whether content is fit for long-term (L2/L3) storage
    async fn validate_memory(&self, content: &str, sector: Sector) -> ValidationResult;

    async fn detect_injection(&self, content: &str) -> ValidationResult;

    /// Sector risk rules over content about to be returned
    async fn evaluate_topic(&self, content: &str, sector: Sector) -> ValidationResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    #[default]
    Heuristic,
    LlmAugmented,
}

impl FromStr for AdmissionMode {
    type Err = CacheError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "heuristic" => Ok(AdmissionMode::Heuristic),
            "llm_augmented" | "llm" => Ok(AdmissionMode::LlmAugmented),
            other => Err(CacheError::Config(format!("unknown admission mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    pub mode: AdmissionMode,

    /// Base acceptance threshold; regulated sectors raise it
    pub threshold: f64,

    /// Trimmed content shorter than this is noise
    pub min_length: usize,

    /// Bound on each classifier call
    pub llm_timeout: Duration,

    /// Classifier model name; empty lets the provider choose
    pub classifier_model: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            mode: AdmissionMode::Heuristic,
            threshold: 0.5,
            min_length: 12,
            llm_timeout: Duration::from_secs(2),
            classifier_model: String::new(),
        }
    }
}

impl AdmissionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(CacheError::Config(
                "admission threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if self.llm_timeout.is_zero() {
            return Err(CacheError::Config("llm_timeout must be positive".into()));
        }
        Ok(())
    }

    /// Effective threshold for a sector
    pub fn threshold_for(&self, sector: Sector) -> f64 {
        self.threshold.max(sector.profile().admission_threshold)
    }
}

/// Select the gate for a configuration
///
/// `LlmAugmented` without a classifier provider degrades to heuristics.
pub fn build_admission_gate(
    config: &AdmissionConfig,
    classifier: Option<Arc<dyn LlmProvider>>,
) -> Arc<dyn AdmissionGate> {
    let heuristic = HeuristicGate::new(config.clone());
    match (config.mode, classifier) {
        (AdmissionMode::LlmAugmented, Some(llm)) => {
            Arc::new(LlmAugmentedGate::new(heuristic, llm, config.clone()))
        }
        (AdmissionMode::LlmAugmented, None) => {
            warn!("LLM-augmented admission requested without a classifier; using heuristics");
            Arc::new(heuristic)
        }
        (AdmissionMode::Heuristic, _) => Arc::new(heuristic),
    }
}
