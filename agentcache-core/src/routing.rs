//! Query complexity routing between the fast and deep-reasoning paths

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

const BASE_SCORE: f64 = 0.3;
const GREETING_SCORE: f64 = 0.1;
const LENGTH_BONUS: f64 = 0.2;
const REASONING_BONUS: f64 = 0.4;

/// Score at or above which a query takes the deep path
pub const SYSTEM2_THRESHOLD: f64 = 0.6;

const REASONING_TRIGGERS: &[&str] = &[
    "explain",
    "compare",
    "why",
    "optimize",
    "analyze",
    "analyse",
    "evaluate",
    "design",
    "prove",
    "derive",
    "debug",
    "tradeoff",
    "trade-off",
    "step by step",
    "reason",
];

static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:hi|hello|hey|yo|thanks|thank you|ok|okay|good (?:morning|afternoon|evening)|bye)[\s!.?,]*$")
        .expect("greeting regex must compile")
});

static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z][a-z\-]*").expect("word regex must compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Fast path
    System1,
    /// Deep-reasoning path
    System2,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::System1 => write!(f, "system_1"),
            Route::System2 => write!(f, "system_2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: Route,
    pub score: f64,
    /// Reasoning keywords that fired
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexityRouter;

impl ComplexityRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn route(&self, query: &str) -> RouteDecision {
        let trimmed = query.trim();
        if GREETING.is_match(trimmed) {
            return RouteDecision {
                route: Route::System1,
                score: GREETING_SCORE,
                triggers: Vec::new(),
            };
        }

        let mut score = BASE_SCORE;
        let length = trimmed.chars().count();
        if length > 50 {
            score += LENGTH_BONUS;
        }
        if length > 200 {
            score += LENGTH_BONUS;
        }

        let lower = trimmed.to_lowercase();
        let words: Vec<&str> = WORD.find_iter(&lower).map(|m| m.as_str()).collect();
        let triggers: Vec<String> = REASONING_TRIGGERS
            .iter()
            .filter(|t| {
                if t.contains(' ') {
                    lower.contains(*t)
                } else {
                    words.iter().any(|w| w == *t)
                }
            })
            .map(|t| t.to_string())
            .collect();
        if !triggers.is_empty() {
            score += REASONING_BONUS;
        }

        let score = score.clamp(0.0, 1.0);
        RouteDecision {
            route: if score >= SYSTEM2_THRESHOLD {
                Route::System2
            } else {
                Route::System1
            },
            score,
            triggers,
        }
    }
}
