//! Episodic decay ranking and recency-first conflict resolution
//!
//! `decayed = similarity * confidence / (1 + age / half_life)`. A week-old
//! fact at similarity 0.95 scores 0.475 with the default half-life, so it
//! ranks below a fresh one at 0.80. Contradictions are not detected; when
//! close candidates disagree the most recent one wins and similarity only
//! breaks ties between equally recent candidates.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::time::Duration;

/// Default episodic half-life: 7 days
pub const DEFAULT_HALF_LIFE: Duration = Duration::from_secs(7 * 24 * 3600);

/// A memory competing for a slot in the answer
#[derive(Debug, Clone)]
pub struct Candidate<T> {
    pub item: T,
    pub similarity: f64,
    pub created_at: DateTime<Utc>,
    pub confidence: f64,
}

impl<T> Candidate<T> {
    pub fn new(item: T, similarity: f64, created_at: DateTime<Utc>) -> Self {
        Self {
            item,
            similarity,
            created_at,
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RankedCandidate<T> {
    pub candidate: Candidate<T>,
    pub decayed_score: f64,
}

/// Winner of a conflict plus the candidates it displaced
#[derive(Debug, Clone)]
pub struct Resolution<T> {
    pub winner: Candidate<T>,
    pub losers: Vec<Candidate<T>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    half_life: Duration,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(DEFAULT_HALF_LIFE)
    }
}

impl ConflictResolver {
    pub fn new(half_life: Duration) -> Self {
        let half_life = if half_life.is_zero() {
            Duration::from_secs(1)
        } else {
            half_life
        };
        Self { half_life }
    }

    pub fn half_life(&self) -> Duration {
        self.half_life
    }

    pub fn decayed_score(&self, similarity: f64, age: Duration) -> f64 {
        similarity / (1.0 + age.as_secs_f64() / self.half_life.as_secs_f64())
    }

    pub fn score<T>(&self, candidate: &Candidate<T>, now: DateTime<Utc>) -> f64 {
        let age = (now - candidate.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0));
        self.decayed_score(candidate.similarity, age) * candidate.confidence
    }

    /// Sort by decayed score, best first; ties go to the newer candidate
    pub fn rank<T>(&self, candidates: Vec<Candidate<T>>, now: DateTime<Utc>) -> Vec<RankedCandidate<T>> {
        let mut ranked: Vec<RankedCandidate<T>> = candidates
            .into_iter()
            .map(|candidate| RankedCandidate {
                decayed_score: self.score(&candidate, now),
                candidate,
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.decayed_score
                .total_cmp(&a.decayed_score)
                .then_with(|| b.candidate.created_at.cmp(&a.candidate.created_at))
        });
        ranked
    }

    /// Most recent wins, similarity second; `None` for an empty set
    pub fn resolve_conflicts<T>(&self, mut candidates: Vec<Candidate<T>>) -> Option<Resolution<T>> {
        candidates.sort_by(|a, b| match b.created_at.cmp(&a.created_at) {
            Ordering::Equal => b.similarity.total_cmp(&a.similarity),
            other => other,
        });
        let mut iter = candidates.into_iter();
        let winner = iter.next()?;
        Some(Resolution {
            winner,
            losers: iter.collect(),
        })
    }
}
