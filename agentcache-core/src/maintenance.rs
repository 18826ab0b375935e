//! Periodic cross-instance tuning of the local scoring weights
//!
//! Each tick publishes this instance's [`ScoringWeights`] under
//! `peer:{id}`, heartbeats in the `peers` sorted set, samples a few live
//! peers at random and moves the local weights toward their mean. Weights
//! stay within `±MAX_OFFSET`; nothing but this instance's own keys and its
//! local weights is written.

use crate::backend::{KeyValueStore, ZRangeOptions};
use crate::error::Result;
use chrono::Utc;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Bound on each weight offset
pub const MAX_OFFSET: f64 = 0.05;

const PEERS_KEY: &str = "peers";

/// Bounded local adjustments to the cache thresholds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Added to the L2 similarity threshold
    pub semantic_offset: f64,
    /// Added to the L3 decayed floor
    pub decay_floor_offset: f64,
}

impl ScoringWeights {
    pub fn new(semantic_offset: f64, decay_floor_offset: f64) -> Self {
        Self {
            semantic_offset,
            decay_floor_offset,
        }
        .clamped()
    }

    pub fn clamped(self) -> Self {
        Self {
            semantic_offset: self.semantic_offset.clamp(-MAX_OFFSET, MAX_OFFSET),
            decay_floor_offset: self.decay_floor_offset.clamp(-MAX_OFFSET, MAX_OFFSET),
        }
    }
}

pub type SharedWeights = Arc<RwLock<ScoringWeights>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Peers sampled per tick
    pub peer_sample: usize,
    /// Fraction of the gap to the peer mean closed per tick
    pub learning_rate: f64,
    /// Peers without a heartbeat for this long are ignored
    pub peer_ttl: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            peer_sample: 3,
            learning_rate: 0.25,
            peer_ttl: Duration::from_secs(300),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub peers_sampled: usize,
    pub weights: ScoringWeights,
}

fn peer_key(id: &str) -> String {
    format!("peer:{}", id)
}

pub struct MaintenanceScheduler {
    instance_id: String,
    kv: Arc<dyn KeyValueStore>,
    weights: SharedWeights,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(
        instance_id: impl Into<String>,
        kv: Arc<dyn KeyValueStore>,
        weights: SharedWeights,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            kv,
            weights,
            config,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn publish(&self, weights: ScoringWeights) -> Result<()> {
        let json = serde_json::to_string(&weights)?;
        self.kv
            .set(&peer_key(&self.instance_id), json, Some(self.config.peer_ttl))
            .await?;
        let now = Utc::now().timestamp() as f64;
        // zincrby is the only sorted-set write; bump by the delta to land on `now`.
        let current = self
            .kv
            .zincrby(PEERS_KEY, 0.0, &self.instance_id)
            .await?;
        self.kv
            .zincrby(PEERS_KEY, now - current, &self.instance_id)
            .await?;
        Ok(())
    }

    async fn live_peers(&self) -> Result<Vec<String>> {
        let cutoff = Utc::now().timestamp() as f64 - self.config.peer_ttl.as_secs_f64();
        let members = self
            .kv
            .zrange(PEERS_KEY, 0, -1, ZRangeOptions::rev_with_scores())
            .await?;
        Ok(members
            .into_iter()
            .filter(|m| m.member != self.instance_id)
            .filter(|m| m.score.map(|s| s >= cutoff).unwrap_or(false))
            .map(|m| m.member)
            .collect())
    }

    /// One publish-sample-adjust iteration
    pub async fn tick(&self) -> Result<TickReport> {
        let current = *self.weights.read().await;
        self.publish(current).await?;

        let mut peers = self.live_peers().await?;
        peers.shuffle(&mut rand::thread_rng());
        peers.truncate(self.config.peer_sample);

        let mut sampled = Vec::with_capacity(peers.len());
        for peer in &peers {
            match self.kv.get(&peer_key(peer)).await? {
                Some(json) => match serde_json::from_str::<ScoringWeights>(&json) {
                    Ok(w) => sampled.push(w.clamped()),
                    Err(e) => warn!("Ignoring unreadable weights from peer {}: {}", peer, e),
                },
                None => debug!("Peer {} has no published weights", peer),
            }
        }

        if sampled.is_empty() {
            return Ok(TickReport {
                peers_sampled: 0,
                weights: current,
            });
        }

        let n = sampled.len() as f64;
        let mean_semantic = sampled.iter().map(|w| w.semantic_offset).sum::<f64>() / n;
        let mean_floor = sampled.iter().map(|w| w.decay_floor_offset).sum::<f64>() / n;
        let rate = self.config.learning_rate;

        let mut weights = self.weights.write().await;
        *weights = ScoringWeights::new(
            weights.semantic_offset + rate * (mean_semantic - weights.semantic_offset),
            weights.decay_floor_offset + rate * (mean_floor - weights.decay_floor_offset),
        );
        debug!(
            "Maintenance tick: {} peers, weights now {:?}",
            sampled.len(),
            *weights
        );

        Ok(TickReport {
            peers_sampled: sampled.len(),
            weights: *weights,
        })
    }

    /// Tick forever at the configured interval
    pub async fn run(self) {
        info!(
            "Starting maintenance scheduler {} (interval {:?})",
            self.instance_id, self.config.interval
        );
        loop {
            tokio::time::sleep(self.config.interval).await;
            if let Err(e) = self.tick().await {
                warn!("Maintenance tick failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryKvStore;

    fn scheduler(id: &str, kv: &InMemoryKvStore, weights: ScoringWeights) -> MaintenanceScheduler {
        MaintenanceScheduler::new(
            id,
            Arc::new(kv.clone()),
            Arc::new(RwLock::new(weights)),
            MaintenanceConfig::default(),
        )
    }

    #[test]
    fn test_weights_are_clamped() {
        let w = ScoringWeights::new(0.3, -0.2);
        assert_eq!(w.semantic_offset, MAX_OFFSET);
        assert_eq!(w.decay_floor_offset, -MAX_OFFSET);
    }

    #[tokio::test]
    async fn test_tick_without_peers_keeps_weights() {
        let kv = InMemoryKvStore::new();
        let alone = scheduler("a", &kv, ScoringWeights::new(0.01, 0.0));
        let report = alone.tick().await.unwrap();
        assert_eq!(report.peers_sampled, 0);
        assert_eq!(report.weights, ScoringWeights::new(0.01, 0.0));
        assert!(kv.get("peer:a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tick_moves_toward_peer_mean() {
        let kv = InMemoryKvStore::new();
        let peer = scheduler("b", &kv, ScoringWeights::new(0.04, -0.04));
        peer.tick().await.unwrap();

        let local = scheduler("a", &kv, ScoringWeights::default());
        let report = local.tick().await.unwrap();
        assert_eq!(report.peers_sampled, 1);
        assert!((report.weights.semantic_offset - 0.01).abs() < 1e-9);
        assert!((report.weights.decay_floor_offset + 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_weights_stay_bounded_under_hostile_peer() {
        let kv = InMemoryKvStore::new();
        kv.set("peer:evil", r#"{"semantic_offset":5.0,"decay_floor_offset":-5.0}"#.into(), None)
            .await
            .unwrap();
        kv.zincrby(PEERS_KEY, Utc::now().timestamp() as f64, "evil")
            .await
            .unwrap();

        let local = scheduler("a", &kv, ScoringWeights::default());
        for _ in 0..50 {
            let report = local.tick().await.unwrap();
            assert!(report.weights.semantic_offset.abs() <= MAX_OFFSET);
            assert!(report.weights.decay_floor_offset.abs() <= MAX_OFFSET);
        }
    }

    #[tokio::test]
    async fn test_stale_peers_ignored() {
        let kv = InMemoryKvStore::new();
        kv.set("peer:old", r#"{"semantic_offset":0.05,"decay_floor_offset":0.05}"#.into(), None)
            .await
            .unwrap();
        kv.zincrby(PEERS_KEY, (Utc::now().timestamp() - 3600) as f64, "old")
            .await
            .unwrap();

        let local = scheduler("a", &kv, ScoringWeights::default());
        assert_eq!(local.tick().await.unwrap().peers_sampled, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_is_current_time() {
        let kv = InMemoryKvStore::new();
        let local = scheduler("a", &kv, ScoringWeights::default());
        local.tick().await.unwrap();
        local.tick().await.unwrap();

        let peers = kv
            .zrange(PEERS_KEY, 0, -1, ZRangeOptions::rev_with_scores())
            .await
            .unwrap();
        let score = peers[0].score.unwrap();
        assert!((score - Utc::now().timestamp() as f64).abs() <= 2.0);
    }
}
