//! Classical Hopfield network for associative pattern completion
//!
//! # Mathematical Model
//! ```text
//! learn:   W += p·pᵀ / N, diagonal zeroed
//! update:  s' = tanh(β · W·s)           (synchronous)
//! energy:  E(s) = -½ · sᵀ·W·s
//! ```
//!
//! Synchronous updates are guarded: an update that would raise the energy is
//! not applied, so every recall trace is non-increasing. Capacity is about
//! `0.14·N` patterns; past that, recall returns blended or spurious states.
//!
//! # Thread Safety
//! Not thread-safe. The engine owns one instance behind a `tokio::sync::RwLock`.

use crate::error::{CacheError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Default inverse temperature
pub const DEFAULT_BETA: f32 = 4.0;

const SYMMETRY_TOLERANCE: f32 = 1e-5;

/// Result of a recall: final state and energy after each step
///
/// `energy_trace[0]` is the probe's energy, `energy_trace[k]` follows step k.
#[derive(Debug, Clone)]
pub struct Recall {
    pub state: Vec<f32>,
    pub energy_trace: Vec<f32>,
}

impl Recall {
    pub fn final_energy(&self) -> f32 {
        self.energy_trace.last().copied().unwrap_or(0.0)
    }
}

/// Serialized weight matrix (column-major)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociativeSnapshot {
    pub dimension: usize,
    pub beta: f32,
    pub patterns_learned: usize,
    pub weights: Vec<f32>,
}

impl AssociativeSnapshot {
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string(self)?;
        tokio::fs::write(path, json).await?;
        info!("Saved associative snapshot to {}", path.display());
        Ok(())
    }

    /// Read a snapshot; shape checks happen on [`AssociativeMemory::restore`]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[derive(Debug, Clone)]
pub struct AssociativeMemory {
    dimension: usize,
    beta: f32,
    weights: DMatrix<f32>,
    patterns_learned: usize,
}

/// Map a real vector to ±1; zero maps to +1
pub fn binarize(vector: &[f32]) -> Vec<f32> {
    vector
        .iter()
        .map(|v| if *v < 0.0 { -1.0 } else { 1.0 })
        .collect()
}

impl AssociativeMemory {
    pub fn new(dimension: usize, beta: f32) -> Self {
        Self {
            dimension,
            beta,
            weights: DMatrix::zeros(dimension, dimension),
            patterns_learned: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn beta(&self) -> f32 {
        self.beta
    }

    pub fn patterns_learned(&self) -> usize {
        self.patterns_learned
    }

    /// Reliable pattern count, `floor(0.14·N)`
    pub fn capacity(&self) -> usize {
        (self.dimension as f64 * 0.14).floor() as usize
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(CacheError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    /// Hebbian update with one pattern
    pub fn learn(&mut self, pattern: &[f32]) -> Result<()> {
        self.check_dimension(pattern.len())?;

        let p = DVector::from_column_slice(pattern);
        let outer = &p * p.transpose();
        self.weights += outer / self.dimension as f32;
        self.weights.fill_diagonal(0.0);
        self.patterns_learned += 1;

        if self.patterns_learned == self.capacity() + 1 {
            debug!(
                "Associative memory past capacity: {} patterns for N={}",
                self.patterns_learned, self.dimension
            );
        }
        Ok(())
    }

    fn energy_of(&self, state: &DVector<f32>) -> f32 {
        -0.5 * state.dot(&(&self.weights * state))
    }

    pub fn energy(&self, state: &[f32]) -> Result<f32> {
        self.check_dimension(state.len())?;
        Ok(self.energy_of(&DVector::from_column_slice(state)))
    }

    /// Complete a probe with `steps` synchronous updates
    pub fn recall(&self, probe: &[f32], steps: usize) -> Result<Recall> {
        self.check_dimension(probe.len())?;

        let mut state = DVector::from_column_slice(probe);
        let mut energy = self.energy_of(&state);
        let mut energy_trace = Vec::with_capacity(steps + 1);
        energy_trace.push(energy);

        for _ in 0..steps {
            let beta = self.beta;
            let next = (&self.weights * &state).map(|h| (beta * h).tanh());
            let next_energy = self.energy_of(&next);
            if next_energy <= energy {
                state = next;
                energy = next_energy;
            }
            energy_trace.push(energy);
        }

        Ok(Recall {
            state: state.as_slice().to_vec(),
            energy_trace,
        })
    }

    pub fn snapshot(&self) -> AssociativeSnapshot {
        AssociativeSnapshot {
            dimension: self.dimension,
            beta: self.beta,
            patterns_learned: self.patterns_learned,
            weights: self.weights.as_slice().to_vec(),
        }
    }

    /// Replace state from a snapshot after checking its shape
    pub fn restore(&mut self, snapshot: AssociativeSnapshot) -> Result<()> {
        let n = snapshot.dimension;
        if snapshot.weights.len() != n * n {
            return Err(CacheError::DimensionMismatch {
                expected: n * n,
                actual: snapshot.weights.len(),
            });
        }
        if !snapshot.beta.is_finite() || snapshot.beta <= 0.0 {
            return Err(CacheError::Config(format!(
                "snapshot beta must be positive, got {}",
                snapshot.beta
            )));
        }

        let weights = DMatrix::from_column_slice(n, n, &snapshot.weights);
        for i in 0..n {
            if weights[(i, i)] != 0.0 {
                return Err(CacheError::Serialization(format!(
                    "snapshot diagonal is not zero at {}",
                    i
                )));
            }
            for j in (i + 1)..n {
                if (weights[(i, j)] - weights[(j, i)]).abs() > SYMMETRY_TOLERANCE {
                    return Err(CacheError::Serialization(format!(
                        "snapshot weights are not symmetric at ({}, {})",
                        i, j
                    )));
                }
            }
        }

        self.dimension = n;
        self.beta = snapshot.beta;
        self.weights = weights;
        self.patterns_learned = snapshot.patterns_learned;
        info!(
            "Restored associative memory: N={}, {} patterns",
            n, self.patterns_learned
        );
        Ok(())
    }
}
