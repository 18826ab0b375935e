//! Long-term memory: Hopfield associative recall and episodic decay

pub mod decay;
pub mod hopfield;

pub use decay::{Candidate, ConflictResolver, RankedCandidate, Resolution, DEFAULT_HALF_LIFE};
pub use hopfield::{binarize, AssociativeMemory, AssociativeSnapshot, Recall, DEFAULT_BETA};
