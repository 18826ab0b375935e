pub mod runner;
pub mod transcript;

pub use runner::{LocalEngine, ReplayReport, TurnReport};
pub use transcript::{Transcript, Turn};
