//! Minimal collaborators for running the harness without an external
//! model: a synthetic prototype/variation pattern set and a Hebbian
//! pair-associative memory.

mod dataset;
mod model;

pub use dataset::{AlphabetConfig, SyntheticAlphabet};
pub use model::{HebbianConfig, HebbianPairModel};
