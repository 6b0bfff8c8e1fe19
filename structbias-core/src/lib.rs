//! Structural-bias experiments for associative memory models.
//!
//! Generates structured stimulus sequences, drives a trainable memory
//! model through study and recall trials, and accumulates the pairwise
//! similarity of its recalled representations into early and late
//! contrast statistics.

// Safety-focused Clippy lints to keep error handling explicit
#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo
)]
#![deny(clippy::unwrap_in_result, clippy::panic_in_result_fn)]
#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)
)]

pub mod aggregate;
pub mod config;
pub mod correlation;
pub mod error;
pub mod experiment;
pub mod export;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod pretrain;
pub mod reference;
pub mod sequence;
pub mod stimulus;
pub mod variant;

pub use aggregate::{ComponentSummary, ContrastSummary, ExperimentAggregator, ExperimentSummary};
pub use config::ExperimentConfig;
pub use correlation::CorrelationAccumulator;
pub use error::{CollaboratorError, ConfigError, ExportError, HarnessError, HarnessResult, SequenceError};
pub use experiment::{Datasets, Experiment, RunObserver, RunOutcome};
pub use export::{BarChartRenderer, HeatmapRenderer, ResultExporter};
pub use model::{Feature, FeatureMap, MemoryModel, Mode, PatternDataset, Variation};
pub use orchestrator::{EpochRecord, TrialOrchestrator};
pub use sequence::{StimulusSequence, SequenceParams};
pub use variant::{LearningType, PerProbe, Probe, Variant};
