//! Error types for experiment setup, collaborator calls and result export.
//!
//! Setup errors (`Config`, `Sequence`) halt a run before any trial executes.
//! `Collaborator` errors abort the seed they occurred in. `Export` errors are
//! logged by the exporter and never abort sibling writes.

use crate::model::{Feature, Mode};
use std::path::PathBuf;
use thiserror::Error;

/// Malformed or inconsistent experiment parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Early probe must come strictly before the late probe
    #[error("early probe step {early} must be strictly before late probe step {late}")]
    ProbeOrder { early: usize, late: usize },

    /// Early probe step is 1-based
    #[error("early probe step must be at least 1")]
    ZeroEarlyStep,

    /// Study and recall batch streams must pair up one to one
    #[error("study stream has {study} batches but recall stream has {recall}")]
    StreamLengthMismatch { study: usize, recall: usize },

    /// Parallel metric configuration lists disagree in length
    #[error("mismatch in metrics config: list lengths {lengths:?}")]
    MetricsLengthMismatch { lengths: Vec<usize> },

    /// A tracked feature was absent from the model output for a mode
    #[error("feature `{feature}` missing from {mode} output")]
    MissingFeature { mode: Mode, feature: String },

    /// A component was recorded that the accumulator does not track
    #[error("component `{0}` is not tracked by this accumulator")]
    UntrackedComponent(Feature),

    /// A feature reference could not be parsed
    #[error("invalid feature reference `{0}`, expected `<mode>.<feature>`")]
    FeatureReference(String),

    /// Field-level validation failure
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// Configuration text could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The requested structure cannot be built over the item pool.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("{variant} structure cannot be built from {items} items: {reason}")]
    StructuralConstraint {
        variant: &'static str,
        items: usize,
        reason: String,
    },

    #[error("sequence length must be at least 1")]
    EmptySequence,
}

/// A model or dataset call failed. Not retried: model state is unreliable
/// after a partial failure.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("model {operation} failed: {message}")]
    Model {
        operation: &'static str,
        message: String,
    },

    #[error("model returned feature `{feature}` outside its {mode} schema")]
    UnknownFeature { mode: Mode, feature: Feature },

    #[error("dataset lookup for item {index} failed: {message}")]
    Dataset { index: usize, message: String },

    #[error("pattern shape mismatch: expected {expected} values, got {actual}")]
    Shape { expected: usize, actual: usize },
}

/// A result file or renderer hand-off failed.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("renderer failed for `{title}`: {message}")]
    Render { title: String, message: String },
}

/// Umbrella error for the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Export(#[from] ExportError),

    /// Aggregation was requested for a series that never received samples
    #[error("no {probe} samples recorded for component `{component}`")]
    NoSamples { component: Feature, probe: String },
}

impl HarnessError {
    /// Whether this error only invalidates the seed it occurred in.
    #[must_use]
    pub const fn aborts_seed_only(&self) -> bool {
        matches!(self, Self::Collaborator(_))
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_errors_are_seed_scoped() {
        let err = HarnessError::from(CollaboratorError::Model {
            operation: "step",
            message: "device lost".to_string(),
        });
        assert!(err.aborts_seed_only());

        let err = HarnessError::from(ConfigError::ZeroEarlyStep);
        assert!(!err.aborts_seed_only());
    }

    #[test]
    fn probe_order_message_names_both_steps() {
        let err = ConfigError::ProbeOrder { early: 5, late: 3 };
        assert_eq!(
            err.to_string(),
            "early probe step 5 must be strictly before late probe step 3"
        );
    }
}
