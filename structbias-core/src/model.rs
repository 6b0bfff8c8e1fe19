//! Interfaces to the external collaborators: the trainable memory model and
//! the pattern dataset.
//!
//! Model outputs are flat, typed feature maps. Every mode has a fixed schema
//! the model enumerates up front; the orchestrator rejects features outside
//! the schema at the call boundary, and a tracked feature missing from an
//! output surfaces as a configuration error instead of a late lookup failure.

use crate::error::{CollaboratorError, ConfigError};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Operating mode for a model step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Long-term memory training on the background set
    Pretrain,
    /// Short-term memory learning of the study batch
    Study,
    /// Retrieval without weight update
    Recall,
    /// Forward pass without weight update, used to encode stimuli
    Validate,
}

impl Mode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pretrain => "pretrain",
            Self::Study => "study",
            Self::Recall => "recall",
            Self::Validate => "validate",
        }
    }

    /// Modes in which no weights may change.
    #[must_use]
    pub const fn is_frozen(self) -> bool {
        matches!(self, Self::Recall | Self::Validate)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretrain" => Ok(Self::Pretrain),
            "study" => Ok(Self::Study),
            "recall" => Ok(Self::Recall),
            "validate" => Ok(Self::Validate),
            other => Err(ConfigError::Invalid {
                field: "mode",
                reason: format!("unknown mode `{other}`"),
            }),
        }
    }
}

/// Named internal representation exposed by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Long-term memory encoding of a single stimulus
    Ltm,
    /// Dentate gyrus sparse code
    Dg,
    /// Perforant-path (EC to CA3) representation
    Pr,
    /// CA3 activity cued from the entorhinal input
    EcCa3,
    /// CA3 to CA1 decoding
    Ca3Ca1,
    /// CA1 decoding
    Ca1,
    /// Reconstruction of the paired stimulus
    ReconPair,
}

impl Feature {
    pub const ALL: [Self; 7] = [
        Self::Ltm,
        Self::Dg,
        Self::Pr,
        Self::EcCa3,
        Self::Ca3Ca1,
        Self::Ca1,
        Self::ReconPair,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ltm => "ltm",
            Self::Dg => "dg",
            Self::Pr => "pr",
            Self::EcCa3 => "ec_ca3",
            Self::Ca3Ca1 => "ca3_ca1",
            Self::Ca1 => "ca1",
            Self::ReconPair => "recon_pair",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|feature| feature.as_str() == s)
            .ok_or_else(|| ConfigError::Invalid {
                field: "feature",
                reason: format!("unknown feature `{s}`"),
            })
    }
}

/// Flat feature output of one model step.
///
/// Each tensor holds one flattened row per batch element.
#[derive(Debug, Clone)]
pub struct FeatureMap {
    mode: Mode,
    labels: Vec<usize>,
    tensors: BTreeMap<Feature, DMatrix<f32>>,
}

impl FeatureMap {
    #[must_use]
    pub const fn new(mode: Mode, labels: Vec<usize>) -> Self {
        Self {
            mode,
            labels,
            tensors: BTreeMap::new(),
        }
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, feature: Feature, tensor: DMatrix<f32>) -> Self {
        self.tensors.insert(feature, tensor);
        self
    }

    pub fn insert(&mut self, feature: Feature, tensor: DMatrix<f32>) {
        self.tensors.insert(feature, tensor);
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Labels the step was driven with
    #[must_use]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn features(&self) -> impl Iterator<Item = Feature> + '_ {
        self.tensors.keys().copied()
    }

    #[must_use]
    pub fn get(&self, feature: Feature) -> Option<&DMatrix<f32>> {
        self.tensors.get(&feature)
    }

    /// Look up a feature that must be present.
    pub fn require(&self, feature: Feature) -> Result<&DMatrix<f32>, ConfigError> {
        self.tensors
            .get(&feature)
            .ok_or_else(|| ConfigError::MissingFeature {
                mode: self.mode,
                feature: feature.as_str().to_string(),
            })
    }

    /// Reject any feature the schema does not declare.
    pub fn check_schema(&self, schema: &[Feature]) -> Result<(), CollaboratorError> {
        match self.features().find(|feature| !schema.contains(feature)) {
            Some(feature) => Err(CollaboratorError::UnknownFeature {
                mode: self.mode,
                feature,
            }),
            None => Ok(()),
        }
    }
}

/// Losses and features returned from [`MemoryModel::step`].
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub losses: BTreeMap<String, f32>,
    pub features: FeatureMap,
}

impl StepOutput {
    #[must_use]
    pub fn total_loss(&self) -> f32 {
        self.losses.values().sum()
    }
}

/// Auxiliary inputs for study and recall steps.
#[derive(Debug, Clone, Copy)]
pub struct AuxInputs<'a> {
    /// Entorhinal input, usually the encoded stimulus batch itself
    pub ec_inputs: &'a DMatrix<f32>,
    /// Raw paired stimulus the model learns to reconstruct
    pub paired_inputs: &'a DMatrix<f32>,
}

/// Black-box trainable memory model.
///
/// Calls are blocking. After `reset` the episodic (short-term) state must be
/// independent of every earlier trial; the orchestrator relies on this.
pub trait MemoryModel {
    /// Features the model emits in `mode`.
    fn schema(&self, mode: Mode) -> &[Feature];

    /// Clear episodic state before a trial.
    fn reset(&mut self) -> Result<(), CollaboratorError>;

    /// Run one step over a batch (one row per element).
    fn step(
        &mut self,
        batch: &DMatrix<f32>,
        labels: Option<&[usize]>,
        mode: Mode,
        aux: Option<AuxInputs<'_>>,
    ) -> Result<StepOutput, CollaboratorError>;

    /// Whether pretraining consumes labels.
    fn is_supervised(&self) -> bool {
        false
    }
}

/// Which source variation a pattern is drawn from (e.g. which writer drew a
/// character).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Variation {
    /// Any variation the dataset chooses
    #[default]
    Any,
    /// A specific variation index
    Specific(usize),
}

/// Pattern with its dataset label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledPattern {
    pub values: Vec<f32>,
    pub label: usize,
}

/// Indexable stimulus collection.
pub trait PatternDataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pattern(&self, index: usize, variation: Variation)
    -> Result<LabeledPattern, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_names_round_trip_through_from_str() {
        for feature in Feature::ALL {
            assert_eq!(feature.as_str().parse::<Feature>().ok(), Some(feature));
        }
        assert!("ca4".parse::<Feature>().is_err());
    }

    #[test]
    fn feature_names_match_serde_names() {
        for feature in Feature::ALL {
            let json = serde_json::to_string(&feature).expect("unit variants serialize");
            assert_eq!(json, format!("\"{}\"", feature.as_str()));
        }
    }

    #[test]
    fn missing_feature_is_configuration_error() {
        let map = FeatureMap::new(Mode::Recall, vec![0, 1])
            .with(Feature::Dg, DMatrix::zeros(2, 3));
        assert!(map.require(Feature::Dg).is_ok());
        let err = map.require(Feature::Pr).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFeature { mode: Mode::Recall, .. }));
    }

    #[test]
    fn schema_check_rejects_undeclared_features() {
        let map = FeatureMap::new(Mode::Study, Vec::new())
            .with(Feature::Dg, DMatrix::zeros(1, 1))
            .with(Feature::Ca1, DMatrix::zeros(1, 1));
        assert!(map.check_schema(&[Feature::Dg, Feature::Ca1]).is_ok());
        let err = map.check_schema(&[Feature::Dg]).unwrap_err();
        assert!(matches!(
            err,
            CollaboratorError::UnknownFeature {
                feature: Feature::Ca1,
                ..
            }
        ));
    }
}
