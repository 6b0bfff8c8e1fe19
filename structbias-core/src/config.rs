//! Experiment configuration.
//!
//! Loaded from TOML. Every cross-field constraint is checked by
//! [`ExperimentConfig::validate`] before any model call is made.

use crate::error::{ConfigError, HarnessResult};
use crate::metrics::MetricsConfig;
use crate::model::{Feature, Variation};
use crate::sequence::SequenceParams;
use crate::variant::{LearningType, Variant};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub sequence: SequenceConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub pretrain: PretrainConfig,
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

/// Structure of the study and recall sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub experiment: Variant,
    pub learning_type: LearningType,
    #[serde(alias = "characters")]
    pub item_count: usize,
    pub sequence_length: usize,
    pub communities: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            experiment: Variant::Pair,
            learning_type: LearningType::Statistical,
            item_count: 8,
            sequence_length: 20,
            communities: 2,
        }
    }
}

/// Study/recall protocol of each trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    #[serde(alias = "study_batch_size")]
    pub batch_size: usize,
    /// 1-based study step of the early probe
    pub early_response_step: usize,
    /// Number of study steps; the late probe follows the last one
    pub late_response_steps: usize,
    /// Weight of the first element when combining encoded pair elements
    pub activation_coefficient: f32,
    /// Recall the single items instead of the recall pairs
    #[serde(alias = "test_single_characters")]
    pub single_recall: bool,
    /// Study/recall epochs per seed
    pub train_epochs: usize,
    pub test_components: Vec<Feature>,
    /// Component whose recalled patterns are classified against core pairs
    pub reconstruction_component: Option<Feature>,
    #[serde(alias = "variation_training")]
    pub study_variation: Variation,
    #[serde(alias = "variation")]
    pub recall_variation: Variation,
    /// Draw the first study element from the recall variation
    pub cross_variation: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            early_response_step: 1,
            late_response_steps: 2,
            activation_coefficient: 1.0,
            single_recall: true,
            train_epochs: 1,
            test_components: vec![
                Feature::Dg,
                Feature::Pr,
                Feature::EcCa3,
                Feature::Ca1,
                Feature::ReconPair,
            ],
            reconstruction_component: Some(Feature::ReconPair),
            study_variation: Variation::Specific(0),
            recall_variation: Variation::Specific(1),
            cross_variation: false,
        }
    }
}

/// Seed loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of independent seeds
    pub seeds: usize,
    /// Seeds are drawn from this base seed; entropy when absent
    pub base_seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seeds: 1,
            base_seed: None,
        }
    }
}

/// Long-term memory pretraining.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PretrainConfig {
    /// Zero skips pretraining
    pub epochs: usize,
    pub batch_size: usize,
    pub log_every: usize,
    pub validate_every: usize,
    pub max_validation_steps: usize,
    /// Fraction of the pretraining set held out for validation
    pub validation_split: f64,
    /// Stop an epoch after this many batches (0 = no limit)
    pub max_steps: usize,
}

impl Default for PretrainConfig {
    fn default() -> Self {
        Self {
            epochs: 0,
            batch_size: 32,
            log_every: 20,
            validate_every: 20,
            max_validation_steps: 100,
            validation_split: 0.175,
            max_steps: 0,
        }
    }
}

impl ExperimentConfig {
    /// Parse from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::Invalid {
            field: "path",
            reason: format!("cannot read {}: {err}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    #[must_use]
    pub const fn sequence_params(&self) -> SequenceParams {
        SequenceParams {
            variant: self.sequence.experiment,
            item_count: self.sequence.item_count,
            sequence_length: self.sequence.sequence_length,
            learning_type: self.sequence.learning_type,
            communities: self.sequence.communities,
        }
    }

    /// Check every parameter and cross-field constraint, including whether
    /// the requested structure can be built.
    pub fn validate(&self) -> HarnessResult<()> {
        self.validate_fields()?;
        self.sequence_params().check()?;
        Ok(())
    }

    fn validate_fields(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| ConfigError::Invalid { field, reason };
        let sequence = &self.sequence;
        let protocol = &self.protocol;

        if sequence.item_count < 2 {
            return Err(invalid("item_count", "need at least 2 items".to_string()));
        }
        if protocol.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1".to_string()));
        }
        if protocol.early_response_step == 0 {
            return Err(ConfigError::ZeroEarlyStep);
        }
        if protocol.early_response_step >= protocol.late_response_steps {
            return Err(ConfigError::ProbeOrder {
                early: protocol.early_response_step,
                late: protocol.late_response_steps,
            });
        }
        if protocol.train_epochs == 0 {
            return Err(invalid("train_epochs", "must be at least 1".to_string()));
        }
        if self.run.seeds == 0 {
            return Err(invalid("seeds", "must be at least 1".to_string()));
        }
        if protocol.test_components.is_empty() {
            return Err(invalid("test_components", "no component to track".to_string()));
        }
        if let Some(component) = protocol.reconstruction_component
            && !protocol.test_components.contains(&component)
        {
            return Err(invalid(
                "reconstruction_component",
                format!("`{component}` is not listed in test_components"),
            ));
        }
        if protocol.batch_size < sequence.item_count {
            return Err(invalid(
                "batch_size",
                format!(
                    "recall batches of {} cannot cover {} items",
                    protocol.batch_size, sequence.item_count
                ),
            ));
        }
        if !protocol.single_recall && sequence.sequence_length % protocol.batch_size != 0 {
            return Err(invalid(
                "sequence_length",
                format!(
                    "pair recall needs full batches: {} is not a multiple of {}",
                    sequence.sequence_length, protocol.batch_size
                ),
            ));
        }
        if !(0.0..1.0).contains(&self.pretrain.validation_split) {
            return Err(invalid(
                "validation_split",
                format!("{} is outside [0, 1)", self.pretrain.validation_split),
            ));
        }
        if self.pretrain.epochs > 0 && self.pretrain.batch_size == 0 {
            return Err(invalid("pretrain.batch_size", "must be at least 1".to_string()));
        }
        if let Some(metrics) = &self.metrics {
            metrics.comparisons()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HarnessError, SequenceError};

    #[test]
    fn defaults_are_valid() {
        ExperimentConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn parses_sections_and_aliases() {
        let config = ExperimentConfig::from_toml_str(
            r#"
            [sequence]
            experiment = "community_structure"
            characters = 12
            sequence_length = 30
            communities = 3

            [protocol]
            study_batch_size = 12
            early_response_step = 2
            late_response_steps = 6
            test_components = ["dg", "ca3_ca1"]
            reconstruction_component = "ca3_ca1"
            variation = { specific = 4 }

            [run]
            seeds = 3
            base_seed = 99
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.sequence.experiment, Variant::Community);
        assert_eq!(config.sequence.item_count, 12);
        assert_eq!(config.protocol.batch_size, 12);
        assert_eq!(config.protocol.recall_variation, Variation::Specific(4));
        assert_eq!(config.protocol.test_components, vec![Feature::Dg, Feature::Ca3Ca1]);
        assert_eq!(config.run.base_seed, Some(99));
        config.validate().expect("consistent config");
    }

    #[test]
    fn early_probe_must_precede_late_probe() {
        let mut config = ExperimentConfig::default();
        config.protocol.early_response_step = 2;
        config.protocol.late_response_steps = 2;
        assert!(matches!(
            config.validate(),
            Err(HarnessError::Config(ConfigError::ProbeOrder { early: 2, late: 2 }))
        ));

        config.protocol.early_response_step = 0;
        assert!(matches!(
            config.validate(),
            Err(HarnessError::Config(ConfigError::ZeroEarlyStep))
        ));
    }

    #[test]
    fn incompatible_communities_fail_structurally() {
        let mut config = ExperimentConfig::default();
        config.sequence.experiment = Variant::Community;
        config.sequence.communities = 3;
        assert!(matches!(
            config.validate(),
            Err(HarnessError::Sequence(SequenceError::StructuralConstraint { .. }))
        ));
    }

    #[test]
    fn reconstruction_component_must_be_tracked() {
        let mut config = ExperimentConfig::default();
        config.protocol.test_components = vec![Feature::Dg];
        assert!(config.validate().is_err());
        config.protocol.reconstruction_component = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn pair_recall_requires_full_batches() {
        let mut config = ExperimentConfig::default();
        config.protocol.single_recall = false;
        config.protocol.batch_size = 8;
        assert!(config.validate().is_err());
        config.sequence.sequence_length = 24;
        assert!(config.validate().is_ok());
    }
}
