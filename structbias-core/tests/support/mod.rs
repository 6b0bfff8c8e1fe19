//! Shared fixtures for the integration tests.
//!
//! Provides small experiment configurations, the synthetic dataset sized
//! to match them, and wrapper models that misbehave in controlled ways.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use nalgebra::DMatrix;
use structbias_core::model::{AuxInputs, StepOutput};
use structbias_core::reference::{HebbianConfig, HebbianPairModel, SyntheticAlphabet};
use structbias_core::{CollaboratorError, ExperimentConfig, Feature, MemoryModel, Mode, Variant};

pub const PATTERN_DIM: usize = 16;

/// Pair experiment over `items` items: sequences of 20, batches of 10,
/// probes after study steps 1 and 2.
pub fn pair_config(items: usize, seeds: usize) -> ExperimentConfig {
    let mut config = ExperimentConfig::default();
    config.sequence.experiment = Variant::Pair;
    config.sequence.item_count = items;
    config.sequence.sequence_length = 20;
    config.protocol.batch_size = 10;
    config.protocol.early_response_step = 1;
    config.protocol.late_response_steps = 2;
    config.protocol.train_epochs = 1;
    config.run.seeds = seeds;
    config.run.base_seed = Some(2024);
    config
}

pub fn community_config(items: usize, communities: usize) -> ExperimentConfig {
    let mut config = pair_config(items, 1);
    config.sequence.experiment = Variant::Community;
    config.sequence.communities = communities;
    config
}

pub fn triad_config(items: usize) -> ExperimentConfig {
    let mut config = pair_config(items, 1);
    config.sequence.experiment = Variant::Triad;
    config
}

pub fn alphabet(items: usize) -> SyntheticAlphabet {
    SyntheticAlphabet::new(items, PATTERN_DIM, 4, 0.2, 99)
}

pub fn hebbian(seed: u64) -> Result<HebbianPairModel, CollaboratorError> {
    HebbianPairModel::new(HebbianConfig::default(), PATTERN_DIM, seed)
}

/// Fails every step once `fail_after` steps have succeeded.
pub struct FailingModel {
    pub inner: HebbianPairModel,
    pub fail_after: usize,
    pub steps: usize,
}

impl FailingModel {
    pub fn new(seed: u64, fail_after: usize) -> Self {
        Self {
            inner: hebbian(seed).expect("valid sizes"),
            fail_after,
            steps: 0,
        }
    }
}

impl MemoryModel for FailingModel {
    fn schema(&self, mode: Mode) -> &[Feature] {
        self.inner.schema(mode)
    }

    fn reset(&mut self) -> Result<(), CollaboratorError> {
        self.inner.reset()
    }

    fn step(
        &mut self,
        batch: &DMatrix<f32>,
        labels: Option<&[usize]>,
        mode: Mode,
        aux: Option<AuxInputs<'_>>,
    ) -> Result<StepOutput, CollaboratorError> {
        if self.steps >= self.fail_after {
            return Err(CollaboratorError::Model {
                operation: "step",
                message: "injected failure".to_string(),
            });
        }
        self.steps += 1;
        self.inner.step(batch, labels, mode, aux)
    }
}

/// Ignores `reset`, so episodic weights leak between trials.
pub struct LeakyModel {
    pub inner: HebbianPairModel,
}

impl MemoryModel for LeakyModel {
    fn schema(&self, mode: Mode) -> &[Feature] {
        self.inner.schema(mode)
    }

    fn reset(&mut self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn step(
        &mut self,
        batch: &DMatrix<f32>,
        labels: Option<&[usize]>,
        mode: Mode,
        aux: Option<AuxInputs<'_>>,
    ) -> Result<StepOutput, CollaboratorError> {
        self.inner.step(batch, labels, mode, aux)
    }
}

/// Counts calls and can tamper with the emitted features.
pub struct InstrumentedModel {
    pub inner: HebbianPairModel,
    pub calls: usize,
    pub resets: usize,
    /// Extra feature added to recall outputs, outside the declared schema
    pub smuggle: Option<Feature>,
    /// Feature removed from recall outputs
    pub drop: Option<Feature>,
    /// Narrowed recall schema
    pub recall_schema: Option<Vec<Feature>>,
}

impl InstrumentedModel {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: hebbian(seed).expect("valid sizes"),
            calls: 0,
            resets: 0,
            smuggle: None,
            drop: None,
            recall_schema: None,
        }
    }
}

impl MemoryModel for InstrumentedModel {
    fn schema(&self, mode: Mode) -> &[Feature] {
        match (&self.recall_schema, mode) {
            (Some(schema), Mode::Recall) => schema,
            _ => self.inner.schema(mode),
        }
    }

    fn reset(&mut self) -> Result<(), CollaboratorError> {
        self.resets += 1;
        self.inner.reset()
    }

    fn step(
        &mut self,
        batch: &DMatrix<f32>,
        labels: Option<&[usize]>,
        mode: Mode,
        aux: Option<AuxInputs<'_>>,
    ) -> Result<StepOutput, CollaboratorError> {
        self.calls += 1;
        let mut output = self.inner.step(batch, labels, mode, aux)?;
        if mode == Mode::Recall {
            if let Some(feature) = self.smuggle {
                output.features.insert(feature, DMatrix::zeros(batch.nrows(), 1));
            }
            if let Some(feature) = self.drop {
                let mut kept = structbias_core::FeatureMap::new(mode, output.features.labels().to_vec());
                for name in output.features.features().filter(|f| *f != feature).collect::<Vec<_>>() {
                    if let Some(tensor) = output.features.get(name) {
                        kept.insert(name, tensor.clone());
                    }
                }
                output.features = kept;
            }
        }
        Ok(output)
    }
}
