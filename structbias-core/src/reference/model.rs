//! Hebbian pair-associative memory.
//!
//! Long-term memory is a fixed random projection of mean-centred input;
//! pretraining only adapts the input mean. The episodic part follows the
//! hippocampal loop: a k-winner-take-all dentate code drives CA3, CA3
//! learns its own codes autoassociatively, and CA3 codes map to a CA1
//! read-out and to a reconstruction of the paired stimulus. `reset` clears
//! every episodic weight.

use crate::error::CollaboratorError;
use crate::model::{AuxInputs, Feature, FeatureMap, MemoryModel, Mode, StepOutput};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const LTM_SCHEMA: &[Feature] = &[Feature::Ltm];
const EPISODIC_SCHEMA: &[Feature] = &[
    Feature::Dg,
    Feature::Pr,
    Feature::EcCa3,
    Feature::Ca3Ca1,
    Feature::Ca1,
    Feature::ReconPair,
];

/// Layer sizes and learning rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HebbianConfig {
    pub ltm_size: usize,
    pub dg_size: usize,
    /// Fraction of dentate units active per pattern
    pub dg_sparsity: f32,
    pub pr_size: usize,
    pub learning_rate: f32,
    /// Rate at which pretraining tracks the input mean
    pub pretrain_rate: f32,
    /// Recurrent CA3 settling iterations during recall
    pub ca3_iterations: usize,
}

impl Default for HebbianConfig {
    fn default() -> Self {
        Self {
            ltm_size: 64,
            dg_size: 128,
            dg_sparsity: 0.1,
            pr_size: 48,
            learning_rate: 0.2,
            pretrain_rate: 0.1,
            ca3_iterations: 3,
        }
    }
}

/// Reference [`MemoryModel`].
#[derive(Debug, Clone)]
pub struct HebbianPairModel {
    config: HebbianConfig,
    pattern_dim: usize,
    active_units: usize,
    ltm_projection: DMatrix<f32>,
    input_mean: DVector<f32>,
    dg_projection: DMatrix<f32>,
    pr_projection: DMatrix<f32>,
    ca3_weights: DMatrix<f32>,
    ca1_weights: DMatrix<f32>,
    recon_weights: DMatrix<f32>,
}

fn random_matrix(rows: usize, cols: usize, rng: &mut ChaCha8Rng) -> DMatrix<f32> {
    let scale = 1.0 / (cols.max(1) as f32).sqrt();
    DMatrix::from_fn(rows, cols, |_, _| rng.gen_range(-1.0..1.0) * scale)
}

/// Binary top-k code; ties resolve to the lower index.
fn k_winners(activation: &DVector<f32>, k: usize) -> DVector<f32> {
    let mut order: Vec<usize> = (0..activation.len()).collect();
    order.sort_by(|&a, &b| activation[b].total_cmp(&activation[a]).then(a.cmp(&b)));
    let mut code = DVector::zeros(activation.len());
    for &index in order.iter().take(k) {
        code[index] = 1.0;
    }
    code
}

fn rows_of(matrix: &DMatrix<f32>) -> impl Iterator<Item = DVector<f32>> + '_ {
    (0..matrix.nrows()).map(|i| matrix.row(i).transpose())
}

fn stack(rows: &[DVector<f32>], width: usize) -> DMatrix<f32> {
    DMatrix::from_fn(rows.len(), width, |i, j| rows[i][j])
}

/// Keep the largest absolute weight at or below 1.
fn normalise(weights: &mut DMatrix<f32>) {
    let max = weights.amax();
    if max > 1.0 {
        *weights /= max;
    }
}

fn model_error(operation: &'static str, message: String) -> CollaboratorError {
    CollaboratorError::Model { operation, message }
}

impl HebbianPairModel {
    /// Build with random fixed projections for inputs of `pattern_dim`
    /// values.
    pub fn new(config: HebbianConfig, pattern_dim: usize, seed: u64) -> Result<Self, CollaboratorError> {
        if pattern_dim == 0 || config.ltm_size == 0 || config.dg_size == 0 || config.pr_size == 0 {
            return Err(model_error("init", "layer sizes must be non-zero".to_string()));
        }
        if !(config.dg_sparsity > 0.0 && config.dg_sparsity <= 1.0) {
            return Err(model_error(
                "init",
                format!("dg_sparsity {} is outside (0, 1]", config.dg_sparsity),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let active_units = ((config.dg_size as f32 * config.dg_sparsity).round() as usize).max(1);
        let ltm_projection = random_matrix(config.ltm_size, pattern_dim, &mut rng);
        let dg_projection = random_matrix(config.dg_size, config.ltm_size, &mut rng);
        let pr_projection = random_matrix(config.pr_size, config.ltm_size, &mut rng);

        Ok(Self {
            pattern_dim,
            active_units,
            ltm_projection,
            input_mean: DVector::zeros(pattern_dim),
            dg_projection,
            pr_projection,
            ca3_weights: DMatrix::zeros(config.dg_size, config.dg_size),
            ca1_weights: DMatrix::zeros(config.pr_size, config.dg_size),
            recon_weights: DMatrix::zeros(2 * pattern_dim, config.dg_size),
            config,
        })
    }

    fn check_width(&self, batch: &DMatrix<f32>, expected: usize) -> Result<(), CollaboratorError> {
        if batch.ncols() == expected {
            Ok(())
        } else {
            Err(CollaboratorError::Shape {
                expected,
                actual: batch.ncols(),
            })
        }
    }

    fn encode(&self, batch: &DMatrix<f32>) -> DMatrix<f32> {
        let codes: Vec<DVector<f32>> = rows_of(batch)
            .map(|x| (&self.ltm_projection * (x - &self.input_mean)).map(f32::tanh))
            .collect();
        stack(&codes, self.config.ltm_size)
    }

    fn dentate(&self, x: &DVector<f32>) -> DVector<f32> {
        k_winners(&(&self.dg_projection * x), self.active_units)
    }

    /// Let CA3 settle from a dentate cue.
    fn complete(&self, cue: &DVector<f32>) -> DVector<f32> {
        let mut state = cue.clone();
        if self.ca3_weights.amax() == 0.0 {
            return state;
        }
        for _ in 0..self.config.ca3_iterations {
            let drive = &self.ca3_weights * &state + cue;
            state = k_winners(&drive, self.active_units);
        }
        state
    }

    fn episodic(
        &mut self,
        batch: &DMatrix<f32>,
        labels: Option<&[usize]>,
        mode: Mode,
        aux: Option<AuxInputs<'_>>,
    ) -> Result<StepOutput, CollaboratorError> {
        self.check_width(batch, self.config.ltm_size)?;
        let learning = !mode.is_frozen();
        let paired = match aux {
            Some(aux) => {
                self.check_width(aux.paired_inputs, 2 * self.pattern_dim)?;
                if aux.paired_inputs.nrows() != batch.nrows() {
                    return Err(CollaboratorError::Shape {
                        expected: batch.nrows(),
                        actual: aux.paired_inputs.nrows(),
                    });
                }
                Some(aux.paired_inputs)
            }
            None if learning => {
                return Err(model_error("study", "paired inputs are required".to_string()));
            }
            None => None,
        };

        let rate = self.config.learning_rate;
        let mut dg = Vec::with_capacity(batch.nrows());
        let mut pr = Vec::with_capacity(batch.nrows());
        let mut ca3 = Vec::with_capacity(batch.nrows());
        let mut ca3_ca1 = Vec::with_capacity(batch.nrows());
        let mut recon = Vec::with_capacity(batch.nrows());
        let mut error = 0.0f32;

        for (row, x) in rows_of(batch).enumerate() {
            let dg_code = self.dentate(&x);
            let pr_code = (&self.pr_projection * &x).map(f32::tanh);
            let state = if learning { dg_code.clone() } else { self.complete(&dg_code) };
            let reconstruction = &self.recon_weights * &state;

            if let Some(paired) = paired {
                let target = paired.row(row).transpose();
                let residual = &target - &reconstruction;
                error += residual.norm_squared() / target.len() as f32;

                if learning {
                    let mut hebbian = &state * state.transpose();
                    hebbian.fill_diagonal(0.0);
                    self.ca3_weights += hebbian * rate;
                    normalise(&mut self.ca3_weights);
                    self.ca1_weights += &pr_code * state.transpose() * rate;
                    normalise(&mut self.ca1_weights);
                    let active = state.sum().max(1.0);
                    self.recon_weights += residual * state.transpose() * (rate / active);
                }
            }

            ca3_ca1.push(&self.ca1_weights * &state);
            recon.push(reconstruction);
            dg.push(dg_code);
            pr.push(pr_code);
            ca3.push(state);
        }

        let ca1: Vec<DVector<f32>> = ca3_ca1.iter().map(|v| v.map(f32::tanh)).collect();
        let features = FeatureMap::new(mode, labels.map(<[usize]>::to_vec).unwrap_or_default())
            .with(Feature::Dg, stack(&dg, self.config.dg_size))
            .with(Feature::Pr, stack(&pr, self.config.pr_size))
            .with(Feature::EcCa3, stack(&ca3, self.config.dg_size))
            .with(Feature::Ca3Ca1, stack(&ca3_ca1, self.config.pr_size))
            .with(Feature::Ca1, stack(&ca1, self.config.pr_size))
            .with(Feature::ReconPair, stack(&recon, 2 * self.pattern_dim));

        let mut losses = BTreeMap::new();
        if paired.is_some() && batch.nrows() > 0 {
            losses.insert("recon_mse".to_string(), error / batch.nrows() as f32);
        }
        Ok(StepOutput { losses, features })
    }
}

impl MemoryModel for HebbianPairModel {
    fn schema(&self, mode: Mode) -> &[Feature] {
        match mode {
            Mode::Pretrain | Mode::Validate => LTM_SCHEMA,
            Mode::Study | Mode::Recall => EPISODIC_SCHEMA,
        }
    }

    fn reset(&mut self) -> Result<(), CollaboratorError> {
        self.ca3_weights.fill(0.0);
        self.ca1_weights.fill(0.0);
        self.recon_weights.fill(0.0);
        Ok(())
    }

    fn step(
        &mut self,
        batch: &DMatrix<f32>,
        labels: Option<&[usize]>,
        mode: Mode,
        aux: Option<AuxInputs<'_>>,
    ) -> Result<StepOutput, CollaboratorError> {
        match mode {
            Mode::Pretrain | Mode::Validate => {
                self.check_width(batch, self.pattern_dim)?;
                let mut losses = BTreeMap::new();
                if !mode.is_frozen() && batch.nrows() > 0 {
                    let batch_mean = batch.row_mean().transpose();
                    let shift = &batch_mean - &self.input_mean;
                    losses.insert("mean_shift".to_string(), shift.norm());
                    self.input_mean += shift * self.config.pretrain_rate;
                } else if batch.nrows() > 0 {
                    let offset = batch.row_mean().transpose() - &self.input_mean;
                    losses.insert("mean_shift".to_string(), offset.norm());
                }
                let features = FeatureMap::new(mode, labels.map(<[usize]>::to_vec).unwrap_or_default())
                    .with(Feature::Ltm, self.encode(batch));
                Ok(StepOutput { losses, features })
            }
            Mode::Study | Mode::Recall => self.episodic(batch, labels, mode, aux),
        }
    }
}
