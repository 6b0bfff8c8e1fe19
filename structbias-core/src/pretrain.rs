//! Long-term memory pretraining on a background pattern set.

use crate::config::PretrainConfig;
use crate::error::CollaboratorError;
use crate::model::{MemoryModel, Mode, PatternDataset, Variation};
use crate::stimulus::stack_rows;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Summary of a pretraining run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PretrainReport {
    pub epochs: usize,
    pub steps: usize,
    pub train_samples: usize,
    pub validation_samples: usize,
    /// Validation passes run across all epochs
    pub validations: usize,
    pub last_train_loss: Option<f32>,
    pub last_validation_loss: Option<f32>,
}

impl PretrainReport {
    #[must_use]
    pub const fn skipped() -> Self {
        Self {
            epochs: 0,
            steps: 0,
            train_samples: 0,
            validation_samples: 0,
            validations: 0,
            last_train_loss: None,
            last_validation_loss: None,
        }
    }
}

/// Shuffle `len` indices and split off the validation share.
fn split_indices(len: usize, validation_split: f64, rng: &mut ChaCha8Rng) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);
    let held_out = ((len as f64) * validation_split).round() as usize;
    let train = indices.split_off(held_out.min(len));
    (train, indices)
}

fn load_batch(
    dataset: &dyn PatternDataset,
    indices: &[usize],
) -> Result<(nalgebra::DMatrix<f32>, Vec<usize>), CollaboratorError> {
    let mut rows = Vec::with_capacity(indices.len());
    let mut labels = Vec::with_capacity(indices.len());
    for &index in indices {
        let pattern = dataset.pattern(index, Variation::Any)?;
        rows.push(pattern.values);
        labels.push(pattern.label);
    }
    Ok((stack_rows(&rows)?, labels))
}

/// Pretrain `model` for `config.epochs` epochs.
///
/// Returns a skipped report when there are no epochs or no data.
pub fn pretrain<M: MemoryModel + ?Sized>(
    model: &mut M,
    dataset: Option<&dyn PatternDataset>,
    config: &PretrainConfig,
    seed: u64,
) -> Result<PretrainReport, CollaboratorError> {
    let Some(dataset) = dataset.filter(|d| !d.is_empty()) else {
        return Ok(PretrainReport::skipped());
    };
    if config.epochs == 0 {
        return Ok(PretrainReport::skipped());
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (mut train, validation) = split_indices(dataset.len(), config.validation_split, &mut rng);
    let batch_size = config.batch_size.max(1);
    let supervised = model.is_supervised();

    let mut report = PretrainReport {
        train_samples: train.len(),
        validation_samples: validation.len(),
        ..PretrainReport::skipped()
    };

    tracing::info!(
        train = train.len(),
        validation = validation.len(),
        epochs = config.epochs,
        "starting pretraining"
    );

    for epoch in 0..config.epochs {
        train.shuffle(&mut rng);
        let batches: Vec<&[usize]> = train.chunks(batch_size).collect();
        let limit = if config.max_steps == 0 { batches.len() } else { config.max_steps.min(batches.len()) };

        for (batch_index, indices) in batches.iter().take(limit).enumerate() {
            let (batch, labels) = load_batch(dataset, indices)?;
            let output = model.step(&batch, supervised.then_some(labels.as_slice()), Mode::Pretrain, None)?;
            output.features.check_schema(model.schema(Mode::Pretrain))?;
            let loss = output.total_loss();
            report.steps += 1;
            report.last_train_loss = Some(loss);

            if config.log_every > 0 && batch_index % config.log_every == 0 {
                tracing::info!(epoch, batch = batch_index, loss, "pretrain step");
            }

            // Validate on the first batch, every `validate_every` batches after it and at the end
            let last = batch_index + 1 == limit;
            let due = config.validate_every > 0 && batch_index % config.validate_every == 0;
            if (due || last) && !validation.is_empty() {
                let loss = validate(model, dataset, &validation, batch_size, config.max_validation_steps)?;
                report.last_validation_loss = Some(loss);
                report.validations += 1;
                tracing::info!(epoch, batch = batch_index, loss, "pretrain validation");
            }
        }
        report.epochs += 1;
    }

    Ok(report)
}

/// Mean loss over at most `max_steps` validation batches.
fn validate<M: MemoryModel + ?Sized>(
    model: &mut M,
    dataset: &dyn PatternDataset,
    validation: &[usize],
    batch_size: usize,
    max_steps: usize,
) -> Result<f32, CollaboratorError> {
    let mut total = 0.0;
    let mut count = 0usize;
    for indices in validation.chunks(batch_size).take(max_steps.max(1)) {
        let (batch, _) = load_batch(dataset, indices)?;
        let output = model.step(&batch, None, Mode::Validate, None)?;
        output.features.check_schema(model.schema(Mode::Validate))?;
        total += output.total_loss();
        count += 1;
    }
    Ok(if count == 0 { 0.0 } else { total / count as f32 })
}
