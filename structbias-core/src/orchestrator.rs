//! Per-trial study and recall protocol.
//!
//! Each trial resets the model, studies one batch for a fixed number of
//! steps and probes recall twice: early, after partial exposure, and late,
//! after the last study step. Probe responses feed the correlation
//! accumulator; a final recall pass after the study loop feeds the recall
//! metrics.

use crate::config::ProtocolConfig;
use crate::correlation::{CorrelationAccumulator, best_match};
use crate::error::{CollaboratorError, ConfigError, HarnessResult};
use crate::metrics::{RecallMetrics, TrialFeatures};
use crate::model::{AuxInputs, Feature, FeatureMap, MemoryModel, Mode, PatternDataset, StepOutput};
use crate::sequence::{ItemPair, StimulusSequence};
use crate::stimulus::{ElementSelector, PairSource, pad_with_blank, tile_rows};
use crate::variant::{PerProbe, Probe};
use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// Zero-based study steps at which the two probes fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSchedule {
    early: usize,
    late: usize,
}

impl ProbeSchedule {
    /// `early_step` is 1-based; `late_steps` is the total number of study
    /// steps.
    pub fn new(early_step: usize, late_steps: usize) -> Result<Self, ConfigError> {
        if early_step == 0 {
            return Err(ConfigError::ZeroEarlyStep);
        }
        if early_step >= late_steps {
            return Err(ConfigError::ProbeOrder {
                early: early_step,
                late: late_steps,
            });
        }
        Ok(Self {
            early: early_step - 1,
            late: late_steps - 1,
        })
    }

    #[must_use]
    pub const fn study_steps(&self) -> usize {
        self.late + 1
    }

    /// Probe issued after study step `step`, if any.
    #[must_use]
    pub const fn probe_at(&self, step: usize) -> Option<Probe> {
        if step == self.early {
            Some(Probe::Early)
        } else if step == self.late {
            Some(Probe::Late)
        } else {
            None
        }
    }
}

/// Results of one epoch that are written out per seed.
#[derive(Debug, Clone, Default)]
pub struct EpochRecord {
    pub epoch: usize,
    /// Predicted core pair per recalled row, one list per trial
    pub predictions: PerProbe<Vec<Vec<ItemPair>>>,
    /// Studied pairs, one list per trial
    pub study_pairs: Vec<Vec<ItemPair>>,
    /// Recall metric scores, one map per trial
    pub metrics: Vec<BTreeMap<String, f64>>,
}

impl EpochRecord {
    #[must_use]
    pub fn trials(&self) -> usize {
        self.study_pairs.len()
    }
}

/// Encoded and raw inputs for one side of a trial.
struct Stimuli {
    data: DMatrix<f32>,
    paired: DMatrix<f32>,
    labels: Vec<usize>,
}

impl Stimuli {
    const fn aux(&self) -> AuxInputs<'_> {
        AuxInputs {
            ec_inputs: &self.data,
            paired_inputs: &self.paired,
        }
    }
}

/// Drives a model through the trials of an epoch.
#[derive(Debug, Clone)]
pub struct TrialOrchestrator {
    protocol: ProtocolConfig,
    schedule: ProbeSchedule,
    item_count: usize,
}

impl TrialOrchestrator {
    pub fn new(protocol: ProtocolConfig, item_count: usize) -> Result<Self, ConfigError> {
        let schedule = ProbeSchedule::new(protocol.early_response_step, protocol.late_response_steps)?;
        if protocol.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            protocol,
            schedule,
            item_count,
        })
    }

    #[must_use]
    pub const fn schedule(&self) -> ProbeSchedule {
        self.schedule
    }

    /// Run every trial of one epoch.
    ///
    /// The study and recall sequences must cut into the same number of
    /// batches; this is checked before the model is touched.
    #[allow(clippy::too_many_arguments)]
    pub fn run_epoch<M: MemoryModel + ?Sized>(
        &self,
        model: &mut M,
        dataset: &dyn PatternDataset,
        epoch: usize,
        study: &StimulusSequence,
        recall: &StimulusSequence,
        accumulator: &mut CorrelationAccumulator,
        metrics: &mut RecallMetrics,
    ) -> HarnessResult<EpochRecord> {
        let batch_size = self.protocol.batch_size;
        let study_batches: Vec<&[ItemPair]> = study.batches(batch_size).collect();
        let recall_batches: Vec<&[ItemPair]> = recall.batches(batch_size).collect();
        if study_batches.len() != recall_batches.len() {
            return Err(ConfigError::StreamLengthMismatch {
                study: study_batches.len(),
                recall: recall_batches.len(),
            }
            .into());
        }

        let first_variation = if self.protocol.cross_variation {
            self.protocol.recall_variation
        } else {
            self.protocol.study_variation
        };
        let study_source = PairSource::new(dataset, first_variation, self.protocol.study_variation);
        let recall_source = PairSource::uniform(dataset, self.protocol.recall_variation);

        let core_pairs = recall.core_label_sequence();
        let references = study_source.stimuli(core_pairs, ElementSelector::Both)?;

        let mut record = EpochRecord {
            epoch,
            ..EpochRecord::default()
        };

        for (trial, (study_batch, recall_batch)) in study_batches.into_iter().zip(recall_batches).enumerate() {
            let study_stimuli = self.study_stimuli(model, &study_source, study, study_batch)?;
            let recall_stimuli = if self.protocol.single_recall {
                self.single_item_stimuli(model, &recall_source, recall)?
            } else {
                self.pair_stimuli(model, &recall_source, recall, recall_batch)?
            };

            model.reset()?;

            let mut last_study: Option<FeatureMap> = None;
            for step in 0..self.schedule.study_steps() {
                let output = call(
                    model,
                    &study_stimuli.data,
                    &study_stimuli.labels,
                    Mode::Study,
                    Some(study_stimuli.aux()),
                )?;
                tracing::debug!(
                    epoch,
                    trial,
                    step,
                    loss = output.total_loss(),
                    "study step"
                );
                last_study = Some(output.features);

                if let Some(probe) = self.schedule.probe_at(step) {
                    let response = call(
                        model,
                        &recall_stimuli.data,
                        &recall_stimuli.labels,
                        Mode::Recall,
                        Some(recall_stimuli.aux()),
                    )?;
                    self.record_probe(probe, &response.features, recall, accumulator, &references, &mut record)?;
                }
            }

            let recalled = call(
                model,
                &recall_stimuli.data,
                &recall_stimuli.labels,
                Mode::Recall,
                Some(recall_stimuli.aux()),
            )?;
            if let Some(studied) = &last_study {
                let scores = metrics.evaluate(TrialFeatures {
                    study: studied,
                    recall: &recalled.features,
                })?;
                if !scores.is_empty() {
                    tracing::debug!(epoch, trial, scores = ?scores, "recall metrics");
                }
                record.metrics.push(scores);
            }

            record.study_pairs.push(study_batch.to_vec());
        }

        tracing::info!(
            epoch,
            trials = record.trials(),
            variant = %study.variant(),
            "epoch complete"
        );
        Ok(record)
    }

    fn record_probe(
        &self,
        probe: Probe,
        response: &FeatureMap,
        structure: &StimulusSequence,
        accumulator: &mut CorrelationAccumulator,
        references: &DMatrix<f32>,
        record: &mut EpochRecord,
    ) -> HarnessResult<()> {
        for &component in &self.protocol.test_components {
            let features = response.require(component)?;
            accumulator.record(component, probe, features, structure)?;
        }

        if let Some(component) = self.protocol.reconstruction_component {
            let recon = response.require(component)?;
            let predicted = classify(recon, references, structure.core_label_sequence())?;
            record.predictions.get_mut(probe).push(predicted);
        }
        Ok(())
    }

    /// Paired study patterns and `coef * ltm(first) + ltm(second)`.
    fn study_stimuli<M: MemoryModel + ?Sized>(
        &self,
        model: &mut M,
        source: &PairSource<'_>,
        structure: &StimulusSequence,
        batch: &[ItemPair],
    ) -> HarnessResult<Stimuli> {
        let paired = source.stimuli(batch, ElementSelector::Both)?;
        let first = encode(model, &source.stimuli(batch, ElementSelector::First)?)?;
        let second = encode(model, &source.stimuli(batch, ElementSelector::Second)?)?;
        let data = combine(&first, &second, self.protocol.activation_coefficient)?;
        Ok(Stimuli {
            data,
            paired,
            labels: pair_labels(structure, batch)?,
        })
    }

    /// Recall pairs encoded as `ltm(first) + ltm(second)`.
    fn pair_stimuli<M: MemoryModel + ?Sized>(
        &self,
        model: &mut M,
        source: &PairSource<'_>,
        structure: &StimulusSequence,
        batch: &[ItemPair],
    ) -> HarnessResult<Stimuli> {
        let paired = source.stimuli(batch, ElementSelector::Both)?;
        let first = encode(model, &source.stimuli(batch, ElementSelector::First)?)?;
        let second = encode(model, &source.stimuli(batch, ElementSelector::Second)?)?;
        Ok(Stimuli {
            data: combine(&first, &second, 1.0)?,
            paired,
            labels: pair_labels(structure, batch)?,
        })
    }

    /// The first `item_count` items repeated to the batch size. The paired
    /// input is the item followed by a blank partner.
    fn single_item_stimuli<M: MemoryModel + ?Sized>(
        &self,
        model: &mut M,
        source: &PairSource<'_>,
        structure: &StimulusSequence,
    ) -> HarnessResult<Stimuli> {
        let items = tile_rows(&source.items(self.item_count)?, self.protocol.batch_size);
        let data = encode(model, &items)?;
        let core = structure.core_label_sequence();
        let labels = (0..items.nrows())
            .map(|row| {
                let item = row % self.item_count;
                core.iter()
                    .position(|&(a, b)| a == item || b == item)
                    .unwrap_or(item)
            })
            .collect();
        Ok(Stimuli {
            data,
            paired: pad_with_blank(&items),
            labels,
        })
    }
}

/// One model step with the output checked against the mode's schema.
fn call<M: MemoryModel + ?Sized>(
    model: &mut M,
    batch: &DMatrix<f32>,
    labels: &[usize],
    mode: Mode,
    aux: Option<AuxInputs<'_>>,
) -> Result<StepOutput, CollaboratorError> {
    let output = model.step(batch, Some(labels), mode, aux)?;
    output.features.check_schema(model.schema(mode))?;
    Ok(output)
}

/// Long-term memory encoding of raw stimuli, without weight update.
fn encode<M: MemoryModel + ?Sized>(model: &mut M, raw: &DMatrix<f32>) -> HarnessResult<DMatrix<f32>> {
    let output = model.step(raw, None, Mode::Validate, None)?;
    output.features.check_schema(model.schema(Mode::Validate))?;
    let encoded = output.features.require(Feature::Ltm)?;
    if encoded.nrows() != raw.nrows() {
        return Err(CollaboratorError::Shape {
            expected: raw.nrows(),
            actual: encoded.nrows(),
        }
        .into());
    }
    Ok(encoded.clone())
}

fn combine(first: &DMatrix<f32>, second: &DMatrix<f32>, coefficient: f32) -> Result<DMatrix<f32>, CollaboratorError> {
    if first.shape() != second.shape() {
        return Err(CollaboratorError::Shape {
            expected: first.len(),
            actual: second.len(),
        });
    }
    Ok(first * coefficient + second)
}

fn pair_labels(structure: &StimulusSequence, batch: &[ItemPair]) -> Result<Vec<usize>, ConfigError> {
    batch
        .iter()
        .map(|&pair| {
            structure.label_of(pair).ok_or_else(|| ConfigError::Invalid {
                field: "sequence",
                reason: format!("pair {pair:?} is not part of the designed structure"),
            })
        })
        .collect()
}

/// Nearest core pair (cosine) of each recalled row.
fn classify(
    recalled: &DMatrix<f32>,
    references: &DMatrix<f32>,
    core_pairs: &[ItemPair],
) -> Result<Vec<ItemPair>, CollaboratorError> {
    if recalled.ncols() != references.ncols() {
        return Err(CollaboratorError::Shape {
            expected: references.ncols(),
            actual: recalled.ncols(),
        });
    }
    Ok((0..recalled.nrows())
        .filter_map(|row| {
            let pattern: Vec<f32> = recalled.row(row).iter().copied().collect();
            best_match(&pattern, references).map(|index| core_pairs[index])
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_tags_early_and_late_steps() {
        let schedule = ProbeSchedule::new(2, 5).expect("early before late");
        assert_eq!(schedule.study_steps(), 5);
        let probes: Vec<_> = (0..5).map(|step| schedule.probe_at(step)).collect();
        assert_eq!(probes, vec![None, Some(Probe::Early), None, None, Some(Probe::Late)]);
    }

    #[test]
    fn schedule_rejects_bad_orders() {
        assert!(matches!(ProbeSchedule::new(0, 3), Err(ConfigError::ZeroEarlyStep)));
        assert!(matches!(
            ProbeSchedule::new(3, 3),
            Err(ConfigError::ProbeOrder { early: 3, late: 3 })
        ));
    }

    #[test]
    fn classification_picks_the_nearest_core_pair() {
        let references = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let recalled = DMatrix::from_row_slice(3, 2, &[0.1, 0.9, 0.8, 0.2, 0.5, 0.5]);
        let predicted = classify(&recalled, &references, &[(0, 1), (2, 3)]).expect("same width");
        assert_eq!(predicted, vec![(2, 3), (0, 1), (0, 1)]);
    }

    #[test]
    fn combination_weights_the_first_element() {
        let first = DMatrix::from_element(1, 2, 1.0);
        let second = DMatrix::from_element(1, 2, 0.5);
        let combined = combine(&first, &second, 2.0).expect("same shape");
        assert_eq!(combined[(0, 1)], 2.5);
        assert!(combine(&first, &DMatrix::zeros(2, 2), 1.0).is_err());
    }
}
