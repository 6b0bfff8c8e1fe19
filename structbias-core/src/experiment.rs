//! Seed loop of a full experiment run.
//!
//! Each seed builds a fresh model, optionally pretrains it and runs every
//! epoch into its own accumulator. A collaborator failure abandons that
//! seed only; the seed's partial samples and files are dropped and the run
//! moves on.
//! Completed seeds are merged into the run accumulator before aggregation.

use crate::aggregate::{ExperimentAggregator, ExperimentSummary};
use crate::config::ExperimentConfig;
use crate::correlation::CorrelationAccumulator;
use crate::error::{CollaboratorError, HarnessError, HarnessResult};
use crate::export::ResultExporter;
use crate::metrics::RecallMetrics;
use crate::model::{MemoryModel, PatternDataset};
use crate::orchestrator::{EpochRecord, TrialOrchestrator};
use crate::pretrain::{PretrainReport, pretrain};
use crate::sequence::{StimulusSequence, derive_seed};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::path::PathBuf;

const STUDY_STREAM: u64 = 0;
const RECALL_STREAM: u64 = 1;
const PRETRAIN_STREAM: u64 = 2;

/// Stimulus sources of a run.
#[derive(Clone, Copy)]
pub struct Datasets<'a> {
    /// Items of the study and recall sequences
    pub stimuli: &'a dyn PatternDataset,
    /// Background set for long-term memory pretraining
    pub pretrain: Option<&'a dyn PatternDataset>,
}

/// Progress callbacks.
pub trait RunObserver {
    fn epoch_finished(&mut self, _seed: u64, _epoch: usize) {}

    fn seed_finished(&mut self, _seed: u64, _completed: bool) {}
}

impl RunObserver for () {}

/// Per-seed outcome that survived.
#[derive(Debug, Clone)]
pub struct SeedReport {
    pub seed: u64,
    pub pretrain: PretrainReport,
    pub metric_averages: BTreeMap<String, f64>,
    pub epochs: Vec<EpochRecord>,
}

/// Everything produced by a run.
#[derive(Debug)]
pub struct RunOutcome {
    pub accumulator: CorrelationAccumulator,
    pub summary: ExperimentSummary,
    pub seeds: Vec<SeedReport>,
    pub failed_seeds: Vec<(u64, CollaboratorError)>,
}

/// Where a seed's files go, and the list of what it has written so far.
struct SeedOutput<'a> {
    exporter: Option<&'a ResultExporter>,
    files: &'a mut Vec<PathBuf>,
}

/// A validated experiment.
#[derive(Debug, Clone)]
pub struct Experiment {
    config: ExperimentConfig,
    orchestrator: TrialOrchestrator,
}

impl Experiment {
    /// Validate the configuration; nothing runs on failure.
    pub fn new(config: ExperimentConfig) -> HarnessResult<Self> {
        config.validate()?;
        let orchestrator = TrialOrchestrator::new(config.protocol.clone(), config.sequence.item_count)?;
        Ok(Self { config, orchestrator })
    }

    #[must_use]
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Run seeds drawn from the base seed, or from entropy without one.
    #[must_use]
    pub fn seeds(&self) -> Vec<u64> {
        let mut rng = match self.config.run.base_seed {
            Some(base) => ChaCha8Rng::seed_from_u64(base),
            None => ChaCha8Rng::from_entropy(),
        };
        (0..self.config.run.seeds).map(|_| rng.gen_range(1..10_000)).collect()
    }

    /// Run every seed and aggregate the completed ones.
    pub fn run<M, F>(
        &self,
        datasets: Datasets<'_>,
        build_model: F,
        exporter: Option<&ResultExporter>,
    ) -> HarnessResult<RunOutcome>
    where
        M: MemoryModel,
        F: FnMut(u64) -> Result<M, CollaboratorError>,
    {
        self.run_observed(datasets, build_model, exporter, &mut ())
    }

    /// [`Experiment::run`] with progress callbacks.
    pub fn run_observed<M, F>(
        &self,
        datasets: Datasets<'_>,
        mut build_model: F,
        exporter: Option<&ResultExporter>,
        observer: &mut dyn RunObserver,
    ) -> HarnessResult<RunOutcome>
    where
        M: MemoryModel,
        F: FnMut(u64) -> Result<M, CollaboratorError>,
    {
        let params = self.config.sequence_params();
        let mut accumulator = CorrelationAccumulator::new(
            params.variant,
            params.item_count,
            &self.config.protocol.test_components,
        );
        let mut seeds = Vec::new();
        let mut failed_seeds = Vec::new();

        for seed in self.seeds() {
            let span = tracing::info_span!("seed", seed);
            let _guard = span.enter();

            let mut seed_accumulator = accumulator.empty_like();
            let mut seed_files = Vec::new();
            let result = build_model(seed)
                .map_err(HarnessError::from)
                .and_then(|mut model| {
                    self.run_seed(
                        &mut model,
                        datasets,
                        seed,
                        &mut seed_accumulator,
                        SeedOutput {
                            exporter,
                            files: &mut seed_files,
                        },
                        observer,
                    )
                });

            match result {
                Ok(report) => {
                    accumulator.merge(seed_accumulator)?;
                    tracing::info!(metrics = ?report.metric_averages, "seed complete");
                    observer.seed_finished(seed, true);
                    seeds.push(report);
                }
                Err(HarnessError::Collaborator(err)) => {
                    tracing::warn!(error = %err, "collaborator failed, dropping seed");
                    if let Some(exporter) = exporter {
                        exporter.discard(&seed_files);
                    }
                    observer.seed_finished(seed, false);
                    failed_seeds.push((seed, err));
                }
                Err(err) => return Err(err),
            }
        }

        let summary = ExperimentAggregator::aggregate(&accumulator)?;
        if let Some(exporter) = exporter {
            exporter.write_summary(&accumulator, &summary);
        }

        tracing::info!(
            completed = seeds.len(),
            failed = failed_seeds.len(),
            "experiment finished"
        );
        Ok(RunOutcome {
            accumulator,
            summary,
            seeds,
            failed_seeds,
        })
    }

    fn run_seed<M: MemoryModel>(
        &self,
        model: &mut M,
        datasets: Datasets<'_>,
        seed: u64,
        accumulator: &mut CorrelationAccumulator,
        output: SeedOutput<'_>,
        observer: &mut dyn RunObserver,
    ) -> HarnessResult<SeedReport> {
        let SeedOutput { exporter, files } = output;
        let params = self.config.sequence_params();
        let pretrain_report = pretrain(
            model,
            datasets.pretrain,
            &self.config.pretrain,
            derive_seed(seed, 0, PRETRAIN_STREAM),
        )?;
        let mut metrics = RecallMetrics::new(self.config.metrics.as_ref())?;
        let mut epochs = Vec::with_capacity(self.config.protocol.train_epochs);

        for epoch in 0..self.config.protocol.train_epochs {
            let study = StimulusSequence::generate(params, derive_seed(seed, epoch, STUDY_STREAM))?;
            let recall = StimulusSequence::generate(params, derive_seed(seed, epoch, RECALL_STREAM))?;
            let record =
                self.orchestrator
                    .run_epoch(model, datasets.stimuli, epoch, &study, &recall, accumulator, &mut metrics)?;

            if let Some(exporter) = exporter {
                files.extend(exporter.write_epoch(seed, &record).written);
            }
            observer.epoch_finished(seed, epoch);
            epochs.push(record);
        }

        let metric_averages = metrics.averages();
        tracing::debug!(trials = metrics.trials(), metrics = metric_averages.len(), "averaged recall metrics");
        if let Some(exporter) = exporter
            && !metric_averages.is_empty()
        {
            files.extend(exporter.write_metrics(seed, &metric_averages).written);
        }

        Ok(SeedReport {
            seed,
            pretrain: pretrain_report,
            metric_averages,
            epochs,
        })
    }
}
