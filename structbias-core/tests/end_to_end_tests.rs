//! Full runs through the reference collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod support;

use std::cell::RefCell;
use std::path::Path;
use structbias_core::export::{ContrastTable, RenderError};
use structbias_core::{
    BarChartRenderer, Datasets, Experiment, Feature, HarnessError, HeatmapRenderer, Probe, ResultExporter, Variant,
};
use support::{alphabet, community_config, hebbian, pair_config, triad_config};

#[test]
fn eight_item_pair_run_produces_early_and_late_statistics() {
    let experiment = Experiment::new(pair_config(8, 1)).expect("valid config");
    let data = alphabet(8);
    let outcome = experiment
        .run(
            Datasets {
                stimuli: &data,
                pretrain: None,
            },
            hebbian,
            None,
        )
        .expect("run completes");

    assert_eq!(outcome.seeds.len(), 1);
    assert!(outcome.failed_seeds.is_empty());

    // 20 pairs in batches of 10: two trials, one early and one late probe each
    for component in outcome.accumulator.components() {
        let counts = outcome.accumulator.counts(component);
        assert_eq!((counts.early, counts.late), (2, 2), "{component}");
        for probe in Probe::BOTH {
            let series = outcome.accumulator.series(component, probe).expect("tracked");
            assert!(series.contrasts().iter().all(|c| c.len() == 2));
        }
    }

    for summary in &outcome.summary.components {
        for (probe, matrix) in summary.matrix.iter() {
            assert_eq!(matrix.shape(), (8, 8), "{} {probe}", summary.component);
            for i in 0..8 {
                for j in 0..8 {
                    let r = matrix[(i, j)];
                    assert!((-1.0..=1.0).contains(&r), "{r}");
                    assert_eq!(r, matrix[(j, i)]);
                }
            }
        }
        assert_eq!(summary.contrast.early.samples, 2);
        assert_eq!(summary.contrast.late.samples, 2);
    }

    let epoch = &outcome.seeds[0].epochs[0];
    assert_eq!(epoch.trials(), 2);
    assert_eq!(epoch.predictions.early.len(), 2);
    assert_eq!(epoch.predictions.late.len(), 2);
    assert!(epoch.study_pairs.iter().all(|batch| batch.len() == 10));
    assert!(outcome.seeds[0].metric_averages.contains_key("pr_rf_accuracy"));
}

#[test]
fn t_trials_give_t_early_and_t_late_entries_across_seeds_and_epochs() {
    let mut config = pair_config(8, 3);
    config.protocol.train_epochs = 2;
    config.sequence.sequence_length = 40;
    let experiment = Experiment::new(config).expect("valid config");
    let data = alphabet(8);
    let outcome = experiment
        .run(
            Datasets {
                stimuli: &data,
                pretrain: None,
            },
            hebbian,
            None,
        )
        .expect("run completes");

    // 3 seeds x 2 epochs x 4 trials
    let counts = outcome.accumulator.counts(Feature::Dg);
    assert_eq!((counts.early, counts.late), (24, 24));
}

#[test]
fn community_run_uses_four_categories() {
    let experiment = Experiment::new(community_config(8, 2)).expect("valid config");
    let data = alphabet(8);
    let outcome = experiment
        .run(
            Datasets {
                stimuli: &data,
                pretrain: None,
            },
            hebbian,
            None,
        )
        .expect("run completes");

    assert_eq!(outcome.summary.variant, Variant::Community);
    let dg = outcome.summary.component(Feature::Dg).expect("dg tracked");
    assert_eq!(dg.contrast.early.mean.len(), 4);
    assert_eq!(dg.matrix.late.shape(), (8, 8));
}

#[test]
fn triad_run_reports_baseline_corrected_contrasts() {
    let experiment = Experiment::new(triad_config(9)).expect("valid config");
    let data = alphabet(9);
    let outcome = experiment
        .run(
            Datasets {
                stimuli: &data,
                pretrain: None,
            },
            hebbian,
            None,
        )
        .expect("run completes");

    let ca1 = outcome.summary.component(Feature::Ca1).expect("ca1 tracked");
    assert_eq!(ca1.contrast.late.mean.len(), 2);
    assert!(ca1.contrast.late.mean.iter().all(|v| v.is_finite()));
}

#[test]
fn same_base_seed_reproduces_the_summary() {
    let data = alphabet(8);
    let run = || {
        Experiment::new(pair_config(8, 2))
            .expect("valid config")
            .run(
                Datasets {
                    stimuli: &data,
                    pretrain: None,
                },
                hebbian,
                None,
            )
            .expect("run completes")
    };
    let a = run();
    let b = run();
    for (x, y) in a.summary.components.iter().zip(&b.summary.components) {
        assert_eq!(x.component, y.component);
        assert_eq!(x.matrix, y.matrix);
        assert_eq!(x.contrast, y.contrast);
    }
}

#[test]
fn pretraining_runs_before_the_trials() {
    let mut config = pair_config(8, 1);
    config.pretrain.epochs = 2;
    config.pretrain.batch_size = 8;
    let experiment = Experiment::new(config).expect("valid config");
    let data = alphabet(8);
    let background = structbias_core::reference::SyntheticAlphabet::new(40, support::PATTERN_DIM, 4, 0.2, 5);
    let outcome = experiment
        .run(
            Datasets {
                stimuli: &data,
                pretrain: Some(&background),
            },
            hebbian,
            None,
        )
        .expect("run completes");

    let report = &outcome.seeds[0].pretrain;
    assert_eq!(report.epochs, 2);
    assert_eq!(report.validation_samples, 7);
    assert_eq!(report.train_samples, 33);
    // 33 samples in batches of 8
    assert_eq!(report.steps, 10);
    // batches 0 and 4 of each epoch with the default cadence of 20
    assert_eq!(report.validations, 4);
    assert!(report.last_validation_loss.is_some());
}

#[test]
fn pretraining_validates_from_the_first_batch() {
    let mut config = pair_config(8, 1);
    config.pretrain.epochs = 2;
    config.pretrain.batch_size = 8;
    config.pretrain.validate_every = 3;
    let experiment = Experiment::new(config).expect("valid config");
    let data = alphabet(8);
    let background = structbias_core::reference::SyntheticAlphabet::new(40, support::PATTERN_DIM, 4, 0.2, 5);
    let outcome = experiment
        .run(
            Datasets {
                stimuli: &data,
                pretrain: Some(&background),
            },
            hebbian,
            None,
        )
        .expect("run completes");

    // 5 batches per epoch: validation after batches 0, 3 and the last one
    assert_eq!(outcome.seeds[0].pretrain.validations, 6);
}

#[test]
fn too_few_dataset_items_abort_every_seed() {
    let experiment = Experiment::new(pair_config(8, 2)).expect("valid config");
    let data = alphabet(4);
    let err = experiment
        .run(
            Datasets {
                stimuli: &data,
                pretrain: None,
            },
            hebbian,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, HarnessError::NoSamples { .. }));
}

#[derive(Default)]
struct Recorder {
    heatmaps: RefCell<Vec<(String, usize)>>,
    bars: RefCell<Vec<(usize, usize)>>,
}

impl HeatmapRenderer for Recorder {
    fn heatmap(
        &self,
        title: &str,
        labels: &[String],
        _matrix: &nalgebra::DMatrix<f64>,
        _output: &Path,
    ) -> Result<(), RenderError> {
        self.heatmaps.borrow_mut().push((title.to_string(), labels.len()));
        Ok(())
    }
}

impl BarChartRenderer for Recorder {
    fn bar_chart(
        &self,
        _title: &str,
        table: &ContrastTable,
        palette: &[&str],
        _output: &Path,
    ) -> Result<(), RenderError> {
        self.bars.borrow_mut().push((table.categories().len(), palette.len()));
        Err("plotting backend unavailable".into())
    }
}

#[test]
fn export_writes_run_files_and_isolates_renderer_failures() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = pair_config(8, 1);
    let exporter = ResultExporter::create(dir.path(), config.sequence.experiment, config.sequence.learning_type, &config)
        .expect("run directory");
    assert!(exporter.run_dir().starts_with(dir.path().join("pairs_structure").join("statistical")));

    let experiment = Experiment::new(config).expect("valid config");
    let data = alphabet(8);
    let outcome = experiment
        .run(
            Datasets {
                stimuli: &data,
                pretrain: None,
            },
            hebbian,
            Some(&exporter),
        )
        .expect("run completes");
    let seed = outcome.seeds[0].seed;
    let run_dir = exporter.run_dir();

    assert!(run_dir.join("info_exp.json").is_file());
    assert!(run_dir.join(format!("predictions_early_seed{seed}_epoch0.csv")).is_file());
    assert!(run_dir.join(format!("predictions_late_seed{seed}_epoch0.csv")).is_file());
    assert!(run_dir.join(format!("pair_inputs_seed{seed}_epoch0.csv")).is_file());
    assert!(run_dir.join(format!("metrics_seed{seed}.json")).is_file());
    assert!(run_dir.join("summary.csv").is_file());

    let matrix = std::fs::read_to_string(run_dir.join("pairs_structure_dg_early_matrix.csv")).expect("matrix file");
    let lines: Vec<&str> = matrix.lines().collect();
    assert_eq!(lines.len(), 8);
    assert!(lines.iter().all(|line| line.split(',').count() == 8));

    let long_form = std::fs::read_to_string(run_dir.join("pairs_structure_contrast_late.csv")).expect("table file");
    assert_eq!(long_form.lines().next(), Some("value,category,component"));
    assert!(long_form.contains("Late pair"));

    let predictions =
        std::fs::read_to_string(run_dir.join(format!("predictions_early_seed{seed}_epoch0.csv"))).expect("file");
    assert_eq!(predictions.lines().count(), 2);

    let recorder = Recorder::default();
    let report = exporter.render(&outcome.accumulator, &outcome.summary, &recorder, &recorder);
    // one heatmap per component and probe succeeds, the bar chart fails alone
    let components = outcome.summary.components.len();
    assert_eq!(report.written.len(), 2 * components);
    assert_eq!(report.failed.len(), 1);
    assert!(recorder.heatmaps.borrow().iter().all(|(_, labels)| *labels == 8));
    assert_eq!(recorder.bars.borrow().as_slice(), &[(4, 4)]);
}
