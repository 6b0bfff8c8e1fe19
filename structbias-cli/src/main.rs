//! Command-line runner for structural-bias experiments.
//!
//! Runs the reference Hebbian model over a synthetic alphabet, writes the
//! per-epoch and summary files and optionally renders SVG figures.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use structbias_core::reference::{HebbianPairModel, SyntheticAlphabet};
use structbias_core::{
    Datasets, Experiment, ExperimentSummary, PatternDataset, Probe, ResultExporter, RunObserver,
    Variant,
};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::CliConfig;
use render::SvgRenderer;

#[derive(Parser)]
#[command(name = "structbias")]
#[command(about = "Structural-bias experiments for associative memory models", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment and write its results
    Run {
        /// Path to a TOML config layered over the bundled defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Experiment structure (overrides the config)
        #[arg(long, value_enum)]
        variant: Option<VariantArg>,

        /// Number of seeds (overrides the config)
        #[arg(short, long)]
        seeds: Option<usize>,

        /// Base seed for drawing run seeds
        #[arg(long)]
        base_seed: Option<u64>,

        /// Output root directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip SVG rendering
        #[arg(long)]
        no_render: bool,
    },

    /// Check a config file without running anything
    Validate {
        /// Path to a TOML config layered over the bundled defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List experiment structures and their contrast categories
    Variants,
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    Pair,
    Community,
    Triad,
}

impl From<VariantArg> for Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Pair => Self::Pair,
            VariantArg::Community => Self::Community,
            VariantArg::Triad => Self::Triad,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            config,
            variant,
            seeds,
            base_seed,
            output,
            no_render,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(variant) = variant {
                config.experiment.sequence.experiment = variant.into();
            }
            if let Some(seeds) = seeds {
                config.experiment.run.seeds = seeds;
            }
            if base_seed.is_some() {
                config.experiment.run.base_seed = base_seed;
            }
            if let Some(output) = output {
                config.output.root = output;
            }
            if no_render {
                config.output.render = false;
            }
            run_experiment(&config)?;
        }
        Commands::Validate { config } => {
            let config = load_config(config.as_ref())?;
            config.validate()?;
            let sequence = &config.experiment.sequence;
            println!(
                "config ok: {} ({}), {} items, {} seeds",
                sequence.experiment,
                sequence.learning_type,
                sequence.item_count,
                config.experiment.run.seeds
            );
        }
        Commands::Variants => list_variants(),
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<CliConfig> {
    match path {
        Some(path) => CliConfig::load(path),
        None => CliConfig::builtin(),
    }
}

fn run_experiment(config: &CliConfig) -> Result<()> {
    config.validate()?;
    let experiment = Experiment::new(config.experiment.clone())?;
    let sequence = &config.experiment.sequence;

    let stimuli = SyntheticAlphabet::from_config(&config.dataset);
    let background = (config.experiment.pretrain.epochs > 0)
        .then(|| SyntheticAlphabet::background(&config.dataset));
    let datasets = Datasets {
        stimuli: &stimuli,
        pretrain: background
            .as_ref()
            .map(|set| set as &dyn PatternDataset),
    };

    let exporter = ResultExporter::create(
        &config.output.root,
        sequence.experiment,
        sequence.learning_type,
        config,
    )
    .with_context(|| format!("Failed to create run directory under {}", config.output.root.display()))?;

    tracing::info!(
        variant = %sequence.experiment,
        learning_type = %sequence.learning_type,
        items = sequence.item_count,
        seeds = config.experiment.run.seeds,
        run_dir = %exporter.run_dir().display(),
        "starting experiment"
    );

    let mut progress = Progress::new(
        (config.experiment.run.seeds * config.experiment.protocol.train_epochs) as u64,
        config.experiment.protocol.train_epochs,
    );
    let model = config.model.clone();
    let pattern_dim = stimuli.pattern_dim();
    let outcome = experiment.run_observed(
        datasets,
        |seed| HebbianPairModel::new(model.clone(), pattern_dim, seed),
        Some(&exporter),
        &mut progress,
    )?;
    progress.bar.finish_and_clear();

    for (seed, err) in &outcome.failed_seeds {
        tracing::warn!(seed, error = %err, "seed dropped");
    }

    if config.output.render {
        let report = exporter.render(&outcome.accumulator, &outcome.summary, &SvgRenderer, &SvgRenderer);
        if !report.is_clean() {
            tracing::warn!(failed = report.failed.len(), "some figures could not be rendered");
        }
    }

    println!("\n{}", summary_text(&outcome.summary));
    for seed in &outcome.seeds {
        for (name, value) in &seed.metric_averages {
            println!("seed {:>5}  {name} = {value:.4}", seed.seed);
        }
    }
    println!("results: {}", exporter.run_dir().display());
    Ok(())
}

fn summary_text(summary: &ExperimentSummary) -> String {
    let labels = summary.variant.category_labels();
    let mut text = format!("{} ({} items)\n", summary.variant, summary.item_count);
    for component in &summary.components {
        for probe in Probe::BOTH {
            let contrast = component.contrast.get(probe);
            let cells: Vec<String> = labels
                .iter()
                .zip(contrast.mean.iter().zip(&contrast.std_error))
                .map(|(label, (mean, error))| format!("{label} {mean:+.3}±{error:.3}"))
                .collect();
            text.push_str(&format!(
                "  {:<10} {:<5} {}\n",
                component.component.as_str(),
                probe.as_str(),
                cells.join("  ")
            ));
        }
    }
    text
}

fn list_variants() {
    for variant in Variant::ALL {
        println!("{variant}");
        for label in variant.category_labels() {
            println!("  - {label}");
        }
    }
}

/// Epoch-level progress bar.
struct Progress {
    bar: ProgressBar,
    epochs: usize,
    seed_epochs: usize,
}

impl Progress {
    fn new(total: u64, epochs: usize) -> Self {
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}") {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self {
            bar,
            epochs,
            seed_epochs: 0,
        }
    }
}

impl RunObserver for Progress {
    fn epoch_finished(&mut self, seed: u64, _epoch: usize) {
        self.bar.set_message(format!("seed {seed}"));
        self.bar.inc(1);
        self.seed_epochs += 1;
    }

    fn seed_finished(&mut self, seed: u64, completed: bool) {
        // A dropped seed never reports its remaining epochs
        if !completed {
            self.bar
                .inc(self.epochs.saturating_sub(self.seed_epochs) as u64);
            self.bar.println(format!("seed {seed} dropped"));
        }
        self.seed_epochs = 0;
    }
}
