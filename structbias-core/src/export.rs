//! Result files and renderer hand-off.
//!
//! Every file is written independently. A failed write is logged and
//! collected in the [`ExportReport`]; it never stops the remaining writes.

use crate::aggregate::ExperimentSummary;
use crate::correlation::CorrelationAccumulator;
use crate::error::ExportError;
use crate::model::Feature;
use crate::orchestrator::EpochRecord;
use crate::sequence::ItemPair;
use crate::variant::{LearningType, Probe, Variant};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type renderers may return.
pub type RenderError = Box<dyn std::error::Error + Send + Sync>;

/// Draws a labelled correlation heatmap.
pub trait HeatmapRenderer {
    fn heatmap(
        &self,
        title: &str,
        labels: &[String],
        matrix: &DMatrix<f64>,
        output: &Path,
    ) -> Result<(), RenderError>;
}

/// Draws grouped bars from a long-form contrast table.
pub trait BarChartRenderer {
    fn bar_chart(
        &self,
        title: &str,
        table: &ContrastTable,
        palette: &[&str],
        output: &Path,
    ) -> Result<(), RenderError>;
}

/// One long-form contrast observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastRow {
    pub value: f64,
    pub category: String,
    pub component: String,
}

/// Long-form `value,category,component` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContrastTable {
    pub rows: Vec<ContrastRow>,
}

impl ContrastTable {
    /// Rows for every stored contrast vector of `probe`, in trial order.
    #[must_use]
    pub fn from_accumulator(accumulator: &CorrelationAccumulator, probe: Probe) -> Self {
        let labels = accumulator.variant().category_labels();
        let mut rows = Vec::new();
        for component in accumulator.components() {
            let Some(series) = accumulator.series(component, probe) else {
                continue;
            };
            for contrast in series.contrasts() {
                for (value, label) in contrast.iter().zip(labels) {
                    rows.push(ContrastRow {
                        value: *value,
                        category: category_name(probe, label),
                        component: component.to_string(),
                    });
                }
            }
        }
        Self { rows }
    }

    /// Early rows followed by late rows.
    #[must_use]
    pub fn combined(early: &Self, late: &Self) -> Self {
        Self {
            rows: early.rows.iter().chain(&late.rows).cloned().collect(),
        }
    }

    /// Distinct categories in first-seen order.
    #[must_use]
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for row in &self.rows {
            if !seen.contains(&row.category.as_str()) {
                seen.push(&row.category);
            }
        }
        seen
    }
}

fn category_name(probe: Probe, label: &str) -> String {
    format!("{} {label}", probe.title())
}

/// Spreadsheet-style labels: A..Z, AA, AB, ...
#[must_use]
pub fn item_labels(count: usize) -> Vec<String> {
    (0..count)
        .map(|mut index| {
            let mut label = Vec::new();
            loop {
                label.push(b'A' + (index % 26) as u8);
                if index < 26 {
                    break;
                }
                index = index / 26 - 1;
            }
            label.reverse();
            String::from_utf8_lossy(&label).into_owned()
        })
        .collect()
}

/// Files written and failures collected by an export call.
#[derive(Debug, Default)]
pub struct ExportReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<ExportError>,
}

impl ExportReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn track(&mut self, path: PathBuf, result: Result<(), ExportError>) {
        match result {
            Ok(()) => self.written.push(path),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "export failed");
                self.failed.push(err);
            }
        }
    }
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    component: &'a str,
    probe: &'a str,
    category: &'a str,
    mean: f64,
    std_error: f64,
    samples: usize,
}

/// Writes the result files of one run under a timestamped directory.
#[derive(Debug, Clone)]
pub struct ResultExporter {
    run_dir: PathBuf,
    variant: Variant,
}

impl ResultExporter {
    /// Create `<root>/<variant>/<learning_type>/<timestamp>` and dump the
    /// resolved configuration to `info_exp.json`.
    pub fn create<C: Serialize>(
        root: &Path,
        variant: Variant,
        learning_type: LearningType,
        config: &C,
    ) -> Result<Self, ExportError> {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let run_dir = root
            .join(variant.as_str())
            .join(learning_type.as_str())
            .join(timestamp);
        fs::create_dir_all(&run_dir).map_err(|source| ExportError::Io {
            path: run_dir.clone(),
            source,
        })?;

        let exporter = Self { run_dir, variant };
        let info = exporter.path("info_exp.json");
        let json = serde_json::to_string_pretty(config).map_err(|source| ExportError::Json {
            path: info.clone(),
            source,
        })?;
        fs::write(&info, json).map_err(|source| ExportError::Io { path: info, source })?;

        tracing::info!(run_dir = %exporter.run_dir.display(), "created run directory");
        Ok(exporter)
    }

    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.run_dir.join(name)
    }

    fn stem(&self, component: Feature, probe: Probe) -> String {
        format!("{}_{component}_{probe}", self.variant)
    }

    /// Predictions per probe and studied pairs, one row per trial.
    pub fn write_epoch(&self, seed: u64, record: &EpochRecord) -> ExportReport {
        let mut report = ExportReport::default();
        let suffix = format!("seed{seed}_epoch{}", record.epoch);

        for probe in Probe::BOTH {
            let path = self.path(&format!("predictions_{probe}_{suffix}.csv"));
            let result = write_pair_rows(&path, record.predictions.get(probe));
            report.track(path, result);
        }

        let path = self.path(&format!("pair_inputs_{suffix}.csv"));
        let result = write_pair_rows(&path, &record.study_pairs);
        report.track(path, result);
        report
    }

    /// Remove files written earlier for a seed that did not complete.
    ///
    /// `written` of the returned report lists the removed files.
    pub fn discard(&self, paths: &[PathBuf]) -> ExportReport {
        let mut report = ExportReport::default();
        for path in paths {
            let result = fs::remove_file(path).map_err(|source| ExportError::Io {
                path: path.clone(),
                source,
            });
            report.track(path.clone(), result);
        }
        tracing::info!(removed = report.written.len(), "discarded partial seed output");
        report
    }

    /// Per-seed recall metric averages as JSON.
    pub fn write_metrics(&self, seed: u64, averages: &BTreeMap<String, f64>) -> ExportReport {
        let mut report = ExportReport::default();
        let path = self.path(&format!("metrics_seed{seed}.json"));
        let result = serde_json::to_string_pretty(averages)
            .map_err(|source| ExportError::Json {
                path: path.clone(),
                source,
            })
            .and_then(|json| {
                fs::write(&path, json).map_err(|source| ExportError::Io {
                    path: path.clone(),
                    source,
                })
            });
        report.track(path, result);
        report
    }

    /// Aggregated matrices, raw and long-form contrasts and the summary
    /// table.
    pub fn write_summary(&self, accumulator: &CorrelationAccumulator, summary: &ExperimentSummary) -> ExportReport {
        let mut report = ExportReport::default();
        let labels = self.variant.category_labels();

        for component in &summary.components {
            for (probe, matrix) in component.matrix.iter() {
                let path = self.path(&format!("{}_matrix.csv", self.stem(component.component, probe)));
                let result = write_matrix(&path, matrix);
                report.track(path, result);
            }
        }

        for component in accumulator.components() {
            for probe in Probe::BOTH {
                let Some(series) = accumulator.series(component, probe) else {
                    continue;
                };
                let path = self.path(&format!("{}_contrasts.csv", self.stem(component, probe)));
                let result = write_contrast_rows(&path, labels, series.contrasts());
                report.track(path, result);
            }
        }

        for probe in Probe::BOTH {
            let table = ContrastTable::from_accumulator(accumulator, probe);
            let path = self.path(&format!("{}_contrast_{probe}.csv", self.variant));
            let result = write_serialized(&path, &table.rows);
            report.track(path, result);
        }

        let mut rows = Vec::new();
        for component in &summary.components {
            let name = component.component.as_str();
            for (probe, contrast) in component.contrast.iter() {
                for (k, label) in labels.iter().enumerate() {
                    rows.push(SummaryRow {
                        component: name,
                        probe: probe.as_str(),
                        category: *label,
                        mean: contrast.mean.get(k).copied().unwrap_or(f64::NAN),
                        std_error: contrast.std_error.get(k).copied().unwrap_or(f64::NAN),
                        samples: contrast.samples,
                    });
                }
            }
        }
        let path = self.path("summary.csv");
        let result = write_serialized(&path, &rows);
        report.track(path, result);

        tracing::info!(
            written = report.written.len(),
            failed = report.failed.len(),
            "wrote run summary"
        );
        report
    }

    /// Hand the aggregated matrices and the combined contrast table to the
    /// renderers.
    pub fn render(
        &self,
        accumulator: &CorrelationAccumulator,
        summary: &ExperimentSummary,
        heatmap: &dyn HeatmapRenderer,
        bars: &dyn BarChartRenderer,
    ) -> ExportReport {
        let mut report = ExportReport::default();
        let labels = item_labels(summary.item_count);

        for component in &summary.components {
            for (probe, matrix) in component.matrix.iter() {
                let stem = self.stem(component.component, probe);
                let title = format!("{} {} ({probe})", self.variant, component.component);
                let path = self.path(&format!("{stem}_heatmap.svg"));
                let result = heatmap
                    .heatmap(&title, &labels, matrix, &path)
                    .map_err(|err| ExportError::Render {
                        title,
                        message: err.to_string(),
                    });
                report.track(path, result);
            }
        }

        let table = ContrastTable::combined(
            &ContrastTable::from_accumulator(accumulator, Probe::Early),
            &ContrastTable::from_accumulator(accumulator, Probe::Late),
        );
        let title = format!("{} contrasts", self.variant);
        let path = self.path(&format!("{}_contrasts.svg", self.variant));
        let result = bars
            .bar_chart(&title, &table, self.variant.palette(), &path)
            .map_err(|err| ExportError::Render {
                title,
                message: err.to_string(),
            });
        report.track(path, result);
        report
    }
}

fn csv_error(path: &Path) -> impl FnOnce(csv::Error) -> ExportError + '_ {
    move |source| ExportError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

fn flush_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn pair_cell((a, b): ItemPair) -> String {
    format!("{a}-{b}")
}

/// Ragged rows of `a-b` cells.
fn write_pair_rows(path: &Path, rows: &[Vec<ItemPair>]) -> Result<(), ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(csv_error(path))?;
    for row in rows {
        writer
            .write_record(row.iter().map(|&pair| pair_cell(pair)))
            .map_err(csv_error(path))?;
    }
    writer.flush().map_err(flush_error(path))
}

/// Matrix rows without a header.
fn write_matrix(path: &Path, matrix: &DMatrix<f64>) -> Result<(), ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_error(path))?;
    for i in 0..matrix.nrows() {
        writer
            .write_record(matrix.row(i).iter().map(f64::to_string))
            .map_err(csv_error(path))?;
    }
    writer.flush().map_err(flush_error(path))
}

fn write_contrast_rows(path: &Path, labels: &[&str], contrasts: &[Vec<f64>]) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path).map_err(csv_error(path))?;
    writer.write_record(labels).map_err(csv_error(path))?;
    for contrast in contrasts {
        writer
            .write_record(contrast.iter().map(f64::to_string))
            .map_err(csv_error(path))?;
    }
    writer.flush().map_err(flush_error(path))
}

fn write_serialized<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path).map_err(csv_error(path))?;
    for row in rows {
        writer.serialize(row).map_err(csv_error(path))?;
    }
    writer.flush().map_err(flush_error(path))
}
