//! Consolidation of accumulated correlation series.
//!
//! Means are taken element-wise over every entry tagged with a probe. The
//! early and late series are averaged independently; an entry never
//! contributes to the other probe.

use crate::correlation::CorrelationAccumulator;
use crate::error::{HarnessError, HarnessResult};
use crate::model::Feature;
use crate::variant::{PerProbe, Probe, Variant};
use nalgebra::DMatrix;
use serde::Serialize;

/// Mean contrast vector with its standard error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContrastSummary {
    pub mean: Vec<f64>,
    pub std_error: Vec<f64>,
    pub samples: usize,
}

/// Aggregates of one tracked component.
#[derive(Debug, Clone)]
pub struct ComponentSummary {
    pub component: Feature,
    pub matrix: PerProbe<DMatrix<f64>>,
    pub contrast: PerProbe<ContrastSummary>,
}

/// Aggregates of a whole run.
#[derive(Debug, Clone)]
pub struct ExperimentSummary {
    pub variant: Variant,
    pub item_count: usize,
    pub components: Vec<ComponentSummary>,
}

impl ExperimentSummary {
    #[must_use]
    pub fn component(&self, component: Feature) -> Option<&ComponentSummary> {
        self.components.iter().find(|summary| summary.component == component)
    }
}

/// Stateless aggregation over an accumulator.
pub struct ExperimentAggregator;

impl ExperimentAggregator {
    /// Mean matrices and contrast statistics per component and probe.
    ///
    /// Fails with [`HarnessError::NoSamples`] if any tracked series is
    /// empty.
    pub fn aggregate(accumulator: &CorrelationAccumulator) -> HarnessResult<ExperimentSummary> {
        let components = accumulator
            .components()
            .into_iter()
            .map(|component| {
                let series = |probe: Probe| {
                    accumulator
                        .series(component, probe)
                        .filter(|series| !series.is_empty())
                        .ok_or_else(|| HarnessError::NoSamples {
                            component,
                            probe: probe.to_string(),
                        })
                };
                let early = series(Probe::Early)?;
                let late = series(Probe::Late)?;

                tracing::debug!(
                    %component,
                    early = early.len(),
                    late = late.len(),
                    "aggregating component"
                );

                Ok(ComponentSummary {
                    component,
                    matrix: PerProbe::new(mean_matrix(early.matrices()), mean_matrix(late.matrices())),
                    contrast: PerProbe::new(contrast_summary(early.contrasts()), contrast_summary(late.contrasts())),
                })
            })
            .collect::<HarnessResult<Vec<_>>>()?;

        Ok(ExperimentSummary {
            variant: accumulator.variant(),
            item_count: accumulator.item_count(),
            components,
        })
    }
}

/// Element-wise mean, mirrored from the upper triangle so the result is
/// exactly symmetric.
fn mean_matrix(matrices: &[DMatrix<f64>]) -> DMatrix<f64> {
    let Some(first) = matrices.first() else {
        return DMatrix::zeros(0, 0);
    };
    let mut sum = DMatrix::zeros(first.nrows(), first.ncols());
    for matrix in matrices {
        sum += matrix;
    }
    let mut mean = sum / matrices.len() as f64;
    let n = mean.nrows().min(mean.ncols());
    for i in 0..n {
        for j in (i + 1)..n {
            mean[(j, i)] = mean[(i, j)];
        }
    }
    mean
}

fn contrast_summary(contrasts: &[Vec<f64>]) -> ContrastSummary {
    let samples = contrasts.len();
    let width = contrasts.first().map_or(0, Vec::len);
    let mut mean = vec![0.0; width];
    let mut std_error = vec![0.0; width];
    if samples == 0 {
        return ContrastSummary {
            mean,
            std_error,
            samples,
        };
    }

    let n = samples as f64;
    for k in 0..width {
        let values: Vec<f64> = contrasts.iter().map(|c| c[k]).collect();
        let m = values.iter().sum::<f64>() / n;
        mean[k] = m;
        if samples > 1 {
            let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1.0);
            std_error[k] = (variance / n).sqrt();
        }
    }
    ContrastSummary {
        mean,
        std_error,
        samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mean_of_symmetric_matrices_is_symmetric() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.2, 0.2, 1.0]);
        let b = DMatrix::from_row_slice(2, 2, &[1.0, 0.6, 0.6, 1.0]);
        let mean = mean_matrix(&[a, b]);
        assert_relative_eq!(mean[(0, 1)], 0.4, epsilon = 1e-12);
        assert_eq!(mean[(0, 1)], mean[(1, 0)]);
    }

    #[test]
    fn contrast_summary_reports_mean_and_standard_error() {
        let summary = contrast_summary(&[vec![1.0, 0.0], vec![3.0, 0.0]]);
        assert_eq!(summary.samples, 2);
        assert_relative_eq!(summary.mean[0], 2.0);
        // sample sd sqrt(2), divided by sqrt(2)
        assert_relative_eq!(summary.std_error[0], 1.0, epsilon = 1e-12);
        assert_eq!(summary.std_error[1], 0.0);
    }

    #[test]
    fn empty_series_cannot_be_aggregated() {
        let accumulator = CorrelationAccumulator::new(Variant::Pair, 4, &[Feature::Dg]);
        let err = ExperimentAggregator::aggregate(&accumulator).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::NoSamples {
                component: Feature::Dg,
                ..
            }
        ));
    }
}
