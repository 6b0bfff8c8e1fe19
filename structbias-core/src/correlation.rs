//! Pairwise similarity of recalled representations and its accumulation.
//!
//! Each probe of each trial yields one N x N Pearson matrix per tracked
//! component. Matrices and their contrast projections are appended to
//! separate early and late series; nothing is overwritten and nothing is
//! decoded from position afterwards.

use crate::error::{ConfigError, HarnessError, HarnessResult};
use crate::model::Feature;
use crate::sequence::StimulusSequence;
use crate::variant::{PerProbe, Probe, Variant};
use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// Pearson correlation of two equal-length samples.
///
/// Zero-variance samples correlate as 0.
#[must_use]
pub fn pearson(x: &[f32], y: &[f32]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let mean_y = y.iter().map(|&v| f64::from(v)).sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut sum_sq_x = 0.0;
    let mut sum_sq_y = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let dx = f64::from(xi) - mean_x;
        let dy = f64::from(yi) - mean_y;
        numerator += dx * dy;
        sum_sq_x += dx * dx;
        sum_sq_y += dy * dy;
    }

    if sum_sq_x == 0.0 || sum_sq_y == 0.0 {
        return 0.0;
    }
    (numerator / (sum_sq_x.sqrt() * sum_sq_y.sqrt())).clamp(-1.0, 1.0)
}

/// Cosine similarity with the norm product floored at `1e-6`.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    const EPS: f64 = 1e-6;
    let dot: f64 = a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum();
    let norm_a = a.iter().map(|&x| f64::from(x).powi(2)).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|&x| f64::from(x).powi(2)).sum::<f64>().sqrt();
    dot / (norm_a * norm_b).max(EPS)
}

fn row(matrix: &DMatrix<f32>, index: usize) -> Vec<f32> {
    matrix.row(index).iter().copied().collect()
}

/// Pearson matrix of a feature set with itself; exactly symmetric.
#[must_use]
pub fn self_correlation(features: &DMatrix<f32>) -> DMatrix<f64> {
    let rows: Vec<Vec<f32>> = (0..features.nrows()).map(|i| row(features, i)).collect();
    let n = rows.len();
    let mut matrix = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in i..n {
            let r = pearson(&rows[i], &rows[j]);
            matrix[(i, j)] = r;
            matrix[(j, i)] = r;
        }
    }
    matrix
}

/// Index of the reference row most cosine-similar to `pattern`; the first
/// maximum wins ties.
#[must_use]
pub fn best_match(pattern: &[f32], references: &DMatrix<f32>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for index in 0..references.nrows() {
        let similarity = cosine_similarity(pattern, &row(references, index));
        match best {
            Some((_, top)) if similarity <= top => {}
            _ => best = Some((index, similarity)),
        }
    }
    best.map(|(index, _)| index)
}

/// Append-only matrix and contrast series for one component and probe.
#[derive(Debug, Clone, Default)]
pub struct Series {
    matrices: Vec<DMatrix<f64>>,
    contrasts: Vec<Vec<f64>>,
}

impl Series {
    #[must_use]
    pub fn matrices(&self) -> &[DMatrix<f64>] {
        &self.matrices
    }

    #[must_use]
    pub fn contrasts(&self) -> &[Vec<f64>] {
        &self.contrasts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    fn push(&mut self, matrix: DMatrix<f64>, contrast: Vec<f64>) {
        self.matrices.push(matrix);
        self.contrasts.push(contrast);
    }

    fn extend(&mut self, other: Self) {
        self.matrices.extend(other.matrices);
        self.contrasts.extend(other.contrasts);
    }
}

/// Running correlation series per tracked component, kept apart for the
/// early and late probe.
#[derive(Debug, Clone)]
pub struct CorrelationAccumulator {
    variant: Variant,
    item_count: usize,
    series: BTreeMap<Feature, PerProbe<Series>>,
}

impl CorrelationAccumulator {
    pub fn new(variant: Variant, item_count: usize, components: &[Feature]) -> Self {
        Self {
            variant,
            item_count,
            series: components
                .iter()
                .map(|&component| (component, PerProbe::default()))
                .collect(),
        }
    }

    /// Fresh accumulator tracking the same components.
    #[must_use]
    pub fn empty_like(&self) -> Self {
        Self::new(self.variant, self.item_count, &self.components())
    }

    #[must_use]
    pub const fn variant(&self) -> Variant {
        self.variant
    }

    #[must_use]
    pub const fn item_count(&self) -> usize {
        self.item_count
    }

    #[must_use]
    pub fn components(&self) -> Vec<Feature> {
        self.series.keys().copied().collect()
    }

    #[must_use]
    pub fn series(&self, component: Feature, probe: Probe) -> Option<&Series> {
        self.series.get(&component).map(|per_probe| per_probe.get(probe))
    }

    /// Fold one probe's features for `component` into the running series.
    ///
    /// Only the first `item_count` rows are compared; the remaining rows of a
    /// larger response batch are ignored.
    pub fn record(
        &mut self,
        component: Feature,
        probe: Probe,
        features: &DMatrix<f32>,
        structure: &StimulusSequence,
    ) -> HarnessResult<()> {
        let item_count = self.item_count;
        if structure.variant() != self.variant || structure.item_count() != item_count {
            return Err(ConfigError::Invalid {
                field: "structure",
                reason: format!(
                    "accumulator tracks {} over {item_count} items, sequence is {} over {}",
                    self.variant,
                    structure.variant(),
                    structure.item_count()
                ),
            }
            .into());
        }
        if features.nrows() < item_count {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: format!(
                    "{component} response has {} rows but {item_count} items are compared",
                    features.nrows()
                ),
            }
            .into());
        }

        let series = self
            .series
            .get_mut(&component)
            .ok_or(HarnessError::Config(ConfigError::UntrackedComponent(component)))?;

        let items = features.rows(0, item_count).into_owned();
        let matrix = self_correlation(&items);
        let contrast = structure.partitions().contrast(&matrix);

        tracing::trace!(
            %component,
            %probe,
            contrast = ?contrast,
            "recorded correlation sample"
        );
        series.get_mut(probe).push(matrix, contrast);
        Ok(())
    }

    /// Append every series of `other` after this accumulator's entries.
    pub fn merge(&mut self, other: Self) -> Result<(), ConfigError> {
        if other.variant != self.variant || other.item_count != self.item_count {
            return Err(ConfigError::Invalid {
                field: "accumulator",
                reason: "cannot merge accumulators of different structures".to_string(),
            });
        }
        for (component, per_probe) in other.series {
            let target = self
                .series
                .get_mut(&component)
                .ok_or(ConfigError::UntrackedComponent(component))?;
            let PerProbe { early, late } = per_probe;
            target.early.extend(early);
            target.late.extend(late);
        }
        Ok(())
    }

    /// Number of entries per probe for a component.
    #[must_use]
    pub fn counts(&self, component: Feature) -> PerProbe<usize> {
        self.series.get(&component).map_or_else(PerProbe::default, |per_probe| {
            PerProbe::new(per_probe.early.len(), per_probe.late.len())
        })
    }
}
