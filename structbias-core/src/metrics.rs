//! Matching metrics between recall-mode and study-mode features.
//!
//! A comparison takes a primary feature set with labels and a secondary
//! feature set with labels. Each primary row is matched to its nearest
//! secondary row; the score is the fraction of primary rows whose match
//! carries the same label.

use crate::correlation::cosine_similarity;
use crate::error::ConfigError;
use crate::model::{Feature, FeatureMap, Mode};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How the nearest secondary row is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonType {
    /// Smallest mean squared error
    MatchMse,
    /// Largest cosine similarity
    MatchCosine,
}

/// What a reference points at inside a mode's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Feature(Feature),
    Labels,
}

/// Parsed `<mode>.<feature>` or `<mode>.labels` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRef {
    pub mode: Mode,
    pub target: Target,
}

impl FeatureRef {
    #[must_use]
    pub const fn feature(mode: Mode, feature: Feature) -> Self {
        Self {
            mode,
            target: Target::Feature(feature),
        }
    }

    #[must_use]
    pub const fn labels(mode: Mode) -> Self {
        Self {
            mode,
            target: Target::Labels,
        }
    }
}

impl FromStr for FeatureRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ConfigError::FeatureReference(s.to_string());
        let (mode, target) = s.split_once('.').ok_or_else(bad)?;
        let mode: Mode = mode.parse().map_err(|_| bad())?;
        let target = match target {
            "labels" => Target::Labels,
            name => Target::Feature(name.parse().map_err(|_| bad())?),
        };
        Ok(Self { mode, target })
    }
}

impl fmt::Display for FeatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            Target::Feature(feature) => write!(f, "{}.{feature}", self.mode),
            Target::Labels => write!(f, "{}.labels", self.mode),
        }
    }
}

/// Parallel lists describing extra comparisons; entry `i` of every list
/// belongs to comparison `i`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub primary_feature_names: Vec<String>,
    pub primary_label_names: Vec<String>,
    pub secondary_feature_names: Vec<String>,
    pub secondary_label_names: Vec<String>,
    pub comparison_types: Vec<ComparisonType>,
    pub prefixes: Vec<String>,
}

impl MetricsConfig {
    /// Resolve the lists into comparisons.
    pub fn comparisons(&self) -> Result<Vec<Comparison>, ConfigError> {
        let lengths = vec![
            self.primary_feature_names.len(),
            self.primary_label_names.len(),
            self.secondary_feature_names.len(),
            self.secondary_label_names.len(),
            self.comparison_types.len(),
            self.prefixes.len(),
        ];
        if lengths.iter().any(|&len| len != lengths[0]) {
            return Err(ConfigError::MetricsLengthMismatch { lengths });
        }

        (0..lengths[0])
            .map(|i| {
                let comparison = Comparison {
                    prefix: self.prefixes[i].clone(),
                    primary_features: self.primary_feature_names[i].parse()?,
                    primary_labels: self.primary_label_names[i].parse()?,
                    secondary_features: self.secondary_feature_names[i].parse()?,
                    secondary_labels: self.secondary_label_names[i].parse()?,
                    kind: self.comparison_types[i],
                };
                comparison.check()?;
                Ok(comparison)
            })
            .collect()
    }
}

/// One configured comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub prefix: String,
    pub primary_features: FeatureRef,
    pub primary_labels: FeatureRef,
    pub secondary_features: FeatureRef,
    pub secondary_labels: FeatureRef,
    pub kind: ComparisonType,
}

impl Comparison {
    /// Recalled `pr` codes matched against the studied ones.
    #[must_use]
    pub fn pattern_recall() -> Self {
        Self {
            prefix: "pr_rf_".to_string(),
            primary_features: FeatureRef::feature(Mode::Recall, Feature::Pr),
            primary_labels: FeatureRef::labels(Mode::Recall),
            secondary_features: FeatureRef::feature(Mode::Study, Feature::Pr),
            secondary_labels: FeatureRef::labels(Mode::Study),
            kind: ComparisonType::MatchMse,
        }
    }

    /// Name under which the score is reported.
    #[must_use]
    pub fn metric_name(&self) -> String {
        format!("{}accuracy", self.prefix)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let wrong = |r: &FeatureRef| ConfigError::FeatureReference(r.to_string());
        for r in [&self.primary_features, &self.secondary_features] {
            if r.target == Target::Labels {
                return Err(wrong(r));
            }
        }
        for r in [&self.primary_labels, &self.secondary_labels] {
            if r.target != Target::Labels {
                return Err(wrong(r));
            }
        }
        Ok(())
    }
}

/// Study and recall outputs of one trial.
#[derive(Debug, Clone, Copy)]
pub struct TrialFeatures<'a> {
    pub study: &'a FeatureMap,
    pub recall: &'a FeatureMap,
}

impl<'a> TrialFeatures<'a> {
    fn map(&self, mode: Mode) -> Result<&'a FeatureMap, ConfigError> {
        match mode {
            Mode::Study => Ok(self.study),
            Mode::Recall => Ok(self.recall),
            other => Err(ConfigError::Invalid {
                field: "metrics",
                reason: format!("no {other} output is kept for trial metrics"),
            }),
        }
    }

    fn features(&self, r: FeatureRef) -> Result<&'a DMatrix<f32>, ConfigError> {
        match r.target {
            Target::Feature(feature) => self.map(r.mode)?.require(feature),
            Target::Labels => Err(ConfigError::FeatureReference(r.to_string())),
        }
    }

    fn labels(&self, r: FeatureRef) -> Result<&'a [usize], ConfigError> {
        match r.target {
            Target::Labels => Ok(self.map(r.mode)?.labels()),
            Target::Feature(_) => Err(ConfigError::FeatureReference(r.to_string())),
        }
    }

    fn has(&self, r: FeatureRef) -> bool {
        match r.target {
            Target::Feature(feature) => self.map(r.mode).is_ok_and(|map| map.get(feature).is_some()),
            Target::Labels => self.map(r.mode).is_ok(),
        }
    }
}

fn mse(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (f64::from(x) - f64::from(y)).powi(2))
        .sum();
    sum / a.len() as f64
}

/// Fraction of primary rows whose nearest secondary row has the same label.
pub fn match_accuracy(
    primary: &DMatrix<f32>,
    primary_labels: &[usize],
    secondary: &DMatrix<f32>,
    secondary_labels: &[usize],
    kind: ComparisonType,
) -> Result<f64, ConfigError> {
    if primary.ncols() != secondary.ncols() {
        return Err(ConfigError::Invalid {
            field: "metrics",
            reason: format!(
                "feature widths differ: {} vs {}",
                primary.ncols(),
                secondary.ncols()
            ),
        });
    }
    if primary_labels.len() < primary.nrows() || secondary_labels.len() < secondary.nrows() {
        return Err(ConfigError::Invalid {
            field: "metrics",
            reason: "fewer labels than feature rows".to_string(),
        });
    }
    if primary.nrows() == 0 || secondary.nrows() == 0 {
        return Ok(0.0);
    }

    let rows = |m: &DMatrix<f32>| -> Vec<Vec<f32>> {
        (0..m.nrows()).map(|i| m.row(i).iter().copied().collect()).collect()
    };
    let primary_rows = rows(primary);
    let secondary_rows = rows(secondary);

    let mut correct = 0usize;
    for (i, query) in primary_rows.iter().enumerate() {
        let mut best: Option<(usize, f64)> = None;
        for (j, candidate) in secondary_rows.iter().enumerate() {
            // Lower is better for both scores
            let score = match kind {
                ComparisonType::MatchMse => mse(query, candidate),
                ComparisonType::MatchCosine => -cosine_similarity(query, candidate),
            };
            if best.is_none_or(|(_, top)| score < top) {
                best = Some((j, score));
            }
        }
        if let Some((j, _)) = best
            && secondary_labels[j] == primary_labels[i]
        {
            correct += 1;
        }
    }
    Ok(correct as f64 / primary_rows.len() as f64)
}

/// Per-seed recall metric bookkeeping.
#[derive(Debug, Clone)]
pub struct RecallMetrics {
    comparisons: Vec<Comparison>,
    default: Comparison,
    history: BTreeMap<String, Vec<f64>>,
}

impl RecallMetrics {
    pub fn new(config: Option<&MetricsConfig>) -> Result<Self, ConfigError> {
        let comparisons = match config {
            Some(config) => config.comparisons()?,
            None => Vec::new(),
        };
        Ok(Self {
            comparisons,
            default: Comparison::pattern_recall(),
            history: BTreeMap::new(),
        })
    }

    /// Score one trial. The `pr` comparison only runs when both outputs
    /// expose `pr`; configured comparisons must resolve.
    pub fn evaluate(&mut self, trial: TrialFeatures<'_>) -> Result<BTreeMap<String, f64>, ConfigError> {
        let mut scores = BTreeMap::new();
        let default_applies = trial.has(self.default.primary_features) && trial.has(self.default.secondary_features);
        let active = self
            .comparisons
            .iter()
            .chain(default_applies.then_some(&self.default));

        for comparison in active {
            let value = match_accuracy(
                trial.features(comparison.primary_features)?,
                trial.labels(comparison.primary_labels)?,
                trial.features(comparison.secondary_features)?,
                trial.labels(comparison.secondary_labels)?,
                comparison.kind,
            )?;
            scores.insert(comparison.metric_name(), value);
        }

        for (name, value) in &scores {
            self.history.entry(name.clone()).or_default().push(*value);
        }
        Ok(scores)
    }

    /// Mean of every metric over the trials seen so far.
    #[must_use]
    pub fn averages(&self) -> BTreeMap<String, f64> {
        self.history
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| (name.clone(), values.iter().sum::<f64>() / values.len() as f64))
            .collect()
    }

    #[must_use]
    pub fn trials(&self) -> usize {
        self.history.values().map(Vec::len).max().unwrap_or(0)
    }
}
