//! Experiment variants and probe timing tags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of experiment structures.
///
/// Selected once from configuration; every use site dispatches on the enum
/// rather than on experiment names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Variant {
    /// Fixed item pairs
    #[default]
    #[serde(rename = "pairs_structure", alias = "pair")]
    Pair,
    /// Random walk over a community graph
    #[serde(rename = "community_structure", alias = "community")]
    Community,
    /// A-B, B-C triads probing transitive inference
    #[serde(rename = "associative_inference", alias = "triad")]
    Triad,
}

const PAIR_LABELS: &[&str] = &["pair", "shuffled"];
const TRIAD_LABELS: &[&str] = &["transitive", "direct"];
const COMMUNITY_LABELS: &[&str] = &[
    "within internal",
    "within boundary",
    "across boundary",
    "across other",
];

const TWO_CATEGORY_PALETTE: &[&str] = &["#DBAE81", "#B29EC1", "#D17A3D", "#685CA2"];
const COMMUNITY_PALETTE: &[&str] = &[
    "#B995C2", "#EAB264", "#C1E0EE", "#87AD57", "#4F2C8A", "#D85925", "#364BAC", "#3A7529",
];

impl Variant {
    pub const ALL: [Self; 3] = [Self::Pair, Self::Community, Self::Triad];

    /// Name used in directories and file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pair => "pairs_structure",
            Self::Community => "community_structure",
            Self::Triad => "associative_inference",
        }
    }

    /// Ordered labels of the contrast vector entries.
    #[must_use]
    pub const fn category_labels(self) -> &'static [&'static str] {
        match self {
            Self::Pair => PAIR_LABELS,
            Self::Triad => TRIAD_LABELS,
            Self::Community => COMMUNITY_LABELS,
        }
    }

    /// Contrast vector length.
    #[must_use]
    pub const fn category_count(self) -> usize {
        self.category_labels().len()
    }

    /// Bar colours for the combined early and late categories.
    #[must_use]
    pub const fn palette(self) -> &'static [&'static str] {
        match self {
            Self::Pair | Self::Triad => TWO_CATEGORY_PALETTE,
            Self::Community => COMMUNITY_PALETTE,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How designed pairs are ordered in a study sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LearningType {
    /// Independent draws over designed pairs
    #[default]
    Statistical,
    /// Shuffled blocks, each showing every designed pair once
    Episodic,
}

impl LearningType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Statistical => "statistical",
            Self::Episodic => "episodic",
        }
    }
}

impl fmt::Display for LearningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe timing within a trial's study phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    /// Partial exposure
    Early,
    /// Full exposure
    Late,
}

impl Probe {
    pub const BOTH: [Self; 2] = [Self::Early, Self::Late];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Early => "early",
            Self::Late => "late",
        }
    }

    /// Capitalised tag used in category labels
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Early => "Early",
            Self::Late => "Late",
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value held separately for the early and the late probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerProbe<T> {
    pub early: T,
    pub late: T,
}

impl<T> PerProbe<T> {
    pub const fn new(early: T, late: T) -> Self {
        Self { early, late }
    }

    #[must_use]
    pub const fn get(&self, probe: Probe) -> &T {
        match probe {
            Probe::Early => &self.early,
            Probe::Late => &self.late,
        }
    }

    pub fn get_mut(&mut self, probe: Probe) -> &mut T {
        match probe {
            Probe::Early => &mut self.early,
            Probe::Late => &mut self.late,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Probe, &T)> {
        [(Probe::Early, &self.early), (Probe::Late, &self.late)].into_iter()
    }

    pub fn try_map<U, E>(self, mut f: impl FnMut(Probe, T) -> Result<U, E>) -> Result<PerProbe<U>, E> {
        Ok(PerProbe {
            early: f(Probe::Early, self.early)?,
            late: f(Probe::Late, self.late)?,
        })
    }
}
