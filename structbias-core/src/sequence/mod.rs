//! Structured stimulus sequences over a fixed item pool.
//!
//! A [`StimulusSequence`] is built once from [`SequenceParams`] and a seed. It
//! carries the ordered study pairs and the structural partitions later used
//! to project correlation matrices into contrast vectors. The partitions are
//! fixed at construction and never change afterwards.

mod community;
mod pair;
mod triad;

use crate::error::SequenceError;
use crate::variant::{LearningType, Variant};
use nalgebra::DMatrix;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

pub use community::CommunityGraph;

/// Ordered (row, column) item indices.
pub type ItemPair = (usize, usize);

/// Construction parameters for a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceParams {
    pub variant: Variant,
    pub item_count: usize,
    pub sequence_length: usize,
    pub learning_type: LearningType,
    /// Community count, only read by [`Variant::Community`]
    pub communities: usize,
}

impl SequenceParams {
    /// Check that the structure can be built, without sampling a sequence.
    pub fn check(&self) -> Result<(), SequenceError> {
        if self.sequence_length == 0 {
            return Err(SequenceError::EmptySequence);
        }
        match self.variant {
            Variant::Pair => pair::check(self.item_count),
            Variant::Community => CommunityGraph::new(self.item_count, self.communities).map(|_| ()),
            Variant::Triad => triad::check(self.item_count),
        }
    }
}

/// Structural partitions of the pair space, one shape per variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partitions {
    Pair {
        /// Designed pairs
        core: Vec<ItemPair>,
        /// Every ordered off-diagonal pair
        test: Vec<ItemPair>,
    },
    Triad {
        /// Direct pairs A-B and B-C
        core: Vec<ItemPair>,
        /// Transitive pairs A-C
        test: Vec<ItemPair>,
        /// Ordered pairs of items from different triads
        base: Vec<ItemPair>,
    },
    Community {
        /// within-internal, within-boundary, across-boundary, across-other
        graph: [Vec<ItemPair>; 4],
    },
}

impl Partitions {
    #[must_use]
    pub const fn variant(&self) -> Variant {
        match self {
            Self::Pair { .. } => Variant::Pair,
            Self::Triad { .. } => Variant::Triad,
            Self::Community { .. } => Variant::Community,
        }
    }

    /// Project a correlation matrix into the variant's contrast vector.
    ///
    /// Entries follow [`Variant::category_labels`].
    #[must_use]
    pub fn contrast(&self, matrix: &DMatrix<f64>) -> Vec<f64> {
        match self {
            Self::Pair { core, test } => vec![cell_mean(matrix, core), cell_mean(matrix, test)],
            Self::Triad { core, test, base } => {
                let baseline = cell_mean(matrix, base);
                vec![
                    cell_mean(matrix, test) - baseline,
                    cell_mean(matrix, core) - baseline,
                ]
            }
            Self::Community { graph } => graph.iter().map(|cells| cell_mean(matrix, cells)).collect(),
        }
    }
}

/// Mean of the designated cells. Partitions are never empty once built.
fn cell_mean(matrix: &DMatrix<f64>, cells: &[ItemPair]) -> f64 {
    if cells.is_empty() {
        return f64::NAN;
    }
    let sum: f64 = cells.iter().map(|&(row, col)| matrix[(row, col)]).sum();
    sum / cells.len() as f64
}

/// Designed structure produced by a variant before ordering.
struct Design {
    core_labels: Vec<ItemPair>,
    partitions: Partitions,
}

/// Ordered study pairs plus the structure they were drawn from.
#[derive(Debug, Clone)]
pub struct StimulusSequence {
    params: SequenceParams,
    sequence: Vec<ItemPair>,
    core_labels: Vec<ItemPair>,
    partitions: Partitions,
}

impl StimulusSequence {
    /// Build a sequence deterministically from `seed`.
    pub fn generate(params: SequenceParams, seed: u64) -> Result<Self, SequenceError> {
        params.check()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let (design, sequence) = match params.variant {
            Variant::Pair => {
                let design = pair::design(params.item_count);
                let sequence = order_designed(
                    &design.core_labels,
                    params.sequence_length,
                    params.learning_type,
                    &mut rng,
                );
                (design, sequence)
            }
            Variant::Triad => {
                let design = triad::design(params.item_count);
                let sequence = order_designed(
                    &design.core_labels,
                    params.sequence_length,
                    params.learning_type,
                    &mut rng,
                );
                (design, sequence)
            }
            Variant::Community => {
                let graph = CommunityGraph::new(params.item_count, params.communities)?;
                let sequence = graph.random_walk(params.sequence_length, &mut rng);
                (graph.design(), sequence)
            }
        };

        tracing::debug!(
            variant = %params.variant,
            items = params.item_count,
            length = sequence.len(),
            seed,
            "generated stimulus sequence"
        );

        Ok(Self {
            params,
            sequence,
            core_labels: design.core_labels,
            partitions: design.partitions,
        })
    }

    #[must_use]
    pub const fn variant(&self) -> Variant {
        self.params.variant
    }

    #[must_use]
    pub const fn item_count(&self) -> usize {
        self.params.item_count
    }

    /// Ordered study pairs.
    #[must_use]
    pub fn sequence(&self) -> &[ItemPair] {
        &self.sequence
    }

    /// Distinct designed pairs; a pair's position is its structural label.
    #[must_use]
    pub fn core_label_sequence(&self) -> &[ItemPair] {
        &self.core_labels
    }

    /// Structural label of a pair, if it is a designed pair.
    #[must_use]
    pub fn label_of(&self, pair: ItemPair) -> Option<usize> {
        self.core_labels.iter().position(|&designed| designed == pair)
    }

    #[must_use]
    pub const fn partitions(&self) -> &Partitions {
        &self.partitions
    }

    /// Trained pairs (Pair: designed pairs, Triad: direct pairs).
    #[must_use]
    pub fn core_sequence(&self) -> Option<&[ItemPair]> {
        match &self.partitions {
            Partitions::Pair { core, .. } | Partitions::Triad { core, .. } => Some(core),
            Partitions::Community { .. } => None,
        }
    }

    /// Evaluation pairs (Pair: all pairs, Triad: transitive pairs).
    #[must_use]
    pub fn test_sequence(&self) -> Option<&[ItemPair]> {
        match &self.partitions {
            Partitions::Pair { test, .. } | Partitions::Triad { test, .. } => Some(test),
            Partitions::Community { .. } => None,
        }
    }

    /// Unrelated baseline pairs (Triad only).
    #[must_use]
    pub fn base_sequence(&self) -> Option<&[ItemPair]> {
        match &self.partitions {
            Partitions::Triad { base, .. } => Some(base),
            _ => None,
        }
    }

    /// The four community partitions (Community only).
    #[must_use]
    pub fn graph_sequences(&self) -> Option<&[Vec<ItemPair>; 4]> {
        match &self.partitions {
            Partitions::Community { graph } => Some(graph),
            _ => None,
        }
    }

    /// Consecutive batches of at most `batch_size` study pairs.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = &[ItemPair]> {
        self.sequence.chunks(batch_size.max(1))
    }
}

/// Order designed pairs into a sequence without immediate repeats.
fn order_designed(
    designed: &[ItemPair],
    length: usize,
    learning_type: LearningType,
    rng: &mut impl Rng,
) -> Vec<ItemPair> {
    let n = designed.len();
    let mut order: Vec<usize> = Vec::with_capacity(length);

    match learning_type {
        LearningType::Statistical => {
            for _ in 0..length {
                let next = match order.last() {
                    // Draw from the n - 1 pairs that differ from the previous one
                    Some(&previous) if n > 1 => {
                        let pick = rng.gen_range(0..n - 1);
                        if pick >= previous { pick + 1 } else { pick }
                    }
                    _ => rng.gen_range(0..n),
                };
                order.push(next);
            }
        }
        LearningType::Episodic => {
            while order.len() < length {
                let mut block: Vec<usize> = (0..n).collect();
                block.shuffle(rng);
                if n > 1 && order.last() == block.first() {
                    block.swap(0, 1);
                }
                let take = (length - order.len()).min(n);
                order.extend_from_slice(&block[..take]);
            }
        }
    }

    order.into_iter().map(|index| designed[index]).collect()
}

/// Every ordered pair (i, j) with i != j.
fn off_diagonal_pairs(item_count: usize) -> Vec<ItemPair> {
    (0..item_count)
        .flat_map(|row| (0..item_count).map(move |col| (row, col)))
        .filter(|(row, col)| row != col)
        .collect()
}

/// Derive a seed for one (run seed, epoch, stream) combination.
#[must_use]
pub fn derive_seed(run_seed: u64, epoch: usize, stream: u64) -> u64 {
    let mut rng = ChaCha8Rng::seed_from_u64(run_seed);
    rng.set_stream(stream);
    rng.set_word_pos(epoch as u128 * 16);
    rng.r#gen()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(variant: Variant, item_count: usize, learning_type: LearningType) -> SequenceParams {
        SequenceParams {
            variant,
            item_count,
            sequence_length: 40,
            learning_type,
            communities: 2,
        }
    }

    #[test]
    fn same_seed_gives_same_sequence() {
        let p = params(Variant::Pair, 8, LearningType::Statistical);
        let a = StimulusSequence::generate(p, 42).expect("pair structure");
        let b = StimulusSequence::generate(p, 42).expect("pair structure");
        assert_eq!(a.sequence(), b.sequence());

        let c = StimulusSequence::generate(p, 43).expect("pair structure");
        assert_ne!(a.sequence(), c.sequence());
    }

    #[test]
    fn no_immediate_repeats_in_either_learning_type() {
        for learning_type in [LearningType::Statistical, LearningType::Episodic] {
            for variant in [Variant::Pair, Variant::Triad] {
                let item_count = if variant == Variant::Pair { 8 } else { 9 };
                let seq = StimulusSequence::generate(params(variant, item_count, learning_type), 7)
                    .expect("valid structure");
                assert_eq!(seq.sequence().len(), 40);
                for window in seq.sequence().windows(2) {
                    assert_ne!(window[0], window[1], "{variant} {learning_type}");
                }
            }
        }
    }

    #[test]
    fn episodic_blocks_show_every_pair_once() {
        let seq = StimulusSequence::generate(params(Variant::Pair, 8, LearningType::Episodic), 3)
            .expect("pair structure");
        let designed = seq.core_label_sequence().len();
        for block in seq.sequence().chunks(designed) {
            let mut sorted = block.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), block.len());
        }
    }

    #[test]
    fn every_study_pair_has_a_structural_label() {
        for (variant, items) in [(Variant::Pair, 8), (Variant::Triad, 9), (Variant::Community, 8)] {
            let seq = StimulusSequence::generate(params(variant, items, LearningType::Statistical), 11)
                .expect("valid structure");
            for &pair in seq.sequence() {
                assert!(seq.label_of(pair).is_some(), "{variant}: {pair:?}");
            }
        }
    }

    #[test]
    fn batches_cover_sequence_in_order() {
        let seq = StimulusSequence::generate(params(Variant::Pair, 8, LearningType::Statistical), 1)
            .expect("pair structure");
        let sizes: Vec<usize> = seq.batches(16).map(<[ItemPair]>::len).collect();
        assert_eq!(sizes, vec![16, 16, 8]);
        let rejoined: Vec<ItemPair> = seq.batches(16).flatten().copied().collect();
        assert_eq!(rejoined, seq.sequence());
    }

    #[test]
    fn zero_length_is_rejected() {
        let mut p = params(Variant::Pair, 8, LearningType::Statistical);
        p.sequence_length = 0;
        assert!(matches!(
            StimulusSequence::generate(p, 0),
            Err(SequenceError::EmptySequence)
        ));
    }

    #[test]
    fn derived_seeds_differ_by_epoch_and_stream() {
        let a = derive_seed(9, 0, 0);
        assert_eq!(a, derive_seed(9, 0, 0));
        assert_ne!(a, derive_seed(9, 1, 0));
        assert_ne!(a, derive_seed(9, 0, 1));
    }

    #[test]
    fn pair_contrast_uses_core_then_test_cells() {
        let seq = StimulusSequence::generate(params(Variant::Pair, 4, LearningType::Statistical), 5)
            .expect("pair structure");
        // 1 on designed pairs, 0 elsewhere
        let mut matrix = DMatrix::zeros(4, 4);
        for &(a, b) in seq.core_sequence().expect("pair has core pairs") {
            matrix[(a, b)] = 1.0;
            matrix[(b, a)] = 1.0;
        }
        let contrast = seq.partitions().contrast(&matrix);
        assert_eq!(contrast.len(), 2);
        assert!((contrast[0] - 1.0).abs() < 1e-12);
        // 4 of the 12 off-diagonal cells are designed
        assert!((contrast[1] - 4.0 / 12.0).abs() < 1e-12);
    }
}
