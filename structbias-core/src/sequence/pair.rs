//! Fixed item pairs (2k, 2k+1).

use super::{Design, ItemPair, Partitions, off_diagonal_pairs};
use crate::error::SequenceError;

pub(super) fn check(item_count: usize) -> Result<(), SequenceError> {
    let reason = if item_count % 2 != 0 {
        Some("item count must be even to form pairs".to_string())
    } else if item_count < 4 {
        Some("at least two pairs are needed to avoid immediate repeats".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SequenceError::StructuralConstraint {
            variant: "pair",
            items: item_count,
            reason,
        }),
        None => Ok(()),
    }
}

pub(super) fn design(item_count: usize) -> Design {
    let core: Vec<ItemPair> = (0..item_count / 2).map(|k| (2 * k, 2 * k + 1)).collect();
    Design {
        core_labels: core.clone(),
        partitions: Partitions::Pair {
            core,
            test: off_diagonal_pairs(item_count),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn designed_pairs_are_adjacent_items() {
        let design = design(6);
        assert_eq!(design.core_labels, vec![(0, 1), (2, 3), (4, 5)]);
    }

    #[test]
    fn odd_or_tiny_pools_are_rejected() {
        assert!(check(7).is_err());
        assert!(check(2).is_err());
        assert!(check(4).is_ok());
    }
}
