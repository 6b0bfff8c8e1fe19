//! A-B-C triads (3k, 3k+1, 3k+2) for transitive inference.
//!
//! Direct pairs A-B and B-C are studied; A-C is never shown and measures
//! transitive association. Pairs spanning two triads form the baseline.

use super::{Design, ItemPair, Partitions};
use crate::error::SequenceError;

pub(super) fn check(item_count: usize) -> Result<(), SequenceError> {
    let reason = if item_count % 3 != 0 {
        Some("item count must be a multiple of 3 to form triads".to_string())
    } else if item_count < 6 {
        Some("at least two triads are needed for a baseline".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SequenceError::StructuralConstraint {
            variant: "triad",
            items: item_count,
            reason,
        }),
        None => Ok(()),
    }
}

pub(super) fn design(item_count: usize) -> Design {
    let triads = item_count / 3;
    let triad_of = |item: usize| item / 3;

    let core: Vec<ItemPair> = (0..triads)
        .flat_map(|t| [(3 * t, 3 * t + 1), (3 * t + 1, 3 * t + 2)])
        .collect();
    let test: Vec<ItemPair> = (0..triads).map(|t| (3 * t, 3 * t + 2)).collect();
    let base: Vec<ItemPair> = (0..item_count)
        .flat_map(|row| (0..item_count).map(move |col| (row, col)))
        .filter(|&(row, col)| triad_of(row) != triad_of(col))
        .collect();

    Design {
        core_labels: core.clone(),
        partitions: Partitions::Triad { core, test, base },
    }
}
