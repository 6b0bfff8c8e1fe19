//! Conversion of item-index pairs into stimulus tensors.

use crate::error::CollaboratorError;
use crate::model::{PatternDataset, Variation};
use crate::sequence::ItemPair;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Which element(s) of a pair become the stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementSelector {
    /// Both patterns concatenated, first then second
    Both,
    First,
    Second,
}

/// Draws pair elements from a dataset, the first element from one
/// variation and the second from another.
#[derive(Clone, Copy)]
pub struct PairSource<'a> {
    dataset: &'a dyn PatternDataset,
    first: Variation,
    second: Variation,
}

impl<'a> PairSource<'a> {
    pub fn new(dataset: &'a dyn PatternDataset, first: Variation, second: Variation) -> Self {
        Self {
            dataset,
            first,
            second,
        }
    }

    /// Same variation for both elements
    pub fn uniform(dataset: &'a dyn PatternDataset, variation: Variation) -> Self {
        Self::new(dataset, variation, variation)
    }

    /// One row per pair.
    pub fn stimuli(
        &self,
        pairs: &[ItemPair],
        element: ElementSelector,
    ) -> Result<DMatrix<f32>, CollaboratorError> {
        let mut rows = Vec::with_capacity(pairs.len());
        for &(first, second) in pairs {
            let row = match element {
                ElementSelector::Both => {
                    let mut values = self.dataset.pattern(first, self.first)?.values;
                    values.extend(self.dataset.pattern(second, self.second)?.values);
                    values
                }
                ElementSelector::First => self.dataset.pattern(first, self.first)?.values,
                ElementSelector::Second => self.dataset.pattern(second, self.second)?.values,
            };
            rows.push(row);
        }
        stack_rows(&rows)
    }

    /// Single items `0..count`, each drawn from the first-element variation.
    pub fn items(&self, count: usize) -> Result<DMatrix<f32>, CollaboratorError> {
        let rows = (0..count)
            .map(|index| self.dataset.pattern(index, self.first).map(|p| p.values))
            .collect::<Result<Vec<_>, _>>()?;
        stack_rows(&rows)
    }
}

/// Stack equal-length rows into a matrix.
pub fn stack_rows(rows: &[Vec<f32>]) -> Result<DMatrix<f32>, CollaboratorError> {
    let width = rows.first().map_or(0, Vec::len);
    if let Some(bad) = rows.iter().find(|row| row.len() != width) {
        return Err(CollaboratorError::Shape {
            expected: width,
            actual: bad.len(),
        });
    }
    Ok(DMatrix::from_fn(rows.len(), width, |i, j| rows[i][j]))
}

/// Repeat the rows of `items` cyclically until `rows` rows are filled.
#[must_use]
pub fn tile_rows(items: &DMatrix<f32>, rows: usize) -> DMatrix<f32> {
    let count = items.nrows().max(1);
    DMatrix::from_fn(rows, items.ncols(), |i, j| items[(i % count, j)])
}

/// Append a zero block of the same width, standing in for an absent partner.
#[must_use]
pub fn pad_with_blank(items: &DMatrix<f32>) -> DMatrix<f32> {
    let width = items.ncols();
    DMatrix::from_fn(items.nrows(), 2 * width, |i, j| {
        if j < width { items[(i, j)] } else { 0.0 }
    })
}
