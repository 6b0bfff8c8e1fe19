//! Synthetic "alphabet": one binary prototype per item, each drawn in a
//! number of noisy variations, standing in for characters drawn by
//! different writers.

use crate::error::CollaboratorError;
use crate::model::{LabeledPattern, PatternDataset, Variation};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Dataset settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlphabetConfig {
    pub items: usize,
    pub pattern_dim: usize,
    pub variations: usize,
    /// Amplitude of the uniform noise added to each variation
    pub noise: f32,
    /// Size of the background set used for pretraining
    pub background_items: usize,
    pub seed: u64,
}

impl Default for AlphabetConfig {
    fn default() -> Self {
        Self {
            items: 26,
            pattern_dim: 64,
            variations: 20,
            noise: 0.3,
            background_items: 200,
            seed: 7,
        }
    }
}

/// Deterministic prototype/variation pattern set.
#[derive(Debug, Clone)]
pub struct SyntheticAlphabet {
    prototypes: Vec<Vec<f32>>,
    variations: usize,
    noise: f32,
    seed: u64,
}

impl SyntheticAlphabet {
    #[must_use]
    pub fn new(items: usize, pattern_dim: usize, variations: usize, noise: f32, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let prototypes = (0..items)
            .map(|_| {
                (0..pattern_dim)
                    .map(|_| if rng.r#gen::<bool>() { 1.0 } else { -1.0 })
                    .collect()
            })
            .collect();
        Self {
            prototypes,
            variations: variations.max(1),
            noise,
            seed,
        }
    }

    /// Stimulus set described by `config`.
    #[must_use]
    pub fn from_config(config: &AlphabetConfig) -> Self {
        Self::new(
            config.items,
            config.pattern_dim,
            config.variations,
            config.noise,
            config.seed,
        )
    }

    /// Background set with its own prototypes, for pretraining.
    #[must_use]
    pub fn background(config: &AlphabetConfig) -> Self {
        Self::new(
            config.background_items,
            config.pattern_dim,
            config.variations,
            config.noise,
            config.seed.wrapping_add(1),
        )
    }

    #[must_use]
    pub fn pattern_dim(&self) -> usize {
        self.prototypes.first().map_or(0, Vec::len)
    }
}

impl PatternDataset for SyntheticAlphabet {
    fn len(&self) -> usize {
        self.prototypes.len()
    }

    fn pattern(&self, index: usize, variation: Variation) -> Result<LabeledPattern, CollaboratorError> {
        let prototype = self.prototypes.get(index).ok_or_else(|| CollaboratorError::Dataset {
            index,
            message: format!("only {} items available", self.prototypes.len()),
        })?;
        let k = match variation {
            Variation::Specific(k) if k < self.variations => k,
            Variation::Specific(k) => {
                return Err(CollaboratorError::Dataset {
                    index,
                    message: format!("variation {k} out of {}", self.variations),
                });
            }
            Variation::Any => index % self.variations,
        };

        let stream = (index * self.variations + k) as u64;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(stream.wrapping_add(1));
        let values = prototype
            .iter()
            .map(|&p| p + self.noise * rng.gen_range(-1.0..=1.0))
            .collect();

        Ok(LabeledPattern { values, label: index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::pearson;

    #[test]
    fn patterns_are_deterministic() {
        let data = SyntheticAlphabet::new(4, 16, 3, 0.2, 11);
        let a = data.pattern(2, Variation::Specific(1)).expect("in range");
        let b = data.pattern(2, Variation::Specific(1)).expect("in range");
        assert_eq!(a, b);
        assert_eq!(a.label, 2);
        assert_eq!(a.values.len(), 16);
    }

    #[test]
    fn variations_of_one_item_stay_close() {
        let data = SyntheticAlphabet::new(4, 64, 3, 0.2, 11);
        let a = data.pattern(0, Variation::Specific(0)).expect("in range");
        let b = data.pattern(0, Variation::Specific(2)).expect("in range");
        assert_ne!(a.values, b.values);
        assert!(pearson(&a.values, &b.values) > 0.8);
    }

    #[test]
    fn out_of_range_lookups_fail() {
        let data = SyntheticAlphabet::new(4, 8, 3, 0.2, 11);
        assert!(data.pattern(4, Variation::Any).is_err());
        assert!(data.pattern(0, Variation::Specific(3)).is_err());
    }
}
