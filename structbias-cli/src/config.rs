use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use structbias_core::ExperimentConfig;
use structbias_core::reference::{AlphabetConfig, HebbianConfig};
use toml::{Table, Value};

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Older key names still accepted in user files, as (section, old, current).
const RENAMED_KEYS: &[(&str, &str, &str)] = &[
    ("sequence", "characters", "item_count"),
    ("protocol", "study_batch_size", "batch_size"),
    ("protocol", "test_single_characters", "single_recall"),
    ("protocol", "variation_training", "study_variation"),
    ("protocol", "variation", "recall_variation"),
];

/// Everything the runner needs: the experiment itself plus the reference
/// collaborators and the output location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub model: HebbianConfig,
    #[serde(default)]
    pub dataset: AlphabetConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub root: PathBuf,
    /// Draw SVG heatmaps and contrast bars next to the CSV files
    pub render: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("runs"),
            render: true,
        }
    }
}

impl CliConfig {
    /// The bundled default configuration.
    pub fn builtin() -> Result<Self> {
        Self::from_table(builtin_table()?)
    }

    /// Read `path` and layer it over the bundled defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::layered(&text).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Parse `text` over the bundled defaults.
    pub fn layered(text: &str) -> Result<Self> {
        let mut overrides: Table = text.parse().context("invalid TOML")?;
        rename_legacy_keys(&mut overrides)?;
        let mut table = builtin_table()?;
        merge_tables(&mut table, overrides);
        Self::from_table(table)
    }

    fn from_table(table: Table) -> Result<Self> {
        Value::Table(table)
            .try_into()
            .context("config does not match the expected layout")
    }

    /// Cross-checks between the experiment and the reference collaborators.
    pub fn validate(&self) -> Result<()> {
        self.experiment
            .validate()
            .context("invalid experiment configuration")?;

        let items = self.experiment.sequence.item_count;
        ensure!(
            self.dataset.items >= items,
            "dataset has {} items but the sequence needs {items}",
            self.dataset.items
        );
        ensure!(self.dataset.variations > 0, "dataset needs at least one variation");
        ensure!(self.dataset.pattern_dim > 0, "dataset pattern_dim must be non-zero");
        if self.experiment.pretrain.epochs > 0 {
            ensure!(
                self.dataset.background_items > 1,
                "pretraining needs at least two background items"
            );
        }
        Ok(())
    }
}

fn builtin_table() -> Result<Table> {
    DEFAULT_CONFIG
        .parse()
        .context("bundled default config is not valid TOML")
}

/// Move old key names onto their current names so the merge below
/// overrides the default instead of leaving both spellings in one table.
fn rename_legacy_keys(table: &mut Table) -> Result<()> {
    for &(section, old, current) in RENAMED_KEYS {
        let Some(Value::Table(section_table)) = table.get_mut(section) else {
            continue;
        };
        let Some(value) = section_table.remove(old) else {
            continue;
        };
        ensure!(
            !section_table.contains_key(current),
            "[{section}] sets both `{old}` and `{current}`"
        );
        section_table.insert(current.to_string(), value);
    }
    Ok(())
}

/// Recursive merge; tables merge key by key, anything else is replaced.
fn merge_tables(base: &mut Table, overrides: Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => merge_tables(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use structbias_core::{Variant, Variation};

    #[test]
    fn builtin_config_parses_and_validates() {
        let config = CliConfig::builtin().unwrap();
        assert_eq!(config.experiment.sequence.item_count, 12);
        assert_eq!(config.experiment.run.seeds, 5);
        assert_eq!(config.dataset.items, 26);
        assert!(config.output.render);
        config.validate().unwrap();
    }

    #[test]
    fn builtin_item_count_supports_every_variant() {
        for variant in Variant::ALL {
            let mut config = CliConfig::builtin().unwrap();
            config.experiment.sequence.experiment = variant;
            config.validate().unwrap();
        }
    }

    #[test]
    fn partial_file_keeps_the_remaining_defaults() {
        let config = CliConfig::layered(
            r#"
            [sequence]
            experiment = "community_structure"

            [run]
            seeds = 2

            [model]
            dg_size = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.experiment.sequence.experiment, Variant::Community);
        assert_eq!(config.experiment.sequence.item_count, 12);
        assert_eq!(config.experiment.run.seeds, 2);
        assert_eq!(config.experiment.run.base_seed, Some(2024));
        assert_eq!(config.model.dg_size, 32);
        assert_eq!(config.model.pr_size, 48);
    }

    #[test]
    fn legacy_key_names_are_accepted() {
        let config = CliConfig::layered(
            r#"
            [sequence]
            characters = 6
            experiment = "triad"

            [protocol]
            study_batch_size = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.experiment.sequence.item_count, 6);
        assert_eq!(config.experiment.protocol.batch_size, 6);
        config.validate().unwrap();
    }

    #[test]
    fn every_legacy_key_overrides_its_default() {
        let config = CliConfig::layered(
            r#"
            [protocol]
            test_single_characters = false
            variation_training = { specific = 2 }
            variation = { specific = 1 }
            "#,
        )
        .unwrap();
        let protocol = &config.experiment.protocol;
        assert!(!protocol.single_recall);
        assert_eq!(protocol.study_variation, Variation::Specific(2));
        assert_eq!(protocol.recall_variation, Variation::Specific(1));
        assert_eq!(protocol.batch_size, 12);
    }

    #[test]
    fn old_and_new_spelling_together_is_rejected() {
        let err = CliConfig::layered("[sequence]\ncharacters = 6\nitem_count = 8").unwrap_err();
        assert!(format!("{err:#}").contains("both `characters` and `item_count`"));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[output]\nroot = \"elsewhere\"\nrender = false").unwrap();
        let config = CliConfig::load(file.path()).unwrap();
        assert_eq!(config.output.root, PathBuf::from("elsewhere"));
        assert!(!config.output.render);
    }

    #[test]
    fn dataset_too_small_for_the_sequence_is_rejected() {
        let config = CliConfig::layered("[dataset]\nitems = 4").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dataset has 4 items"));
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = CliConfig::load(Path::new("/nonexistent/structbias.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/structbias.toml"));
    }
}
