//! Optional `mlpipe.toml` settings for the workflows.
//!
//! Every key has a default, so a missing file or a partial file is fine.
//! Unknown keys are ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::MlContext;
use crate::dataset::images::LabelMode;
use crate::ml::forest::FastForestOptions;
use crate::ml::gbdt::FastTreeOptions;
use crate::pipeline::stages::TextFeaturizerOptions;
use crate::vision::{Architecture, ImageClassificationOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid value in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub context: ContextSettings,
    pub split: SplitSettings,
    pub regression: RegressionSettings,
    pub text: TextSettings,
    pub image: ImageSettings,
    pub predict: PredictSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub seed: u64,
    /// Defaults to the available parallelism.
    pub threads: Option<usize>,
}

impl ContextSettings {
    pub fn ml_context(&self) -> MlContext {
        let ctx = MlContext::new(self.seed);
        match self.threads {
            Some(threads) => ctx.with_threads(threads),
            None => ctx,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSettings {
    /// Test share for the tabular workflows.
    pub test_fraction: f64,
    /// Share of the image set held out from training.
    pub image_test_fraction: f64,
    /// Share of the held-out images used as the final test set; the rest validates.
    pub image_holdout_test_fraction: f64,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            image_test_fraction: 0.3,
            image_holdout_test_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionSettings {
    /// CSV file name under `assets/`.
    pub data_file: String,
    pub trainer: FastTreeOptions,
}

impl Default for RegressionSettings {
    fn default() -> Self {
        Self {
            data_file: "Life Expectancy Data.csv".to_string(),
            trainer: FastTreeOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextSettings {
    pub data_file: String,
    pub featurizer: TextFeaturizerOptions,
    pub trainer: FastForestOptions,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            data_file: "Luxury_Products_Apparel_Data.csv".to_string(),
            featurizer: TextFeaturizerOptions::default(),
            trainer: FastForestOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub label_mode: LabelMode,
    pub architecture: Architecture,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub l2: f32,
    pub early_stopping_patience: usize,
    pub test_on_train_set: bool,
    pub reuse_train_set_bottleneck_cached_values: bool,
    pub reuse_validation_set_bottleneck_cached_values: bool,
}

impl Default for ImageSettings {
    fn default() -> Self {
        let options = ImageClassificationOptions::default();
        Self {
            label_mode: LabelMode::default(),
            architecture: options.architecture,
            epochs: options.epochs,
            batch_size: options.batch_size,
            learning_rate: options.learning_rate,
            l2: options.l2,
            early_stopping_patience: options.early_stopping_patience,
            test_on_train_set: options.test_on_train_set,
            reuse_train_set_bottleneck_cached_values: options
                .reuse_train_set_bottleneck_cached_values,
            reuse_validation_set_bottleneck_cached_values: options
                .reuse_validation_set_bottleneck_cached_values,
        }
    }
}

impl ImageSettings {
    /// Trainer options with these settings applied; data and callbacks are left unset.
    pub fn classification_options(&self) -> ImageClassificationOptions {
        ImageClassificationOptions {
            architecture: self.architecture,
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            l2: self.l2,
            early_stopping_patience: self.early_stopping_patience,
            test_on_train_set: self.test_on_train_set,
            reuse_train_set_bottleneck_cached_values: self.reuse_train_set_bottleneck_cached_values,
            reuse_validation_set_bottleneck_cached_values: self
                .reuse_validation_set_bottleneck_cached_values,
            ..ImageClassificationOptions::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictSettings {
    /// Also score every row of the training CSV after the single sample.
    pub batch_from_assets: bool,
    /// Batch prediction threads; defaults to the context's thread count.
    pub workers: Option<usize>,
}

impl WorkflowConfig {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse TOML text; `path` only labels errors.
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate().map_err(|reason| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        let fractions = [
            ("split.test_fraction", self.split.test_fraction),
            ("split.image_test_fraction", self.split.image_test_fraction),
            (
                "split.image_holdout_test_fraction",
                self.split.image_holdout_test_fraction,
            ),
        ];
        for (name, value) in fractions {
            if !(value > 0.0 && value < 1.0) {
                return Err(format!("{name} must be between 0 and 1, got {value}"));
            }
        }
        if self.regression.trainer.number_of_trees == 0 {
            return Err("regression.trainer.number_of_trees must be at least 1".to_string());
        }
        if self.regression.trainer.number_of_leaves < 2 {
            return Err("regression.trainer.number_of_leaves must be at least 2".to_string());
        }
        if self.text.trainer.number_of_trees == 0 {
            return Err("text.trainer.number_of_trees must be at least 1".to_string());
        }
        if self.text.trainer.number_of_leaves < 2 {
            return Err("text.trainer.number_of_leaves must be at least 2".to_string());
        }
        let bagging = self.text.trainer.bagging_fraction;
        if !(bagging > 0.0 && bagging <= 1.0) {
            return Err(format!(
                "text.trainer.bagging_fraction must be in (0, 1], got {bagging}"
            ));
        }
        if self.image.epochs == 0 || self.image.batch_size == 0 {
            return Err("image.epochs and image.batch_size must be at least 1".to_string());
        }
        if !(self.image.learning_rate > 0.0) {
            return Err("image.learning_rate must be positive".to_string());
        }
        if self.predict.workers == Some(0) {
            return Err("predict.workers must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(text: &str) -> Result<WorkflowConfig, ConfigError> {
        WorkflowConfig::parse(text, Path::new("mlpipe.toml"))
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = WorkflowConfig::load(&dir.path().join("mlpipe.toml")).unwrap();
        assert_eq!(config, WorkflowConfig::default());
        assert_eq!(config.split.test_fraction, 0.2);
        assert_eq!(config.text.trainer.number_of_trees, 4);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
            unknown_top_level = 1

            [context]
            seed = 42
            threads = 2

            [regression.trainer]
            number_of_trees = 10

            [image]
            label_mode = "file_name_prefix"
            epochs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.context.ml_context().seed, 42);
        assert_eq!(config.context.ml_context().threads, 2);
        assert_eq!(config.regression.trainer.number_of_trees, 10);
        assert_eq!(config.regression.trainer.number_of_leaves, 20);
        assert_eq!(config.image.label_mode, LabelMode::FileNamePrefix);
        let options = config.image.classification_options();
        assert_eq!(options.epochs, 5);
        assert_eq!(options.batch_size, 10);
    }

    #[test]
    fn out_of_range_values_are_invalid() {
        let err = parse("[split]\ntest_fraction = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        let err = parse("[text.trainer]\nnumber_of_trees = 0\n").unwrap_err();
        assert!(err.to_string().contains("number_of_trees"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = parse("[split\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }
}
