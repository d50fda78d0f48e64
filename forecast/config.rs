//! Explicit configuration for every pipeline entry point.
//!
//! Nothing in the library reads global options. The CLI loads a [`ForecastConfig`]
//! from a TOML file (every field has a default, so an empty file is valid) and passes
//! the relevant section into each component.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// One candidate regression learner: a registry tag plus its numeric options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerSpec {
    pub method: String,
    #[serde(default)]
    pub options: BTreeMap<String, f64>,
}

impl LearnerSpec {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: f64) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Lags, in days, of the usage series exposed as `lag_<k>` columns.
    pub lags: Vec<usize>,
    /// Trailing window, in days, of the `roll_<w>` mean usage column.
    pub rolling_window: usize,
    /// Consecutive zero-usage days treated as an outage by fault detection.
    pub min_zero_run: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![7, 14],
            rolling_window: 28,
            min_zero_run: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub folds: usize,
    pub fold_seed: u64,
    /// Step budget of the greedy ensemble weight search.
    pub ensemble_iterations: usize,
    pub correlation_cutoff: f64,
    pub nzv_tolerance: f64,
    /// Standard deviations above the maximum training response allowed in predictions.
    pub upper_bound_sds: f64,
    /// Neighbours used for missing-value imputation inside each fold.
    pub impute_neighbors: usize,
    pub learners: Vec<LearnerSpec>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            fold_seed: 20_160_512,
            ensemble_iterations: 1000,
            correlation_cutoff: 0.9,
            nzv_tolerance: 1e-8,
            upper_bound_sds: 4.0,
            impute_neighbors: 5,
            learners: vec![
                LearnerSpec::new("lm"),
                LearnerSpec::new("ridge").with_option("lambda", 1.0),
                LearnerSpec::new("enet")
                    .with_option("alpha", 0.5)
                    .with_option("lambda", 0.1),
                LearnerSpec::new("knn").with_option("k", 7.0),
                LearnerSpec::new("tree")
                    .with_option("max_depth", 5.0)
                    .with_option("min_leaf", 5.0),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub features: FeatureConfig,
    pub training: TrainingConfig,
    /// Constant label written next to every prediction.
    pub model_label: String,
    /// Value predicted for entities without a model.
    pub default_prediction: f64,
    pub show_progress: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            training: TrainingConfig::default(),
            model_label: "ensemble".to_string(),
            default_prediction: 0.0,
            show_progress: false,
        }
    }
}

impl ForecastConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let training = &self.training;
        if training.folds < 2 {
            return Err(ConfigError::Invalid {
                field: "training.folds",
                reason: format!("at least 2 folds are required, got {}", training.folds),
            });
        }
        if training.ensemble_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "training.ensemble_iterations",
                reason: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&training.correlation_cutoff) {
            return Err(ConfigError::Invalid {
                field: "training.correlation_cutoff",
                reason: format!("{} is outside [0, 1]", training.correlation_cutoff),
            });
        }
        if training.learners.is_empty() {
            return Err(ConfigError::Invalid {
                field: "training.learners",
                reason: "at least one learner must be configured".to_string(),
            });
        }
        if self.features.lags.iter().any(|&lag| lag == 0) {
            return Err(ConfigError::Invalid {
                field: "features.lags",
                reason: "lags must be at least one day".to_string(),
            });
        }
        if self.features.rolling_window == 0 {
            return Err(ConfigError::Invalid {
                field: "features.rolling_window",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ForecastConfig::from_toml("").unwrap();
        assert_eq!(config.training.folds, 5);
        assert_eq!(config.training.ensemble_iterations, 1000);
        assert_eq!(config.features.lags, vec![7, 14]);
        assert_eq!(config.model_label, "ensemble");
    }

    #[test]
    fn learners_are_read_from_tables() {
        let text = r#"
            model_label = "atm-ensemble"

            [training]
            folds = 4

            [[training.learners]]
            method = "knn"
            options = { k = 3.0 }

            [[training.learners]]
            method = "mean"
        "#;
        let config = ForecastConfig::from_toml(text).unwrap();
        assert_eq!(config.model_label, "atm-ensemble");
        assert_eq!(config.training.folds, 4);
        assert_eq!(
            config.training.learners,
            vec![LearnerSpec::new("knn").with_option("k", 3.0), LearnerSpec::new("mean")]
        );
        assert_eq!(config.training.correlation_cutoff, 0.9);
    }

    #[test]
    fn invalid_fold_count_is_rejected() {
        let err = ForecastConfig::from_toml("[training]\nfolds = 1\n").unwrap_err();
        match err {
            ConfigError::Invalid { field, .. } => assert_eq!(field, "training.folds"),
            other => panic!("Expected Invalid(training.folds), got {other:?}"),
        }
    }
}
