use crate::config::ConfigError;
use crate::history::DataError;
use crate::table::SchemaError;
use polars::prelude::PolarsError;
use thiserror::Error;

/// The crate-level error. Per-learner failures never reach this type: the trainer
/// absorbs them and only reports when no learner at all survives.
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Failed to load withdrawal history: {0}")]
    Data(#[from] DataError),

    #[error("The feature table failed validation: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),

    #[error("Every configured learner failed to fit for entity '{entity}'.")]
    TrainingFailure { entity: String },

    #[error("The model for entity '{entity}' needs feature '{feature}', which the feature matrix lacks.")]
    MissingFeature { entity: String, feature: String },

    #[error(
        "Entity '{entity}': the response has {response} rows but the feature matrix has {matrix}."
    )]
    ShapeMismatch {
        entity: String,
        response: usize,
        matrix: usize,
    },
}
