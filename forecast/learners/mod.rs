//! # Regression Learners
//!
//! A [`Learner`] turns a fully observed, preprocessed design matrix and a response
//! into a fitted [`Regressor`]. Learners are looked up by method tag in a
//! [`LearnerRegistry`], so the trainer never names a concrete algorithm.
//!
//! Options arrive as a flat `name -> f64` map. Every learner rejects options it does
//! not know and values outside their domain, rather than silently ignoring them.

mod baseline;
mod enet;
mod knn;
mod linear;
mod tree;

pub use baseline::MeanLearner;
pub use enet::ElasticNetLearner;
pub use knn::KnnLearner;
pub use linear::{LinearLearner, LinearModel};
pub use tree::TreeLearner;

use ahash::AHashMap;
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

pub type LearnerOptions = BTreeMap<String, f64>;

#[derive(Error, Debug)]
pub enum LearnerError {
    #[error("No learner is registered under the method tag '{0}'.")]
    UnknownMethod(String),

    #[error("Learner '{method}' rejects option '{option}' = {value}: {reason}")]
    InvalidOption {
        method: String,
        option: String,
        value: f64,
        reason: &'static str,
    },

    #[error("Learner '{method}' needs at least {required} training rows but received {rows}.")]
    InsufficientRows {
        method: String,
        rows: usize,
        required: usize,
    },

    #[error("Learner '{method}' received {response} responses for {rows} design rows.")]
    DimensionMismatch {
        method: String,
        rows: usize,
        response: usize,
    },

    #[error("Failed to solve the normal equations: {0}")]
    LinearSystem(#[from] ndarray_linalg::error::LinalgError),

    #[error("Learner '{method}' produced a non-finite fit.")]
    NonFinite { method: String },
}

/// A fitted model.
pub trait Regressor: Send + Sync + Debug {
    /// One prediction per row of `x`, which has the columns the model was fit on.
    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64>;
}

/// A regression algorithm.
pub trait Learner: Send + Sync {
    fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        options: &LearnerOptions,
    ) -> Result<Box<dyn Regressor>, LearnerError>;
}

/// Learners by method tag.
#[derive(Clone, Default)]
pub struct LearnerRegistry {
    learners: AHashMap<String, Arc<dyn Learner>>,
}

impl LearnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `lm`, `ridge`, `enet`, `knn`, `tree` and `mean`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("lm", Arc::new(LinearLearner::least_squares()));
        registry.register("ridge", Arc::new(LinearLearner::ridge()));
        registry.register("enet", Arc::new(ElasticNetLearner));
        registry.register("knn", Arc::new(KnnLearner));
        registry.register("tree", Arc::new(TreeLearner));
        registry.register("mean", Arc::new(MeanLearner));
        registry
    }

    /// Adds `learner` under `method`, replacing any previous registration.
    pub fn register(&mut self, method: &str, learner: Arc<dyn Learner>) {
        self.learners.insert(method.to_string(), learner);
    }

    pub fn resolve(&self, method: &str) -> Result<Arc<dyn Learner>, LearnerError> {
        self.learners
            .get(method)
            .cloned()
            .ok_or_else(|| LearnerError::UnknownMethod(method.to_string()))
    }

    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.learners.keys().cloned().collect();
        methods.sort();
        methods
    }
}

/// Fails on any option outside `allowed`.
pub(crate) fn check_option_names(
    method: &str,
    options: &LearnerOptions,
    allowed: &[&str],
) -> Result<(), LearnerError> {
    match options.iter().find(|(name, _)| !allowed.contains(&name.as_str())) {
        Some((name, &value)) => Err(LearnerError::InvalidOption {
            method: method.to_string(),
            option: name.clone(),
            value,
            reason: "unknown option",
        }),
        None => Ok(()),
    }
}

/// Reads a finite option lying in `[min, max]`, falling back to `default`.
pub(crate) fn bounded_option(
    method: &str,
    options: &LearnerOptions,
    name: &str,
    default: f64,
    min: f64,
    max: f64,
) -> Result<f64, LearnerError> {
    let value = options.get(name).copied().unwrap_or(default);
    if !value.is_finite() || value < min || value > max {
        return Err(LearnerError::InvalidOption {
            method: method.to_string(),
            option: name.to_string(),
            value,
            reason: "value is outside the accepted range",
        });
    }
    Ok(value)
}

/// Reads an integral option of at least `min`.
pub(crate) fn count_option(
    method: &str,
    options: &LearnerOptions,
    name: &str,
    default: usize,
    min: usize,
) -> Result<usize, LearnerError> {
    let value = options.get(name).copied().unwrap_or(default as f64);
    if !value.is_finite() || value.fract() != 0.0 || value < min as f64 {
        return Err(LearnerError::InvalidOption {
            method: method.to_string(),
            option: name.to_string(),
            value,
            reason: "expected a whole number",
        });
    }
    Ok(value as usize)
}

pub(crate) fn check_shape(
    method: &str,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    required: usize,
) -> Result<(), LearnerError> {
    if x.nrows() != y.len() {
        return Err(LearnerError::DimensionMismatch {
            method: method.to_string(),
            rows: x.nrows(),
            response: y.len(),
        });
    }
    if x.nrows() < required {
        return Err(LearnerError::InsufficientRows {
            method: method.to_string(),
            rows: x.nrows(),
            required,
        });
    }
    Ok(())
}
