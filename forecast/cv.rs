//! # Cross-Validation
//!
//! Folds are assigned once per entity and shared by every learner, so out-of-fold
//! predictions of different learners are directly comparable and can be blended.
//! Each fold fits its own [`Preprocessor`] on the fold's training rows only.

use crate::learners::{Learner, LearnerError, LearnerOptions, Regressor};
use crate::preprocess::Preprocessor;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

/// A seeded partition of `n` rows into `k` folds of near-equal size.
#[derive(Debug, Clone, PartialEq)]
pub struct Folds {
    assignment: Vec<usize>,
    count: usize,
}

impl Folds {
    /// Shuffles the rows with `seed` and deals them round-robin into `k` folds.
    /// `k` is clamped to `n`; fewer than two rows cannot be cross-validated.
    pub fn assign(n: usize, k: usize, seed: u64) -> Result<Self, LearnerError> {
        if n < 2 {
            return Err(LearnerError::InsufficientRows {
                method: "cross-validation".to_string(),
                rows: n,
                required: 2,
            });
        }
        let count = k.clamp(2, n);
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let mut assignment = vec![0; n];
        for (position, &row) in order.iter().enumerate() {
            assignment[row] = position % count;
        }
        Ok(Self { assignment, count })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn holdout(&self, fold: usize) -> Vec<usize> {
        self.rows(|f| f == fold)
    }

    pub fn training(&self, fold: usize) -> Vec<usize> {
        self.rows(|f| f != fold)
    }

    fn rows(&self, keep: impl Fn(usize) -> bool) -> Vec<usize> {
        self.assignment
            .iter()
            .enumerate()
            .filter(|&(_, &f)| keep(f))
            .map(|(row, _)| row)
            .collect()
    }
}

/// A fitted learner together with its preprocessing and output bounds.
#[derive(Debug)]
pub struct BoundedModel {
    pub preprocessor: Preprocessor,
    pub regressor: Box<dyn Regressor>,
    pub upper_bound: f64,
}

impl BoundedModel {
    pub fn fit(
        learner: &dyn Learner,
        options: &LearnerOptions,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        neighbors: usize,
        upper_bound: f64,
    ) -> Result<Self, LearnerError> {
        let preprocessor = Preprocessor::fit(x, neighbors);
        let regressor = learner.fit(preprocessor.transform(x).view(), y, options)?;
        Ok(Self {
            preprocessor,
            regressor,
            upper_bound,
        })
    }

    /// Predictions clipped to `[0, upper_bound]`; a negative bound clips to zero.
    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let z = self.preprocessor.transform(x);
        let upper = self.upper_bound.max(0.0);
        self.regressor
            .predict(z.view())
            .mapv(|v| v.max(0.0).min(upper))
    }
}

/// Result of cross-validating one learner.
#[derive(Debug)]
pub struct Validated {
    /// One out-of-fold prediction per training row.
    pub out_of_fold: Array1<f64>,
    pub rmse: f64,
    /// The learner refit on every training row.
    pub model: BoundedModel,
}

pub fn rmse(predictions: ArrayView1<f64>, observed: ArrayView1<f64>) -> f64 {
    let n = observed.len() as f64;
    let sse: f64 = predictions
        .iter()
        .zip(observed.iter())
        .map(|(p, o)| (p - o).powi(2))
        .sum();
    (sse / n).sqrt()
}

/// Fits `learner` once per fold in parallel, collects the out-of-fold predictions,
/// then refits on all rows.
pub fn cross_validate(
    learner: &dyn Learner,
    options: &LearnerOptions,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    folds: &Folds,
    neighbors: usize,
    upper_bound: f64,
) -> Result<Validated, LearnerError> {
    let per_fold = (0..folds.count())
        .into_par_iter()
        .map(|fold| {
            let training = folds.training(fold);
            let holdout = folds.holdout(fold);
            let model = BoundedModel::fit(
                learner,
                options,
                x.select(Axis(0), &training).view(),
                y.select(Axis(0), &training).view(),
                neighbors,
                upper_bound,
            )?;
            let predicted = model.predict(x.select(Axis(0), &holdout).view());
            Ok::<_, LearnerError>((holdout, predicted))
        })
        .collect::<Result<Vec<_>, LearnerError>>()?;

    let mut out_of_fold = Array1::<f64>::from_elem(y.len(), f64::NAN);
    for (holdout, predicted) in per_fold {
        for (&row, &value) in holdout.iter().zip(predicted.iter()) {
            out_of_fold[row] = value;
        }
    }
    if out_of_fold.iter().any(|v| !v.is_finite()) {
        return Err(LearnerError::NonFinite {
            method: "cross-validation".to_string(),
        });
    }

    let model = BoundedModel::fit(learner, options, x, y, neighbors, upper_bound)?;
    Ok(Validated {
        rmse: rmse(out_of_fold.view(), y),
        out_of_fold,
        model,
    })
}
