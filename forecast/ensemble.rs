//! # Greedy Ensembles
//!
//! Members are blended by forward selection with replacement over their out-of-fold
//! predictions. Every step adds one unit of weight to the member whose inclusion
//! gives the lowest RMSE of the weight-normalized blend, so after `s` steps the blend
//! is the average of `s` member predictions (with repeats). A member's weight is the
//! number of steps that picked it.

use crate::cv::{BoundedModel, rmse};
use itertools::Itertools;
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Step counts per member and the RMSE of the final blend.
///
/// `predictions` holds one column per member and one row per observation. Ties go
/// to the earliest member, which makes the search deterministic.
pub fn greedy_weights(
    predictions: ArrayView2<f64>,
    observed: ArrayView1<f64>,
    iterations: usize,
) -> (Vec<f64>, f64) {
    let members = predictions.ncols();
    let mut weights = vec![0.0; members];
    if members == 0 || iterations == 0 {
        return (weights, f64::NAN);
    }

    let mut running = Array1::<f64>::zeros(observed.len());
    let mut achieved = f64::NAN;
    for step in 1..=iterations {
        let (choice, error) = (0..members)
            .map(|member| {
                let blend = (&running + &predictions.column(member)) / step as f64;
                (member, rmse(blend.view(), observed))
            })
            .fold((0, f64::INFINITY), |best, candidate| {
                if candidate.1 < best.1 { candidate } else { best }
            });
        running += &predictions.column(choice);
        weights[choice] += 1.0;
        achieved = error;
    }
    (weights, achieved)
}

/// One blended learner.
#[derive(Debug)]
pub struct EnsembleMember {
    pub method: String,
    /// Columns the member was trained on, in order.
    pub features: Vec<String>,
    pub model: BoundedModel,
    pub cv_rmse: f64,
}

#[derive(Debug)]
pub struct FittedEnsemble {
    pub entity: String,
    pub members: Vec<EnsembleMember>,
    /// Raw step counts; normalized only when predicting.
    pub weights: Vec<f64>,
    pub rmse: f64,
}

impl FittedEnsemble {
    /// Feature names every member expects.
    pub fn features(&self) -> &[String] {
        self.members
            .first()
            .map(|m| m.features.as_slice())
            .unwrap_or(&[])
    }

    /// Weighted blend of the member predictions. Members without weight are skipped.
    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let total: f64 = self.weights.iter().sum();
        let mut blend = Array1::<f64>::zeros(x.nrows());
        for (member, &weight) in self.members.iter().zip(&self.weights) {
            if weight > 0.0 {
                blend.scaled_add(weight / total, &member.model.predict(x));
            }
        }
        blend
    }

    /// `method=weight` pairs for log lines.
    pub fn weight_breakdown(&self) -> String {
        self.members
            .iter()
            .zip(&self.weights)
            .map(|(m, w)| format!("{}={}", m.method, w))
            .join(", ")
    }
}
