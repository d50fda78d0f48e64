//! Elastic net by cyclic coordinate descent.
//!
//! Minimizes `||y - b0 - X b||² / (2n) + lambda (alpha |b|₁ + (1 - alpha) |b|² / 2)`.
//! Options: `alpha` in `[0, 1]` (default 0.5), `lambda` (default 0.1), `max_iter`
//! (default 1000) and `tol` on the largest coefficient change (default 1e-6).

use super::{
    LearnerError, LearnerOptions, Learner, LinearModel, Regressor, bounded_option,
    check_option_names, check_shape, count_option,
};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

const METHOD: &str = "enet";

#[derive(Debug, Clone, Copy)]
pub struct ElasticNetLearner;

impl Learner for ElasticNetLearner {
    fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        options: &LearnerOptions,
    ) -> Result<Box<dyn Regressor>, LearnerError> {
        check_option_names(METHOD, options, &["alpha", "lambda", "max_iter", "tol"])?;
        let alpha = bounded_option(METHOD, options, "alpha", 0.5, 0.0, 1.0)?;
        let lambda = bounded_option(METHOD, options, "lambda", 0.1, 0.0, f64::MAX)?;
        let max_iter = count_option(METHOD, options, "max_iter", 1000, 1)?;
        let tol = bounded_option(METHOD, options, "tol", 1e-6, f64::MIN_POSITIVE, f64::MAX)?;
        check_shape(METHOD, x, y, 1)?;
        Ok(Box::new(coordinate_descent(x, y, alpha, lambda, max_iter, tol)?))
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

fn coordinate_descent(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    alpha: f64,
    lambda: f64,
    max_iter: usize,
    tol: f64,
) -> Result<LinearModel, LearnerError> {
    let n = x.nrows() as f64;
    let p = x.ncols();
    let y_mean = y.sum() / n;
    let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(p));
    let xc = &x - &x_mean;

    let mut beta = Array1::<f64>::zeros(p);
    let mut residual = &y - y_mean;
    let squared_norms: Vec<f64> = xc
        .axis_iter(Axis(1))
        .map(|column| column.dot(&column) / n)
        .collect();

    for _ in 0..max_iter {
        let mut largest_change: f64 = 0.0;
        for j in 0..p {
            let denominator = squared_norms[j] + lambda * (1.0 - alpha);
            if denominator <= 0.0 {
                continue;
            }
            let column = xc.column(j);
            let old = beta[j];
            let rho = column.dot(&residual) / n + squared_norms[j] * old;
            let new = soft_threshold(rho, lambda * alpha) / denominator;
            if new != old {
                residual.scaled_add(old - new, &column);
                beta[j] = new;
                largest_change = largest_change.max((new - old).abs());
            }
        }
        if largest_change < tol {
            break;
        }
    }

    let intercept = y_mean - x_mean.dot(&beta);
    if !intercept.is_finite() || beta.iter().any(|b| !b.is_finite()) {
        return Err(LearnerError::NonFinite {
            method: METHOD.to_string(),
        });
    }
    Ok(LinearModel {
        intercept,
        coefficients: beta,
    })
}
