//! Least squares and ridge regression via the normal equations.

use super::{
    LearnerError, LearnerOptions, Learner, Regressor, bounded_option, check_option_names,
    check_shape,
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::Solve;

/// Ridge penalty used by plain least squares to keep the system solvable when
/// columns are collinear.
const LEAST_SQUARES_JITTER: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
}

impl Regressor for LinearModel {
    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.dot(&self.coefficients) + self.intercept
    }
}

/// `lm` when built with [`LinearLearner::least_squares`], `ridge` (option `lambda`)
/// when built with [`LinearLearner::ridge`]. The intercept is never penalized.
#[derive(Debug, Clone, Copy)]
pub struct LinearLearner {
    penalized: bool,
}

impl LinearLearner {
    pub fn least_squares() -> Self {
        Self { penalized: false }
    }

    pub fn ridge() -> Self {
        Self { penalized: true }
    }

    fn method(&self) -> &'static str {
        if self.penalized { "ridge" } else { "lm" }
    }
}

impl Learner for LinearLearner {
    fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        options: &LearnerOptions,
    ) -> Result<Box<dyn Regressor>, LearnerError> {
        let method = self.method();
        let lambda = if self.penalized {
            check_option_names(method, options, &["lambda"])?;
            bounded_option(method, options, "lambda", 1.0, 0.0, f64::MAX)?
        } else {
            check_option_names(method, options, &[])?;
            0.0
        };
        check_shape(method, x, y, 1)?;
        Ok(Box::new(fit_penalized(method, x, y, lambda)?))
    }
}

/// Minimizes `||y - b0 - X b||² / n + lambda ||b||²`.
pub(crate) fn fit_penalized(
    method: &str,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    lambda: f64,
) -> Result<LinearModel, LearnerError> {
    let n = x.nrows() as f64;
    let p = x.ncols();
    let y_mean = y.sum() / n;
    if p == 0 {
        return Ok(LinearModel {
            intercept: y_mean,
            coefficients: Array1::zeros(0),
        });
    }

    let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(p));
    let xc = &x - &x_mean;
    let yc = &y - y_mean;

    let penalty = (lambda * n).max(LEAST_SQUARES_JITTER * n);
    let gram: Array2<f64> = xc.t().dot(&xc) + Array2::<f64>::eye(p) * penalty;
    let rhs = xc.t().dot(&yc);
    let coefficients = gram.solve(&rhs)?;

    let intercept = y_mean - x_mean.dot(&coefficients);
    if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
        return Err(LearnerError::NonFinite {
            method: method.to_string(),
        });
    }
    Ok(LinearModel {
        intercept,
        coefficients,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learners::test_support::linear_data;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn least_squares_recovers_a_linear_signal() {
        let (x, y) = linear_data();
        let model = fit_penalized("lm", x.view(), y.view(), 0.0).unwrap();
        assert_abs_diff_eq!(model.intercept, 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(model.coefficients[0], 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(model.coefficients[1], -1.0, epsilon = 1e-5);
    }

    #[test]
    fn ridge_shrinks_towards_zero() {
        let (x, y) = linear_data();
        let mut options = LearnerOptions::new();
        options.insert("lambda".to_string(), 10.0);
        let ridge = LinearLearner::ridge().fit(x.view(), y.view(), &options).unwrap();
        let lm = LinearLearner::least_squares()
            .fit(x.view(), y.view(), &LearnerOptions::new())
            .unwrap();
        let probe = array![[10.0, 0.0]];
        assert!(ridge.predict(probe.view())[0] < lm.predict(probe.view())[0]);
    }

    #[test]
    fn zero_columns_fit_the_mean() {
        let x = Array2::<f64>::zeros((3, 0));
        let model = fit_penalized("lm", x.view(), array![1.0, 2.0, 6.0].view(), 0.0).unwrap();
        assert_eq!(model.predict(Array2::<f64>::zeros((2, 0)).view()), array![3.0, 3.0]);
    }

    #[test]
    fn least_squares_has_no_options() {
        let (x, y) = linear_data();
        let mut options = LearnerOptions::new();
        options.insert("lambda".to_string(), 1.0);
        assert!(matches!(
            LinearLearner::least_squares().fit(x.view(), y.view(), &options),
            Err(LearnerError::InvalidOption { .. })
        ));
    }
}
