use super::{LearnerError, LearnerOptions, Learner, Regressor, check_option_names, check_shape};
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Intercept-only model: predicts the training mean everywhere.
#[derive(Debug, Clone, Copy)]
pub struct MeanLearner;

#[derive(Debug, Clone)]
struct MeanModel {
    mean: f64,
}

impl Learner for MeanLearner {
    fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        options: &LearnerOptions,
    ) -> Result<Box<dyn Regressor>, LearnerError> {
        check_option_names("mean", options, &[])?;
        check_shape("mean", x, y, 1)?;
        Ok(Box::new(MeanModel {
            mean: y.sum() / y.len() as f64,
        }))
    }
}

impl Regressor for MeanModel {
    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        Array1::from_elem(x.nrows(), self.mean)
    }
}
