//! k-nearest-neighbour regression (option `k`, default 5).

use super::{LearnerError, LearnerOptions, Learner, Regressor, check_option_names, check_shape, count_option};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

const METHOD: &str = "knn";

#[derive(Debug, Clone, Copy)]
pub struct KnnLearner;

#[derive(Debug, Clone)]
struct KnnModel {
    x: Array2<f64>,
    y: Array1<f64>,
    k: usize,
}

impl Learner for KnnLearner {
    fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        options: &LearnerOptions,
    ) -> Result<Box<dyn Regressor>, LearnerError> {
        check_option_names(METHOD, options, &["k"])?;
        let k = count_option(METHOD, options, "k", 5, 1)?;
        check_shape(METHOD, x, y, 1)?;
        Ok(Box::new(KnnModel {
            x: x.to_owned(),
            y: y.to_owned(),
            k: k.min(x.nrows()),
        }))
    }
}

impl Regressor for KnnModel {
    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.axis_iter(Axis(0))
            .map(|query| {
                let mut distances: Vec<(f64, usize)> = self
                    .x
                    .axis_iter(Axis(0))
                    .enumerate()
                    .map(|(i, row)| {
                        let d: f64 = row.iter().zip(query.iter()).map(|(a, b)| (a - b).powi(2)).sum();
                        (d, i)
                    })
                    .collect();
                distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                distances[..self.k].iter().map(|&(_, i)| self.y[i]).sum::<f64>() / self.k as f64
            })
            .collect()
    }
}
