//! Fold-local preprocessing: centering, scaling and k-nearest-neighbour imputation.
//!
//! A [`Preprocessor`] is fit on one set of rows and then applied unchanged to any
//! other rows, so held-out rows never influence their own transformation.

use crate::finite::{mean_finite, sd_finite};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

#[derive(Debug, Clone)]
pub struct Preprocessor {
    center: Array1<f64>,
    scale: Array1<f64>,
    /// Fully observed fitting rows, already standardized.
    reference: Array2<f64>,
    neighbors: usize,
}

impl Preprocessor {
    pub fn fit(x: ArrayView2<f64>, neighbors: usize) -> Self {
        let p = x.ncols();
        let mut center = Array1::<f64>::zeros(p);
        let mut scale = Array1::<f64>::ones(p);
        for (j, column) in x.axis_iter(Axis(1)).enumerate() {
            let values = column.to_vec();
            center[j] = mean_finite(&values, 0.0);
            let sd = sd_finite(&values, 1.0);
            scale[j] = if sd > 0.0 { sd } else { 1.0 };
        }

        let complete: Vec<usize> = x
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row.iter().all(|v| v.is_finite()))
            .map(|(i, _)| i)
            .collect();
        let mut reference = x.select(Axis(0), &complete);
        for mut row in reference.axis_iter_mut(Axis(0)) {
            row -= &center;
            row /= &scale;
        }

        Self {
            center,
            scale,
            reference,
            neighbors: neighbors.max(1),
        }
    }

    pub fn ncols(&self) -> usize {
        self.center.len()
    }

    /// Standardizes `x` and fills every missing entry with the mean of that column
    /// over the nearest reference rows. Without reference rows a missing entry
    /// becomes the fitted center, i.e. zero after standardization.
    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for mut row in out.axis_iter_mut(Axis(0)) {
            row -= &self.center;
            row /= &self.scale;

            let missing: Vec<usize> = (0..row.len()).filter(|&j| !row[j].is_finite()).collect();
            if missing.is_empty() {
                continue;
            }
            let nearest = self.nearest(row.view());
            for j in missing {
                let filled: Vec<f64> = nearest.iter().map(|&r| self.reference[[r, j]]).collect();
                row[j] = mean_finite(&filled, 0.0);
            }
        }
        out
    }

    /// Reference rows closest to `row` over the columns `row` observes.
    fn nearest(&self, row: ArrayView1<f64>) -> Vec<usize> {
        let mut distances: Vec<(f64, usize)> = self
            .reference
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(r, candidate)| {
                let d: f64 = row
                    .iter()
                    .zip(candidate.iter())
                    .filter(|(v, _)| v.is_finite())
                    .map(|(v, c)| (v - c).powi(2))
                    .sum();
                (d, r)
            })
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        distances
            .into_iter()
            .take(self.neighbors)
            .map(|(_, r)| r)
            .collect()
    }
}
