//! # Feature Pruning
//!
//! Two passes run before any model is fit: columns that barely vary are dropped
//! first, then one column of every highly correlated pair.
//!
//! Correlations use pairwise complete observations, so a column with scattered
//! missing values still participates. A correlation that cannot be computed (fewer
//! than two shared finite rows, or no variance in the shared rows) counts as zero.

use crate::design::FeatureMatrix;
use crate::finite::mean_finite;
use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

/// Indices of columns with fewer than two finite values, or whose sample variance is
/// at most `tolerance * max(mean², 1)`.
pub fn near_zero_variance(x: ArrayView2<f64>, tolerance: f64) -> Vec<usize> {
    (0..x.ncols())
        .filter(|&j| {
            let finite: Vec<f64> = x.column(j).iter().copied().filter(|v| v.is_finite()).collect();
            if finite.len() < 2 {
                return true;
            }
            let mean = mean_finite(&finite, 0.0);
            let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / (finite.len() - 1) as f64;
            variance <= tolerance * (mean * mean).max(1.0)
        })
        .collect()
}

/// Pearson correlation of two columns over the rows where both are finite.
pub fn pairwise_correlation(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .collect();
    if pairs.len() < 2 {
        return 0.0;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut saa, mut sbb, mut sab) = (0.0, 0.0, 0.0);
    for &(x, y) in &pairs {
        let (dx, dy) = (x - mean_a, y - mean_b);
        saa += dx * dx;
        sbb += dy * dy;
        sab += dx * dy;
    }
    let r = sab / (saa * sbb).sqrt();
    if r.is_finite() { r.clamp(-1.0, 1.0) } else { 0.0 }
}

/// Symmetric correlation matrix of the columns of `x` with a unit diagonal.
pub fn correlation_matrix(x: ArrayView2<f64>) -> Array2<f64> {
    let p = x.ncols();
    let upper: Vec<Vec<f64>> = (0..p)
        .into_par_iter()
        .map(|i| {
            (i + 1..p)
                .map(|j| pairwise_correlation(x.column(i), x.column(j)))
                .collect()
        })
        .collect();

    let mut corr = Array2::<f64>::eye(p);
    for (i, row) in upper.into_iter().enumerate() {
        for (offset, r) in row.into_iter().enumerate() {
            let j = i + 1 + offset;
            corr[[i, j]] = r;
            corr[[j, i]] = r;
        }
    }
    corr
}

/// Columns to drop so that no remaining pair has |correlation| above `cutoff`.
///
/// While such a pair exists, the pair with the largest absolute correlation is taken
/// (the first one in row-major order on ties) and whichever member has the larger
/// mean absolute correlation with the other remaining columns is dropped. On equal
/// means the later column goes. Returned indices are ascending.
pub fn find_correlation(corr: &Array2<f64>, cutoff: f64) -> Vec<usize> {
    let p = corr.nrows();
    let mut remaining = vec![true; p];

    loop {
        let mut worst: Option<(usize, usize, f64)> = None;
        for i in (0..p).filter(|&i| remaining[i]) {
            for j in (i + 1..p).filter(|&j| remaining[j]) {
                let r = corr[[i, j]].abs();
                if r > cutoff && worst.is_none_or(|(_, _, best)| r > best) {
                    worst = Some((i, j, r));
                }
            }
        }
        let Some((i, j, _)) = worst else {
            break;
        };

        let mean_abs = |column: usize| {
            let others: Vec<f64> = (0..p)
                .filter(|&k| k != column && remaining[k])
                .map(|k| corr[[column, k]].abs())
                .collect();
            mean_finite(&others, 0.0)
        };
        let drop = if mean_abs(i) > mean_abs(j) { i } else { j };
        remaining[drop] = false;
    }

    (0..p).filter(|&j| !remaining[j]).collect()
}

/// Indices of columns of `x` that `find_correlation` would drop.
pub fn correlated_columns(x: ArrayView2<f64>, cutoff: f64) -> Vec<usize> {
    find_correlation(&correlation_matrix(x), cutoff)
}

/// Applies both passes to `matrix` and returns the surviving columns.
pub fn prune_features(matrix: &FeatureMatrix, tolerance: f64, cutoff: f64) -> FeatureMatrix {
    let flat = near_zero_variance(matrix.values.view(), tolerance);
    let varying = matrix.drop_columns(&flat);
    let correlated = correlated_columns(varying.values.view(), cutoff);
    log::debug!(
        "Pruned {} near-zero-variance and {} correlated columns; {} remain.",
        flat.len(),
        correlated.len(),
        varying.ncols() - correlated.len()
    );
    varying.drop_columns(&correlated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn constant_and_sparse_columns_have_near_zero_variance() {
        let x = array![
            [1.0, 5.0, f64::NAN, 1.0],
            [2.0, 5.0, f64::NAN, 1.0],
            [3.0, 5.0, 4.0, 1.0 + 1e-12],
        ];
        assert_eq!(near_zero_variance(x.view(), 1e-8), vec![1, 2, 3]);
    }

    #[test]
    fn correlation_uses_pairwise_complete_rows() {
        let x = array![
            [1.0, 2.0, 7.0],
            [2.0, 4.0, 7.0],
            [f64::NAN, 100.0, 7.0],
            [3.0, 6.0, 7.0],
        ];
        let corr = correlation_matrix(x.view());
        assert_abs_diff_eq!(corr[[0, 1]], 1.0, epsilon = 1e-12);
        assert_eq!(corr[[0, 2]], 0.0);
        assert_eq!(corr[[2, 2]], 1.0);
    }

    #[test]
    fn drops_the_more_broadly_correlated_member() {
        let corr = array![
            [1.0, 0.95, 0.5],
            [0.95, 1.0, 0.1],
            [0.5, 0.1, 1.0],
        ];
        assert_eq!(find_correlation(&corr, 0.9), vec![0]);
    }

    #[test]
    fn ties_drop_the_later_column() {
        let corr = array![[1.0, 0.99], [0.99, 1.0]];
        assert_eq!(find_correlation(&corr, 0.9), vec![1]);
    }

    #[test]
    fn pruning_is_idempotent() {
        let x = array![
            [1.0, 2.1, 0.3, 9.0],
            [2.0, 3.9, 0.1, 8.0],
            [3.0, 6.2, 0.7, 8.5],
            [4.0, 8.1, 0.2, 7.0],
            [5.0, 9.8, 0.9, 7.5],
        ];
        let matrix = FeatureMatrix::new(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            x,
        );
        let once = prune_features(&matrix, 1e-8, 0.9);
        assert!(once.ncols() < matrix.ncols());
        let twice = prune_features(&once, 1e-8, 0.9);
        assert_eq!(once, twice);
    }
}
