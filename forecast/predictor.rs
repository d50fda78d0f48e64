//! Turns a fitted ensemble, or its absence, into integer usage predictions.

use crate::design::FeatureMatrix;
use crate::ensemble::FittedEnsemble;
use crate::error::ForecastError;
use crate::finite::{max_finite, mean_finite, min_finite, true_median};
use ndarray::Array1;

/// Predicts every row of `matrix` for `entity`.
///
/// Without an ensemble every row gets `default`. Otherwise the matrix is narrowed to
/// the columns the ensemble was trained on, the blended predictions are rounded to
/// whole units, and any value that is still not finite is replaced by `default`.
pub fn predict(
    entity: &str,
    ensemble: Option<&FittedEnsemble>,
    matrix: &FeatureMatrix,
    default: f64,
) -> Result<Array1<f64>, ForecastError> {
    let Some(ensemble) = ensemble else {
        log::info!(
            "Entity '{}': no model, predicting {} for all {} rows.",
            entity,
            default,
            matrix.nrows()
        );
        return Ok(Array1::from_elem(matrix.nrows(), default));
    };

    let features = matrix
        .select_named(ensemble.features())
        .map_err(|feature| ForecastError::MissingFeature {
            entity: entity.to_string(),
            feature,
        })?;
    log::info!(
        "Entity '{}': predicting {} rows x {} columns.",
        entity,
        features.nrows(),
        features.ncols()
    );

    let mut replaced = 0;
    let predictions = ensemble.predict(features.values.view()).mapv(|v| {
        let rounded = v.round();
        if rounded.is_finite() {
            rounded
        } else {
            replaced += 1;
            default
        }
    });
    if replaced > 0 {
        log::warn!("Entity '{entity}': {replaced} non-finite predictions replaced by {default}.");
    }

    let values = predictions.to_vec();
    log::info!(
        "Entity '{}': predictions min {} / median {} / mean {:.2} / max {}.",
        entity,
        min_finite(&values, f64::NAN),
        true_median(&values, f64::NAN),
        mean_finite(&values, f64::NAN),
        max_finite(&values, f64::NAN)
    );
    Ok(predictions)
}
