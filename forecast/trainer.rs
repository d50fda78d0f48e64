//! # Per-Entity Trainer
//!
//! Fits one cross-validated ensemble per entity:
//!
//! 1. drop near-zero-variance columns, then one column of every highly correlated pair;
//! 2. keep the training rows whose usage is known;
//! 3. skip entities with nothing to learn (no known usage, or only zeros);
//! 4. cross-validate every configured learner on shared folds, dropping those that fail;
//! 5. blend the survivors with the greedy weight search.
//!
//! Results are memoized per (cache key, entity). Failures are not memoized.

use crate::cache::Memo;
use crate::config::TrainingConfig;
use crate::cv::{Folds, Validated, cross_validate};
use crate::design::FeatureMatrix;
use crate::ensemble::{EnsembleMember, FittedEnsemble, greedy_weights};
use crate::error::ForecastError;
use crate::finite::{max_finite, sd_finite};
use crate::learners::LearnerRegistry;
use crate::prune::prune_features;
use ndarray::{Array2, ArrayView1, Axis};
use std::sync::Arc;

pub type TrainedModel = Option<Arc<FittedEnsemble>>;

pub struct Trainer {
    config: TrainingConfig,
    registry: Arc<LearnerRegistry>,
    cache: Memo<(String, String), TrainedModel>,
}

impl Trainer {
    pub fn new(config: TrainingConfig, registry: Arc<LearnerRegistry>) -> Self {
        Self {
            config,
            registry,
            cache: Memo::new(),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Number of memoized (cache key, entity) results.
    pub fn cached_models(&self) -> usize {
        self.cache.len()
    }

    /// Forgets every model memoized under `cache_key`.
    pub fn forget(&self, cache_key: &str) {
        self.cache.retain(|(key, _)| key != cache_key);
    }

    /// Trains, or returns the memoized result for, `entity` under `cache_key`.
    ///
    /// `Ok(None)` means the entity has nothing to learn from and should receive the
    /// default prediction.
    pub fn train(
        &self,
        entity: &str,
        matrix: &FeatureMatrix,
        response: ArrayView1<f64>,
        train_index: &[usize],
        cache_key: &str,
    ) -> Result<TrainedModel, ForecastError> {
        if response.len() != matrix.nrows() {
            return Err(ForecastError::ShapeMismatch {
                entity: entity.to_string(),
                response: response.len(),
                matrix: matrix.nrows(),
            });
        }
        self.cache
            .get_or_try_insert_with((cache_key.to_string(), entity.to_string()), || {
                self.fit(entity, matrix, response, train_index)
            })
    }

    /// Trains without consulting the memo.
    pub fn fit(
        &self,
        entity: &str,
        matrix: &FeatureMatrix,
        response: ArrayView1<f64>,
        train_index: &[usize],
    ) -> Result<TrainedModel, ForecastError> {
        let config = &self.config;
        log::info!(
            "Entity '{}': pre-processing {} rows x {} columns.",
            entity,
            matrix.nrows(),
            matrix.ncols()
        );
        let pruned = prune_features(matrix, config.nzv_tolerance, config.correlation_cutoff);

        let known: Vec<usize> = train_index
            .iter()
            .copied()
            .filter(|&row| row < response.len() && response[row].is_finite())
            .collect();
        if known.is_empty() {
            log::info!("Entity '{entity}': no training rows with known usage; no model.");
            return Ok(None);
        }
        let y = response.select(Axis(0), &known);
        if y.iter().all(|&v| v == 0.0) {
            log::info!("Entity '{entity}': all known training usage is zero; no model.");
            return Ok(None);
        }
        let x = pruned.values.select(Axis(0), &known);
        log::info!(
            "Entity '{}': training on {} rows x {} columns.",
            entity,
            x.nrows(),
            x.ncols()
        );

        let y_values = y.to_vec();
        let upper_bound = (max_finite(&y_values, 0.0)
            + config.upper_bound_sds * sd_finite(&y_values, 0.0))
        .max(0.0);

        let folds = Folds::assign(known.len(), config.folds, config.fold_seed).map_err(|e| {
            log::info!("Entity '{entity}': cannot cross-validate: {e}");
            ForecastError::TrainingFailure {
                entity: entity.to_string(),
            }
        })?;

        let mut survivors: Vec<(String, Validated)> = Vec::new();
        for spec in &config.learners {
            let outcome = self.registry.resolve(&spec.method).and_then(|learner| {
                cross_validate(
                    learner.as_ref(),
                    &spec.options,
                    x.view(),
                    y.view(),
                    &folds,
                    config.impute_neighbors,
                    upper_bound,
                )
            });
            match outcome {
                Ok(validated) => {
                    log::debug!(
                        "Entity '{}': learner '{}' cross-validated RMSE {:.4}.",
                        entity,
                        spec.method,
                        validated.rmse
                    );
                    survivors.push((spec.method.clone(), validated));
                }
                Err(e) => log::info!("Entity '{}': dropping learner '{}': {}", entity, spec.method, e),
            }
        }
        log::info!(
            "Entity '{}': {} of {} learners survived.",
            entity,
            survivors.len(),
            config.learners.len()
        );
        if survivors.is_empty() {
            return Err(ForecastError::TrainingFailure {
                entity: entity.to_string(),
            });
        }

        let out_of_fold =
            Array2::from_shape_fn((y.len(), survivors.len()), |(i, j)| survivors[j].1.out_of_fold[i]);
        let (weights, rmse) = greedy_weights(out_of_fold.view(), y.view(), config.ensemble_iterations);

        let members = survivors
            .into_iter()
            .map(|(method, validated)| EnsembleMember {
                method,
                features: pruned.names.clone(),
                model: validated.model,
                cv_rmse: validated.rmse,
            })
            .collect();
        let ensemble = FittedEnsemble {
            entity: entity.to_string(),
            members,
            weights,
            rmse,
        };
        log::info!(
            "Entity '{}': ensemble RMSE {:.4} with weights [{}].",
            entity,
            ensemble.rmse,
            ensemble.weight_breakdown()
        );
        Ok(Some(Arc::new(ensemble)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LearnerSpec;
    use ndarray::{Array1, array};

    fn matrix() -> (FeatureMatrix, Array1<f64>) {
        let n = 30;
        let values = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 { i as f64 } else { ((i * 5) % 7) as f64 }
        });
        let response = values.column(0).mapv(|v| 10.0 + 2.0 * v);
        (
            FeatureMatrix::new(vec!["seq".into(), "noise".into()], values),
            response,
        )
    }

    fn trainer(learners: Vec<LearnerSpec>) -> Trainer {
        let config = TrainingConfig {
            learners,
            ensemble_iterations: 50,
            ..TrainingConfig::default()
        };
        Trainer::new(config, Arc::new(LearnerRegistry::with_builtins()))
    }

    #[test]
    fn fits_an_ensemble_and_memoizes_it() {
        let (m, y) = matrix();
        let train: Vec<usize> = (0..25).collect();
        let t = trainer(TrainingConfig::default().learners);
        let first = t.train("A", &m, y.view(), &train, "src").unwrap().unwrap();
        assert_eq!(first.weights.iter().sum::<f64>(), 50.0);
        assert_eq!(first.features(), ["seq".to_string(), "noise".to_string()]);
        let again = t.train("A", &m, y.view(), &train, "src").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(t.cached_models(), 1);
    }

    #[test]
    fn cache_keys_separate_and_forget_models() {
        let (m, y) = matrix();
        let t = trainer(vec![LearnerSpec::new("lm")]);
        let early: Vec<usize> = (0..10).collect();
        let late: Vec<usize> = (0..25).collect();
        let first = t.train("A", &m, y.view(), &early, "table-early").unwrap().unwrap();
        let second = t.train("A", &m, y.view(), &late, "table-late").unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(t.cached_models(), 2);

        t.forget("table-early");
        assert_eq!(t.cached_models(), 1);
    }

    #[test]
    fn entities_without_signal_get_no_model() {
        let (m, y) = matrix();
        let t = trainer(vec![LearnerSpec::new("mean")]);
        assert!(t.train("A", &m, y.view(), &[], "src").unwrap().is_none());

        let zeros = Array1::<f64>::zeros(y.len());
        let train: Vec<usize> = (0..25).collect();
        assert!(t.train("B", &m, zeros.view(), &train, "src").unwrap().is_none());

        let unknown = Array1::<f64>::from_elem(y.len(), f64::NAN);
        assert!(t.train("C", &m, unknown.view(), &train, "src").unwrap().is_none());
    }

    #[test]
    fn failing_learners_are_dropped() {
        let (m, y) = matrix();
        let train: Vec<usize> = (0..25).collect();
        let t = trainer(vec![LearnerSpec::new("gbm"), LearnerSpec::new("lm")]);
        let ensemble = t.train("A", &m, y.view(), &train, "src").unwrap().unwrap();
        assert_eq!(ensemble.members.len(), 1);
        assert_eq!(ensemble.members[0].method, "lm");
    }

    #[test]
    fn no_surviving_learner_is_a_training_failure() {
        let (m, y) = matrix();
        let train: Vec<usize> = (0..25).collect();
        let t = trainer(vec![LearnerSpec::new("knn").with_option("k", 0.5)]);
        let result = t.train("A", &m, y.view(), &train, "src");
        assert!(matches!(result, Err(ForecastError::TrainingFailure { entity }) if entity == "A"));
        assert_eq!(t.cached_models(), 0);
    }

    #[test]
    fn negative_usage_trains_without_panicking() {
        let (m, _) = matrix();
        let negative = Array1::<f64>::from_elem(30, -5.0);
        let train: Vec<usize> = (0..20).collect();
        let t = trainer(vec![LearnerSpec::new("mean")]);
        let ensemble = t.train("A", &m, negative.view(), &train, "src").unwrap().unwrap();
        assert!(ensemble.predict(m.values.view()).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn response_length_must_match_the_matrix() {
        let (m, _) = matrix();
        let t = trainer(vec![LearnerSpec::new("mean")]);
        let result = t.train("A", &m, array![1.0, 2.0].view(), &[0], "src");
        assert!(matches!(result, Err(ForecastError::ShapeMismatch { response: 2, matrix: 30, .. })));
    }
}
