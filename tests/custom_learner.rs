use atmcast::config::LearnerSpec;
use atmcast::learners::{Learner, LearnerError, LearnerOptions, LearnerRegistry, Regressor};
use atmcast::{BuildRequest, ForecastConfig, InMemoryHistory, Pipeline, RawRecord};
use chrono::{Duration, NaiveDate};
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::sync::Arc;

#[derive(Debug)]
struct Fixed(f64);

impl Regressor for Fixed {
    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        Array1::from_elem(x.nrows(), self.0)
    }
}

/// Predicts the largest training response everywhere.
struct MaxLearner;

impl Learner for MaxLearner {
    fn fit(
        &self,
        _x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        _options: &LearnerOptions,
    ) -> Result<Box<dyn Regressor>, LearnerError> {
        let max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(Box::new(Fixed(max)))
    }
}

fn records() -> Vec<RawRecord> {
    let start = NaiveDate::from_ymd_opt(2023, 9, 1).unwrap();
    (0..40)
        .map(|i| RawRecord {
            atm: "north".to_string(),
            trandate: start + Duration::days(i),
            usage: Some(if i % 2 == 0 { 100.0 } else { 140.0 }),
            fault: false,
        })
        .collect()
}

#[test]
fn registered_learners_are_used_by_name() {
    let mut registry = LearnerRegistry::with_builtins();
    registry.register("max", Arc::new(MaxLearner));

    let mut config = ForecastConfig::default();
    config.training.learners = vec![LearnerSpec::new("max")];
    config.training.ensemble_iterations = 10;
    let pipeline = Pipeline::new(config, registry, None).unwrap();

    let start = NaiveDate::from_ymd_opt(2023, 9, 1).unwrap();
    let request = BuildRequest {
        split_date: start + Duration::days(30),
        today: start + Duration::days(39),
        horizon_days: 0,
        refresh: false,
    };
    let history = InMemoryHistory::new("memory", records());
    let predictions = pipeline.forecast(&history, &request, &[]).unwrap();

    assert_eq!(predictions.rows.len(), 40);
    assert!(predictions.rows.iter().all(|r| r.usage_hat == 140.0));
}
