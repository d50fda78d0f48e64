//! # Grouped Driver
//!
//! Partitions a feature table by entity, runs the trainer and predictor for every
//! selected entity in parallel, and gathers one prediction row per table row.
//! A failing entity does not stop its siblings; it is reported next to the rows
//! of the entities that succeeded.

use crate::design::entity_design;
use crate::error::ForecastError;
use crate::history::{DATE_FORMAT, DataError};
use crate::predictor::predict;
use crate::table::{ATM, FeatureTable, TRANDATE, USAGE};
use crate::trainer::Trainer;
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use polars::prelude::*;
use rayon::prelude::*;
use std::fs::File;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

pub const USAGE_HAT: &str = "usage_hat";
pub const MODEL: &str = "model";

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub atm: String,
    pub trandate: NaiveDate,
    pub usage: Option<f64>,
    pub usage_hat: f64,
    pub model: String,
}

#[derive(Debug)]
pub struct EntityFailure {
    pub entity: String,
    pub error: ForecastError,
}

#[derive(Debug, Default)]
pub struct PredictionTable {
    pub rows: Vec<PredictionRow>,
    pub failures: Vec<EntityFailure>,
}

impl PredictionTable {
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let atm: Vec<&str> = self.rows.iter().map(|r| r.atm.as_str()).collect();
        let dates: Vec<String> = self
            .rows
            .iter()
            .map(|r| r.trandate.format(DATE_FORMAT).to_string())
            .collect();
        let usage: Vec<Option<f64>> = self.rows.iter().map(|r| r.usage).collect();
        let usage_hat: Vec<f64> = self.rows.iter().map(|r| r.usage_hat).collect();
        let model: Vec<&str> = self.rows.iter().map(|r| r.model.as_str()).collect();
        DataFrame::new(vec![
            Column::new(ATM.into(), atm),
            Column::new(TRANDATE.into(), dates),
            Column::new(USAGE.into(), usage),
            Column::new(USAGE_HAT.into(), usage_hat),
            Column::new(MODEL.into(), model),
        ])
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), DataError> {
        let mut df = self.to_frame()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
        Ok(())
    }
}

pub struct GroupedDriver {
    trainer: Arc<Trainer>,
    model_label: String,
    default_prediction: f64,
    show_progress: bool,
}

impl GroupedDriver {
    pub fn new(trainer: Arc<Trainer>, model_label: &str, default_prediction: f64) -> Self {
        Self {
            trainer,
            model_label: model_label.to_string(),
            default_prediction,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Forecasts every entity with at least one row matching `predicate` (all
    /// entities when it is `None`). Models are memoized per entity under `cache_key`,
    /// which must identify the table they are trained on.
    pub fn run(
        &self,
        table: &FeatureTable,
        predicate: Option<Expr>,
        cache_key: &str,
    ) -> Result<PredictionTable, ForecastError> {
        let selected = predicate
            .map(|p| table.entities_matching(p))
            .transpose()?;
        let groups: Vec<(String, Range<usize>)> = table
            .entity_ranges()
            .into_iter()
            .filter(|(entity, _)| selected.as_ref().is_none_or(|s| s.contains(entity)))
            .collect();
        log::info!(
            "Forecasting {} of {} entities from table '{}'.",
            groups.len(),
            table.entity_ranges().len(),
            cache_key
        );

        let pb = self.progress_bar(groups.len() as u64);
        let outcomes: Vec<(String, Result<Vec<PredictionRow>, ForecastError>)> = groups
            .into_par_iter()
            .map(|(entity, rows)| {
                let outcome = self.forecast_entity(table, &entity, rows, cache_key);
                pb.inc(1);
                (entity, outcome)
            })
            .collect();
        pb.finish_and_clear();

        let mut result = PredictionTable::default();
        for (entity, outcome) in outcomes {
            match outcome {
                Ok(rows) => result.rows.extend(rows),
                Err(error) => {
                    log::warn!("Entity '{entity}' failed: {error}");
                    result.failures.push(EntityFailure { entity, error });
                }
            }
        }
        Ok(result)
    }

    fn forecast_entity(
        &self,
        table: &FeatureTable,
        entity: &str,
        rows: Range<usize>,
        cache_key: &str,
    ) -> Result<Vec<PredictionRow>, ForecastError> {
        let design = entity_design(table, rows.clone());
        let model = self.trainer.train(
            entity,
            &design.matrix,
            design.response.view(),
            &design.train_index,
            cache_key,
        )?;
        let predictions = predict(
            entity,
            model.as_deref(),
            &design.matrix,
            self.default_prediction,
        )?;

        Ok(rows
            .zip(predictions)
            .map(|(row, usage_hat)| PredictionRow {
                atm: entity.to_string(),
                trandate: table.trandate[row],
                usage: table.usage[row],
                usage_hat,
                model: self.model_label.clone(),
            })
            .collect())
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        let draw_target = if self.show_progress {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let pb = ProgressBar::with_draw_target(Some(len), draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} entities ({eta}) {msg}",
        ) {
            pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LearnerSpec, TrainingConfig};
    use crate::learners::LearnerRegistry;
    use chrono::Duration;

    fn table() -> FeatureTable {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut t = FeatureTable::default();
        for atm in ["A", "B", "Z"] {
            for i in 0..20 {
                t.atm.push(atm.to_string());
                t.trandate.push(start + Duration::days(i));
                let usage = match atm {
                    "Z" => 0.0,
                    "A" => 100.0 + i as f64,
                    _ => 50.0 + 2.0 * i as f64,
                };
                t.usage.push(Some(usage));
                t.train.push(i < 15);
                t.fault.push(false);
            }
        }
        let seq: Vec<f64> = (0..60).map(|i| (i % 20) as f64).collect();
        t.set_numeric("seq", seq);
        t
    }

    fn driver(learners: Vec<LearnerSpec>) -> GroupedDriver {
        let config = TrainingConfig {
            learners,
            ensemble_iterations: 20,
            ..TrainingConfig::default()
        };
        let trainer = Trainer::new(config, Arc::new(LearnerRegistry::with_builtins()));
        GroupedDriver::new(Arc::new(trainer), "ensemble", 0.0)
    }

    #[test]
    fn every_row_gets_a_prediction() {
        let result = driver(vec![LearnerSpec::new("lm")])
            .run(&table(), None, "src")
            .unwrap();
        assert!(result.failures.is_empty());
        assert_eq!(result.rows.len(), 60);
        assert!(result.rows.iter().all(|r| r.model == "ensemble"));
        assert!(
            result
                .rows
                .iter()
                .filter(|r| r.atm == "Z")
                .all(|r| r.usage_hat == 0.0)
        );
        let a: Vec<&PredictionRow> = result.rows.iter().filter(|r| r.atm == "A").collect();
        assert_eq!(a.len(), 20);
        assert!(a.windows(2).all(|w| w[0].trandate < w[1].trandate));
        assert_eq!(a[19].usage_hat, 119.0);
    }

    #[test]
    fn predicate_selects_whole_entities() {
        let predicate = col(ATM).eq(lit("B"));
        let result = driver(vec![LearnerSpec::new("mean")])
            .run(&table(), Some(predicate), "src")
            .unwrap();
        assert_eq!(result.rows.len(), 20);
        assert!(result.rows.iter().all(|r| r.atm == "B"));
    }

    #[test]
    fn failures_do_not_cancel_other_entities() {
        let result = driver(vec![LearnerSpec::new("no-such-learner")])
            .run(&table(), None, "src")
            .unwrap();
        let mut failed: Vec<&str> = result.failures.iter().map(|f| f.entity.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["A", "B"]);
        assert_eq!(result.rows.len(), 20);
        assert!(result.rows.iter().all(|r| r.atm == "Z"));
    }

    #[test]
    fn predictions_are_written_as_csv() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("predictions.csv");
        let result = driver(vec![LearnerSpec::new("mean")])
            .run(&table(), None, "src")
            .unwrap();
        result.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("atm,trandate,usage,usage_hat,model"));
        assert_eq!(text.lines().count(), 61);
    }
}
