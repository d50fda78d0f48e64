//! End-to-end wiring: history source to feature table to predictions.

use crate::config::ForecastConfig;
use crate::driver::{GroupedDriver, PredictionTable};
use crate::error::ForecastError;
use crate::features::{BuildRequest, FeatureBuilder};
use crate::history::HistorySource;
use crate::learners::LearnerRegistry;
use crate::table::{ATM, FeatureTable};
use crate::trainer::Trainer;
use polars::prelude::{Expr, col, lit};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory holding cached feature tables for sources under `data_dir`.
pub fn cache_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("cache")
}

/// A predicate keeping the rows of any of `entities`; `None` keeps everything.
pub fn entity_predicate(entities: &[String]) -> Option<Expr> {
    entities
        .iter()
        .map(|id| col(ATM).eq(lit(id.clone())))
        .reduce(|acc, next| acc.or(next))
}

pub struct Pipeline {
    builder: FeatureBuilder,
    trainer: Arc<Trainer>,
    driver: GroupedDriver,
}

impl Pipeline {
    pub fn new(
        config: ForecastConfig,
        registry: LearnerRegistry,
        feature_cache: Option<PathBuf>,
    ) -> Result<Self, ForecastError> {
        config.validate()?;
        let mut builder = FeatureBuilder::new(config.features.clone());
        if let Some(dir) = feature_cache {
            builder = builder.with_cache_dir(dir);
        }
        let trainer = Arc::new(Trainer::new(config.training.clone(), Arc::new(registry)));
        let driver = GroupedDriver::new(
            Arc::clone(&trainer),
            &config.model_label,
            config.default_prediction,
        )
        .with_progress(config.show_progress);
        Ok(Self {
            builder,
            trainer,
            driver,
        })
    }

    pub fn features(
        &self,
        source: &dyn HistorySource,
        request: &BuildRequest,
    ) -> Result<Arc<FeatureTable>, ForecastError> {
        self.builder.build(source, request)
    }

    /// Builds (or reloads) the feature table and forecasts the selected entities,
    /// all of them when `entities` is empty.
    ///
    /// Models are memoized under the table's fingerprint, so a new split date or
    /// changed history trains afresh. A refresh also retrains.
    pub fn forecast(
        &self,
        source: &dyn HistorySource,
        request: &BuildRequest,
        entities: &[String],
    ) -> Result<PredictionTable, ForecastError> {
        let key = self.builder.fingerprint(source, request)?;
        if request.refresh {
            self.trainer.forget(&key);
        }
        let table = self.features(source, request)?;
        self.driver.run(&table, entity_predicate(entities), &key)
    }
}
