//! # Feature Builder
//!
//! Turns raw withdrawal history into a validated [`FeatureTable`]. The steps run in a
//! fixed order, each a transformation of the accumulating table:
//!
//! 1. fetch history up to `today + horizon` and complete each entity's calendar;
//! 2. flag training rows (`trandate < split_date`);
//! 3. capture the [`TruthTable`] and hide held-out usage in the working copy;
//! 4. hide fault-corrupted usage;
//! 5. calendar, payday, holiday and social-security columns;
//! 6. the seven seasonal factors;
//! 7. sequence and lag columns;
//! 8. restore true usage from the truth table;
//! 9. validate.
//!
//! Held-out usage is therefore invisible to every derived column but visible again
//! for evaluation in the finished table.

use crate::cache::Memo;
use crate::calendar::{self, CALENDAR_COLUMNS, HolidayCalendar};
use crate::config::FeatureConfig;
use crate::error::ForecastError;
use crate::faults;
use crate::history::{HistorySource, RawRecord};
use crate::seasonal::{self, SEASONAL_GROUPINGS};
use crate::sequence;
use crate::table::FeatureTable;
use ahash::AHashMap;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Parameters of one feature build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// First date treated as test data.
    pub split_date: NaiveDate,
    /// Reference date; history is fetched up to `today + horizon_days`.
    pub today: NaiveDate,
    pub horizon_days: u32,
    /// Ignore any cached table and rebuild.
    pub refresh: bool,
}

impl BuildRequest {
    pub fn as_of(&self) -> NaiveDate {
        self.today + Duration::days(i64::from(self.horizon_days))
    }
}

/// Observed usage keyed by (entity, date), captured before any value is hidden.
#[derive(Debug, Clone, Default)]
pub struct TruthTable {
    usage: AHashMap<(String, NaiveDate), Option<f64>>,
}

impl TruthTable {
    pub fn capture(table: &FeatureTable) -> Self {
        let usage = table
            .atm
            .iter()
            .zip(&table.trandate)
            .zip(&table.usage)
            .map(|((atm, &date), &usage)| ((atm.clone(), date), usage))
            .collect();
        Self { usage }
    }

    pub fn get(&self, atm: &str, date: NaiveDate) -> Option<f64> {
        self.usage
            .get(&(atm.to_string(), date))
            .copied()
            .flatten()
    }

    /// Writes the captured usage back onto `table` by key.
    pub fn restore(&self, table: &mut FeatureTable) {
        for row in 0..table.len() {
            table.usage[row] = self.get(&table.atm[row], table.trandate[row]);
        }
    }
}

/// Builds, caches and reloads feature tables.
pub struct FeatureBuilder {
    config: FeatureConfig,
    cache_dir: Option<PathBuf>,
    memo: Memo<String, Arc<FeatureTable>>,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> Self {
        Self {
            config,
            cache_dir: None,
            memo: Memo::new(),
        }
    }

    /// Persists built tables under `dir` and reuses them across runs.
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    /// Cache key of a build: the source's content fingerprint plus every input that
    /// changes the resulting table.
    pub fn fingerprint(
        &self,
        source: &dyn HistorySource,
        request: &BuildRequest,
    ) -> Result<String, ForecastError> {
        let lags: Vec<String> = self.config.lags.iter().map(|l| l.to_string()).collect();
        Ok(format!(
            "{}-s{}-a{}-l{}-w{}-z{}",
            source.fingerprint()?,
            request.split_date.format("%Y%m%d"),
            request.as_of().format("%Y%m%d"),
            lags.join("_"),
            self.config.rolling_window,
            self.config.min_zero_run
        ))
    }

    /// Returns the feature table for `request`, computing it at most once per
    /// fingerprint.
    pub fn build(
        &self,
        source: &dyn HistorySource,
        request: &BuildRequest,
    ) -> Result<Arc<FeatureTable>, ForecastError> {
        let key = self.fingerprint(source, request)?;
        if request.refresh {
            self.memo.invalidate(&key);
        }

        self.memo.get_or_try_insert_with(key.clone(), || -> Result<_, ForecastError> {
            let cache_path = self
                .cache_dir
                .as_ref()
                .map(|dir| dir.join(format!("features-{key}.csv")));

            if let Some(path) = cache_path.as_ref().filter(|p| !request.refresh && p.exists()) {
                log::info!("Reusing cached feature table '{}'.", path.display());
                let table = FeatureTable::read_csv(path, &calendar::categorical_levels())?;
                table.validate(&finite_columns())?;
                return Ok(Arc::new(table));
            }

            let table = self.compute(source, request)?;
            if let Some(path) = cache_path {
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir).map_err(crate::history::DataError::from)?;
                }
                table.write_csv(&path)?;
                log::info!("Cached feature table at '{}'.", path.display());
            }
            Ok(Arc::new(table))
        })
    }

    /// Runs the full derivation without consulting any cache.
    pub fn compute(
        &self,
        source: &dyn HistorySource,
        request: &BuildRequest,
    ) -> Result<FeatureTable, ForecastError> {
        let as_of = request.as_of();
        log::info!(
            "Building features for '{}': split {}, history through {}.",
            source.id(),
            request.split_date,
            as_of
        );

        let raw = source.fetch(as_of)?;
        let mut working = complete_calendar(raw, as_of);
        for row in 0..working.len() {
            working.train[row] = working.trandate[row] < request.split_date;
        }

        let truth = TruthTable::capture(&working);
        for row in 0..working.len() {
            if !working.train[row] {
                working.usage[row] = None;
            }
        }

        faults::detect_faults(&mut working, self.config.min_zero_run);

        let holidays = HolidayCalendar::covering(&working.trandate);
        calendar::add_dates(&mut working);
        calendar::add_paydays(&mut working, &holidays);
        calendar::add_holidays(&mut working, &holidays);
        calendar::add_social_security(&mut working, &holidays);

        for (output, grouping) in SEASONAL_GROUPINGS {
            seasonal::seasonal_factor_by(&mut working, output, &[grouping])?;
        }

        sequence::add_sequence(&mut working, &self.config);

        truth.restore(&mut working);
        working.validate(&finite_columns())?;

        let train_rows = working.train.iter().filter(|&&t| t).count();
        log::info!(
            "Feature table: {} rows ({} train, {} test), {} entities, {} feature columns.",
            working.len(),
            train_rows,
            working.len() - train_rows,
            working.entity_ranges().len(),
            working.feature_count()
        );
        Ok(working)
    }
}

/// Columns that must be finite in every finished table.
pub fn finite_columns() -> Vec<&'static str> {
    CALENDAR_COLUMNS
        .iter()
        .copied()
        .chain(SEASONAL_GROUPINGS.iter().map(|(output, _)| *output))
        .chain(std::iter::once("seq"))
        .collect()
}

/// One row per entity and day, from each entity's first record through `as_of`.
///
/// Duplicate records for a day are summed; a fault on any of them marks the day.
/// Days without a record carry no usage.
fn complete_calendar(raw: Vec<RawRecord>, as_of: NaiveDate) -> FeatureTable {
    let mut merged: BTreeMap<(String, NaiveDate), (Option<f64>, bool)> = BTreeMap::new();
    for record in raw {
        let slot = merged
            .entry((record.atm, record.trandate))
            .or_insert((None, false));
        slot.0 = match (slot.0, record.usage) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        slot.1 |= record.fault;
    }

    let mut first_seen: BTreeMap<String, NaiveDate> = BTreeMap::new();
    for (atm, date) in merged.keys() {
        first_seen.entry(atm.clone()).or_insert(*date);
    }

    let mut table = FeatureTable::default();
    for (atm, first) in first_seen {
        let mut date = first;
        while date <= as_of {
            let (usage, fault) = merged
                .get(&(atm.clone(), date))
                .copied()
                .unwrap_or((None, false));
            table.atm.push(atm.clone());
            table.trandate.push(date);
            table.usage.push(usage);
            table.train.push(false);
            table.fault.push(fault);
            date += Duration::days(1);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    fn history(days: i64) -> Vec<RawRecord> {
        let mut records = Vec::new();
        for atm in ["A", "B"] {
            for i in 0..days {
                records.push(RawRecord {
                    atm: atm.to_string(),
                    trandate: day(i),
                    usage: Some(100.0 + (i % 7) as f64 * 10.0 + if atm == "B" { 50.0 } else { 0.0 }),
                    fault: false,
                });
            }
        }
        records
    }

    fn request(split: i64, today: i64, horizon: u32) -> BuildRequest {
        BuildRequest {
            split_date: day(split),
            today: day(today),
            horizon_days: horizon,
            refresh: false,
        }
    }

    fn builder() -> FeatureBuilder {
        FeatureBuilder::new(FeatureConfig::default())
    }

    #[test]
    fn calendar_is_completed_through_the_horizon() {
        let source = InMemoryHistory::new("hist", history(30));
        let table = builder().compute(&source, &request(25, 29, 5)).unwrap();
        assert_eq!(table.len(), 2 * 35);
        assert_eq!(table.trandate[34], day(34));
        assert_eq!(table.usage[34], None);
        assert!(table.train[24]);
        assert!(!table.train[25]);
    }

    #[test]
    fn usage_is_restored_for_every_record() {
        let records = history(40);
        let source = InMemoryHistory::new("hist", records.clone());
        let table = builder().compute(&source, &request(30, 39, 0)).unwrap();
        for record in &records {
            let row = table
                .atm
                .iter()
                .zip(&table.trandate)
                .position(|(a, &d)| *a == record.atm && d == record.trandate)
                .unwrap();
            assert_eq!(table.usage[row], record.usage);
        }
    }

    #[test]
    fn held_out_usage_does_not_reach_features() {
        let records = history(60);
        let mut perturbed = records.clone();
        for record in perturbed.iter_mut().filter(|r| r.trandate >= day(45)) {
            record.usage = record.usage.map(|u| u * 13.0 + 1000.0);
        }
        let req = request(45, 59, 0);
        let original = builder()
            .compute(&InMemoryHistory::new("hist", records), &req)
            .unwrap();
        let changed = builder()
            .compute(&InMemoryHistory::new("hist", perturbed), &req)
            .unwrap();

        for (a, b) in original.numeric_columns().iter().zip(changed.numeric_columns()) {
            assert_eq!(a.name, b.name);
            for (x, y) in a.values.iter().zip(&b.values) {
                assert!(x == y || (x.is_nan() && y.is_nan()), "column {} changed", a.name);
            }
        }
        assert_ne!(original.usage, changed.usage);
    }

    #[test]
    fn duplicate_records_are_summed() {
        let records = vec![
            RawRecord { atm: "A".into(), trandate: day(0), usage: Some(5.0), fault: false },
            RawRecord { atm: "A".into(), trandate: day(0), usage: Some(7.0), fault: true },
        ];
        let table = complete_calendar(records, day(1));
        assert_eq!(table.usage, vec![Some(12.0), None]);
        assert_eq!(table.fault, vec![true, false]);
    }

    #[test]
    fn builds_are_memoized_and_cached_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = InMemoryHistory::new("hist", history(30));
        let req = request(20, 29, 3);

        let first = FeatureBuilder::new(FeatureConfig::default())
            .with_cache_dir(dir.path().to_path_buf());
        let a = first.build(&source, &req).unwrap();
        let b = first.build(&source, &req).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let second = FeatureBuilder::new(FeatureConfig::default())
            .with_cache_dir(dir.path().to_path_buf());
        let reloaded = second.build(&source, &req).unwrap();
        assert_eq!(reloaded.len(), a.len());
        assert_eq!(reloaded.usage, a.usage);
        assert_eq!(reloaded.categorical_columns(), a.categorical_columns());
        assert_eq!(reloaded.numeric("sf_wday"), a.numeric("sf_wday"));
    }
}
