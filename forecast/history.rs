//! # Withdrawal History Sources
//!
//! The single entry point for raw transaction history. A [`HistorySource`] returns
//! one [`RawRecord`] per (ATM, date) up to a requested date, and reports a
//! fingerprint that changes whenever the underlying data changes so the feature
//! table cache can be keyed by it.
//!
//! The file-backed source reads comma-separated files with `polars`, validating the
//! required columns the same way every other table in this crate is validated:
//! fail early with a [`DataError`] naming the offending column.

use ahash::RandomState;
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs::{self, File};
use std::hash::{BuildHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One raw observation as delivered by the data source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub atm: String,
    pub trandate: NaiveDate,
    /// Withdrawn amount; `None` when the source has no figure for the day.
    pub usage: Option<f64>,
    /// Set when an operational fault is known to have corrupted the figure.
    pub fault: bool,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The history file '{0}' does not exist.")]
    SourceNotFound(PathBuf),
    #[error("The required column '{0}' was not found in the history file.")]
    ColumnNotFound(String),
    #[error("Missing values were found in the required column '{0}'.")]
    MissingValuesFound(String),
    #[error("Could not parse '{value}' in column '{column}' as a YYYY-MM-DD date.")]
    InvalidDate { column: String, value: String },
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
}

/// A provider of raw withdrawal history.
pub trait HistorySource: Send + Sync {
    /// Stable identity of the source, used in log lines and cache keys.
    fn id(&self) -> &str;

    /// Identity of the current content. Two calls return the same value as long as
    /// the underlying data has not changed.
    fn fingerprint(&self) -> Result<String, DataError>;

    /// All records dated on or before `as_of`.
    fn fetch(&self, as_of: NaiveDate) -> Result<Vec<RawRecord>, DataError>;
}

/// History stored as `<data_dir>/<source_id>.csv` with columns `atm`, `trandate`,
/// `usage` and an optional `fault` indicator.
#[derive(Debug, Clone)]
pub struct CsvHistory {
    source_id: String,
    path: PathBuf,
}

impl CsvHistory {
    pub fn new(source_id: &str, data_dir: &Path) -> Self {
        Self {
            source_id: source_id.to_string(),
            path: data_dir.join(format!("{source_id}.csv")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistorySource for CsvHistory {
    fn id(&self) -> &str {
        &self.source_id
    }

    fn fingerprint(&self) -> Result<String, DataError> {
        if !self.path.exists() {
            return Err(DataError::SourceNotFound(self.path.clone()));
        }
        let metadata = fs::metadata(&self.path)?;
        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(format!(
            "{}-{}-{}",
            sanitize(&self.source_id),
            metadata.len(),
            modified
        ))
    }

    fn fetch(&self, as_of: NaiveDate) -> Result<Vec<RawRecord>, DataError> {
        if !self.path.exists() {
            return Err(DataError::SourceNotFound(self.path.clone()));
        }
        log::info!("Loading withdrawal history from '{}'", self.path.display());
        let df = CsvReader::new(File::open(&self.path)?)
            .with_options(internal::read_options())
            .finish()?;

        let records = internal::records_from_frame(&df)?;
        let total = records.len();
        let kept: Vec<RawRecord> = records
            .into_iter()
            .filter(|r| r.trandate <= as_of)
            .collect();
        log::info!(
            "History '{}': {} records loaded, {} on or before {}.",
            self.source_id,
            total,
            kept.len(),
            as_of
        );
        Ok(kept)
    }
}

/// A history held in memory, for embedding callers and tests.
#[derive(Debug, Clone)]
pub struct InMemoryHistory {
    source_id: String,
    records: Vec<RawRecord>,
}

impl InMemoryHistory {
    pub fn new(source_id: &str, records: Vec<RawRecord>) -> Self {
        Self {
            source_id: source_id.to_string(),
            records,
        }
    }
}

impl HistorySource for InMemoryHistory {
    fn id(&self) -> &str {
        &self.source_id
    }

    fn fingerprint(&self) -> Result<String, DataError> {
        let mut hasher = RandomState::with_seeds(1, 2, 3, 4).build_hasher();
        for record in &self.records {
            record.atm.hash(&mut hasher);
            record.trandate.hash(&mut hasher);
            record.usage.map(f64::to_bits).hash(&mut hasher);
            record.fault.hash(&mut hasher);
        }
        Ok(format!(
            "{}-mem-{}-{:016x}",
            sanitize(&self.source_id),
            self.records.len(),
            hasher.finish()
        ))
    }

    fn fetch(&self, as_of: NaiveDate) -> Result<Vec<RawRecord>, DataError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.trandate <= as_of)
            .cloned()
            .collect())
    }
}

pub fn parse_date(column: &str, value: &str) -> Result<NaiveDate, DataError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| DataError::InvalidDate {
        column: column.to_string(),
        value: value.to_string(),
    })
}

/// Keeps identifiers safe for use inside file names.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Column extraction shared by every polars-backed table in the crate.
pub(crate) mod internal {
    use super::*;

    /// Header-row CSV options reading `atm` and `trandate` as text, so identifiers
    /// such as `007` keep their leading zeros.
    pub(crate) fn read_options() -> CsvReadOptions {
        let keys = Schema::from_iter([
            Field::new("atm".into(), DataType::String),
            Field::new("trandate".into(), DataType::String),
        ]);
        CsvReadOptions::default()
            .with_has_header(true)
            .with_schema_overwrite(Some(std::sync::Arc::new(keys)))
    }

    pub(crate) fn require_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, DataError> {
        df.column(name)
            .map_err(|_| DataError::ColumnNotFound(name.to_string()))
    }

    pub(crate) fn has_column(df: &DataFrame, name: &str) -> bool {
        df.get_column_names().iter().any(|c| c.as_str() == name)
    }

    pub(crate) fn extract_string_column(df: &DataFrame, name: &str) -> Result<Vec<String>, DataError> {
        let column = require_column(df, name)?;
        if column.null_count() > 0 {
            return Err(DataError::MissingValuesFound(name.to_string()));
        }
        let casted = column.cast(&DataType::String)?;
        let values = casted
            .str()?
            .into_iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect();
        Ok(values)
    }

    /// Numeric column with nulls preserved as `None`.
    pub(crate) fn extract_optional_f64(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, DataError> {
        let column = require_column(df, name)?;
        let casted = column.cast(&DataType::Float64).map_err(|_| DataError::ColumnWrongType {
            column_name: name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", column.dtype()),
        })?;
        // A failed cast of a text value shows up as a new null.
        if casted.null_count() > column.null_count() {
            return Err(DataError::ColumnWrongType {
                column_name: name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", column.dtype()),
            });
        }
        Ok(casted.f64()?.into_iter().collect())
    }

    pub(crate) fn records_from_frame(df: &DataFrame) -> Result<Vec<RawRecord>, DataError> {
        let atms = extract_string_column(df, "atm")?;
        let dates = extract_string_column(df, "trandate")?;
        let usage = extract_optional_f64(df, "usage")?;
        let faults = if has_column(df, "fault") {
            extract_optional_f64(df, "fault")?
        } else {
            vec![None; df.height()]
        };

        atms.into_iter()
            .zip(dates)
            .zip(usage)
            .zip(faults)
            .map(|(((atm, date), usage), fault)| {
                Ok(RawRecord {
                    atm,
                    trandate: parse_date("trandate", &date)?,
                    usage,
                    fault: fault.is_some_and(|f| f != 0.0),
                })
            })
            .collect()
    }
}
