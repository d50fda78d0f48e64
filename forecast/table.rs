//! # The Feature Table
//!
//! A column store with one row per (ATM, date), sorted by ATM and then by date so
//! every entity occupies one contiguous block of rows. Key columns are typed;
//! derived features are kept as ordered, named columns so the order in which the
//! builder appends them is the order in which they reach the design matrix.
//!
//! Missing numeric feature values are NaN. Missing usage is `None`.
//!
//! The table converts to and from a polars `DataFrame`, which is how it is cached to
//! disk and how entity-subset predicates are evaluated.

use crate::history::{DataError, internal, parse_date, DATE_FORMAT};
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::ops::Range;
use std::path::Path;
use thiserror::Error;

pub const ATM: &str = "atm";
pub const TRANDATE: &str = "trandate";
pub const USAGE: &str = "usage";
pub const TRAIN: &str = "train";
pub const FAULT: &str = "fault";

const KEY_COLUMNS: [&str; 5] = [ATM, TRANDATE, USAGE, TRAIN, FAULT];

/// Structural problems that make a feature table unsafe to train on.
#[derive(Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("The feature table has no rows.")]
    NoRows,
    #[error("The feature table has no feature columns.")]
    NoFeatures,
    #[error("The required column '{0}' is absent from the feature table.")]
    MissingColumn(String),
    #[error("Column '{column}' has {found} rows but the table has {expected}.")]
    LengthMismatch {
        column: String,
        found: usize,
        expected: usize,
    },
    #[error("Column '{column}' must be finite but holds {value} at row {row}.")]
    NonFinite { column: String, row: usize, value: f64 },
    #[error("Rows are not sorted by (atm, trandate) at row {0}.")]
    Unsorted(usize),
}

/// A categorical column stored as level codes.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalColumn {
    pub name: String,
    /// Levels in their natural order; the first one is the reference level.
    pub levels: Vec<String>,
    pub codes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericColumn {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub atm: Vec<String>,
    pub trandate: Vec<NaiveDate>,
    pub usage: Vec<Option<f64>>,
    pub train: Vec<bool>,
    pub fault: Vec<bool>,
    pub(crate) numeric: Vec<NumericColumn>,
    pub(crate) categorical: Vec<CategoricalColumn>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.atm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atm.is_empty()
    }

    /// Appends a numeric column, replacing any existing column of the same name.
    pub fn set_numeric(&mut self, name: &str, values: Vec<f64>) {
        match self.numeric.iter_mut().find(|c| c.name == name) {
            Some(column) => column.values = values,
            None => self.numeric.push(NumericColumn {
                name: name.to_string(),
                values,
            }),
        }
    }

    pub fn set_categorical(&mut self, name: &str, levels: Vec<String>, codes: Vec<usize>) {
        let column = CategoricalColumn {
            name: name.to_string(),
            levels,
            codes,
        };
        match self.categorical.iter_mut().find(|c| c.name == name) {
            Some(existing) => *existing = column,
            None => self.categorical.push(column),
        }
    }

    pub fn numeric(&self, name: &str) -> Option<&[f64]> {
        self.numeric
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn numeric_columns(&self) -> &[NumericColumn] {
        &self.numeric
    }

    pub fn categorical_columns(&self) -> &[CategoricalColumn] {
        &self.categorical
    }

    pub fn feature_count(&self) -> usize {
        self.numeric.len() + self.categorical.len()
    }

    /// Usage as an `f64` series with NaN for unknown values.
    pub fn usage_or_nan(&self) -> Vec<f64> {
        self.usage.iter().map(|u| u.unwrap_or(f64::NAN)).collect()
    }

    /// Contiguous row ranges of every entity, in table order.
    pub fn entity_ranges(&self) -> Vec<(String, Range<usize>)> {
        let mut ranges: Vec<(String, Range<usize>)> = Vec::new();
        for (row, atm) in self.atm.iter().enumerate() {
            match ranges.last_mut() {
                Some((current, range)) if current == atm => range.end = row + 1,
                _ => ranges.push((atm.clone(), row..row + 1)),
            }
        }
        ranges
    }

    /// Sorts rows by (atm, trandate), carrying every column along.
    pub fn sort_rows(&mut self) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| {
            self.atm[a]
                .cmp(&self.atm[b])
                .then(self.trandate[a].cmp(&self.trandate[b]))
        });
        if order.iter().enumerate().all(|(i, &j)| i == j) {
            return;
        }
        self.atm = order.iter().map(|&i| self.atm[i].clone()).collect();
        self.trandate = order.iter().map(|&i| self.trandate[i]).collect();
        self.usage = order.iter().map(|&i| self.usage[i]).collect();
        self.train = order.iter().map(|&i| self.train[i]).collect();
        self.fault = order.iter().map(|&i| self.fault[i]).collect();
        for column in &mut self.numeric {
            column.values = order.iter().map(|&i| column.values[i]).collect();
        }
        for column in &mut self.categorical {
            column.codes = order.iter().map(|&i| column.codes[i]).collect();
        }
    }

    /// Checks the structural contract every downstream consumer relies on.
    ///
    /// `finite_columns` names numeric columns that may hold no NaN or infinity.
    pub fn validate(&self, finite_columns: &[&str]) -> Result<(), SchemaError> {
        let n = self.len();
        if n == 0 {
            return Err(SchemaError::NoRows);
        }
        if self.feature_count() == 0 {
            return Err(SchemaError::NoFeatures);
        }

        let key_lengths = [
            (TRANDATE, self.trandate.len()),
            (USAGE, self.usage.len()),
            (TRAIN, self.train.len()),
            (FAULT, self.fault.len()),
        ];
        for (column, found) in key_lengths {
            if found != n {
                return Err(SchemaError::LengthMismatch {
                    column: column.to_string(),
                    found,
                    expected: n,
                });
            }
        }
        for column in &self.numeric {
            if column.values.len() != n {
                return Err(SchemaError::LengthMismatch {
                    column: column.name.clone(),
                    found: column.values.len(),
                    expected: n,
                });
            }
        }
        for column in &self.categorical {
            if column.codes.len() != n {
                return Err(SchemaError::LengthMismatch {
                    column: column.name.clone(),
                    found: column.codes.len(),
                    expected: n,
                });
            }
        }

        for &name in finite_columns {
            let values = self
                .numeric(name)
                .ok_or_else(|| SchemaError::MissingColumn(name.to_string()))?;
            if let Some((row, &value)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
                return Err(SchemaError::NonFinite {
                    column: name.to_string(),
                    row,
                    value,
                });
            }
        }

        for row in 1..n {
            let previous = (&self.atm[row - 1], self.trandate[row - 1]);
            if previous >= (&self.atm[row], self.trandate[row]) {
                return Err(SchemaError::Unsorted(row));
            }
        }
        Ok(())
    }

    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let mut columns: Vec<Column> = Vec::with_capacity(5 + self.feature_count());
        columns.push(Column::new(ATM.into(), self.atm.clone()));
        let dates: Vec<String> = self
            .trandate
            .iter()
            .map(|d| d.format(DATE_FORMAT).to_string())
            .collect();
        columns.push(Column::new(TRANDATE.into(), dates));
        columns.push(Column::new(USAGE.into(), self.usage.clone()));
        columns.push(Column::new(TRAIN.into(), self.train.clone()));
        columns.push(Column::new(FAULT.into(), self.fault.clone()));
        for column in &self.numeric {
            let values: Vec<Option<f64>> = column
                .values
                .iter()
                .map(|&v| if v.is_nan() { None } else { Some(v) })
                .collect();
            columns.push(Column::new(column.name.as_str().into(), values));
        }
        for column in &self.categorical {
            let labels: Vec<String> = column
                .codes
                .iter()
                .map(|&code| column.levels[code].clone())
                .collect();
            columns.push(Column::new(column.name.as_str().into(), labels));
        }
        DataFrame::new(columns)
    }

    /// Rebuilds a table from a frame written by [`FeatureTable::to_frame`].
    ///
    /// Categorical levels cannot be recovered from the labels alone, so the caller
    /// supplies them by column name.
    pub fn from_frame(df: &DataFrame, levels: &[(&str, Vec<String>)]) -> Result<Self, DataError> {
        let atm = internal::extract_string_column(df, ATM)?;
        let trandate = internal::extract_string_column(df, TRANDATE)?
            .iter()
            .map(|d| parse_date(TRANDATE, d))
            .collect::<Result<Vec<_>, _>>()?;
        let usage = internal::extract_optional_f64(df, USAGE)?;
        let train = flag_column(df, TRAIN)?;
        let fault = flag_column(df, FAULT)?;

        let mut table = FeatureTable {
            atm,
            trandate,
            usage,
            train,
            fault,
            ..Default::default()
        };

        for name in df.get_column_names() {
            let name = name.as_str();
            if KEY_COLUMNS.contains(&name) {
                continue;
            }
            if let Some((_, column_levels)) = levels.iter().find(|(n, _)| *n == name) {
                let labels = internal::extract_string_column(df, name)?;
                let codes = labels
                    .iter()
                    .map(|label| {
                        column_levels.iter().position(|l| l == label).ok_or_else(|| {
                            DataError::ColumnWrongType {
                                column_name: name.to_string(),
                                expected_type: "known categorical level",
                                found_type: label.clone(),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                table.set_categorical(name, column_levels.clone(), codes);
            } else {
                let values = internal::extract_optional_f64(df, name)?
                    .into_iter()
                    .map(|v| v.unwrap_or(f64::NAN))
                    .collect();
                table.set_numeric(name, values);
            }
        }
        Ok(table)
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), DataError> {
        let mut df = self.to_frame()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
        Ok(())
    }

    pub fn read_csv(path: &Path, levels: &[(&str, Vec<String>)]) -> Result<Self, DataError> {
        let df = CsvReader::new(File::open(path)?)
            .with_options(internal::read_options())
            .finish()?;
        Self::from_frame(&df, levels)
    }

    /// Entities owning at least one row that satisfies `predicate`.
    pub fn entities_matching(&self, predicate: Expr) -> Result<HashSet<String>, DataError> {
        let filtered = self.to_frame()?.lazy().filter(predicate).collect()?;
        Ok(internal::extract_string_column(&filtered, ATM)?
            .into_iter()
            .collect())
    }
}

fn flag_column(df: &DataFrame, name: &str) -> Result<Vec<bool>, DataError> {
    Ok(internal::extract_optional_f64(df, name)?
        .into_iter()
        .map(|v| v.is_some_and(|f| f != 0.0))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn sample_table() -> FeatureTable {
        let mut table = FeatureTable {
            atm: vec!["A".into(), "A".into(), "B".into()],
            trandate: vec![day(1), day(2), day(1)],
            usage: vec![Some(10.0), None, Some(3.5)],
            train: vec![true, false, true],
            fault: vec![false, false, true],
            ..Default::default()
        };
        table.set_numeric("seq", vec![0.0, 1.0, 0.0]);
        table.set_numeric("lag_7", vec![f64::NAN, 10.0, f64::NAN]);
        table.set_categorical(
            "wday_label",
            vec!["Mon".into(), "Tue".into(), "Wed".into()],
            vec![2, 0, 2],
        );
        table
    }

    #[test]
    fn entity_ranges_are_contiguous() {
        let ranges = sample_table().entity_ranges();
        assert_eq!(ranges, vec![("A".to_string(), 0..2), ("B".to_string(), 2..3)]);
    }

    #[test]
    fn validate_flags_non_finite_required_columns() {
        let table = sample_table();
        assert_eq!(table.validate(&["seq"]), Ok(()));
        assert!(matches!(
            table.validate(&["lag_7"]),
            Err(SchemaError::NonFinite { ref column, row: 0, .. }) if column == "lag_7"
        ));
        assert_eq!(
            table.validate(&["sf_week"]),
            Err(SchemaError::MissingColumn("sf_week".into()))
        );
        assert_eq!(FeatureTable::default().validate(&[]), Err(SchemaError::NoRows));
    }

    #[test]
    fn validate_rejects_unsorted_rows() {
        let mut table = sample_table();
        table.trandate.swap(0, 1);
        assert_eq!(table.validate(&[]), Err(SchemaError::Unsorted(1)));
        table.sort_rows();
        assert_eq!(table.validate(&[]), Ok(()));
        assert_eq!(table.numeric("seq").unwrap(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn csv_round_trip_preserves_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.csv");
        let table = sample_table();
        table.write_csv(&path).unwrap();

        let levels = vec![(
            "wday_label",
            vec!["Mon".to_string(), "Tue".to_string(), "Wed".to_string()],
        )];
        let restored = FeatureTable::read_csv(&path, &levels).unwrap();
        assert_eq!(restored.atm, table.atm);
        assert_eq!(restored.trandate, table.trandate);
        assert_eq!(restored.usage, table.usage);
        assert_eq!(restored.train, table.train);
        assert_eq!(restored.fault, table.fault);
        assert_eq!(restored.numeric("seq").unwrap(), table.numeric("seq").unwrap());
        assert!(restored.numeric("lag_7").unwrap()[0].is_nan());
        assert_eq!(restored.categorical_columns(), table.categorical_columns());
    }

    #[test]
    fn predicates_select_entities() {
        let table = sample_table();
        let only_b = table.entities_matching(col(ATM).eq(lit("B"))).unwrap();
        assert_eq!(only_b, HashSet::from(["B".to_string()]));

        let late = table.entities_matching(col(TRANDATE).gt(lit("2024-05-01"))).unwrap();
        assert_eq!(late, HashSet::from(["A".to_string()]));
    }
}
