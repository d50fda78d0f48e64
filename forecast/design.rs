//! Per-entity design matrices.
//!
//! The model formula is "usage ~ everything except the identifiers and the split
//! flag": the fault indicator, every numeric feature column and a treatment-coded
//! dummy for every non-reference level of every categorical column.

use crate::table::FeatureTable;
use ndarray::{Array1, Array2, Axis};
use std::ops::Range;

/// A named numeric feature matrix. Column `j` of `values` is called `names[j]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(names: Vec<String>, values: Array2<f64>) -> Self {
        debug_assert_eq!(names.len(), values.ncols());
        Self { names, values }
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Keeps the given columns, in the given order.
    pub fn select_columns(&self, keep: &[usize]) -> Self {
        Self {
            names: keep.iter().map(|&j| self.names[j].clone()).collect(),
            values: self.values.select(Axis(1), keep),
        }
    }

    /// Removes the given columns, preserving the order of the rest.
    pub fn drop_columns(&self, drop: &[usize]) -> Self {
        let keep: Vec<usize> = (0..self.ncols()).filter(|j| !drop.contains(j)).collect();
        self.select_columns(&keep)
    }

    /// Reorders the matrix to `names`. Fails with the first name it lacks.
    pub fn select_named(&self, names: &[String]) -> Result<Self, String> {
        let keep = names
            .iter()
            .map(|name| self.column_index(name).ok_or_else(|| name.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.select_columns(&keep))
    }
}

/// Everything the trainer needs for one entity.
#[derive(Debug, Clone)]
pub struct EntityDesign {
    pub matrix: FeatureMatrix,
    /// Usage with NaN where unknown; one entry per matrix row.
    pub response: Array1<f64>,
    /// Rows, relative to the entity, whose `train` flag is set.
    pub train_index: Vec<usize>,
}

/// Predictor names in matrix order.
pub fn predictor_names(table: &FeatureTable) -> Vec<String> {
    let mut names = vec![crate::table::FAULT.to_string()];
    names.extend(table.numeric_columns().iter().map(|c| c.name.clone()));
    for column in table.categorical_columns() {
        names.extend(
            column
                .levels
                .iter()
                .skip(1)
                .map(|level| format!("{}{}", column.name, level)),
        );
    }
    names
}

/// Builds the design of the entity occupying `rows` of `table`.
pub fn entity_design(table: &FeatureTable, rows: Range<usize>) -> EntityDesign {
    let names = predictor_names(table);
    let n = rows.len();
    let mut values = Array2::<f64>::zeros((n, names.len()));

    for (i, row) in rows.clone().enumerate() {
        let mut j = 0;
        values[[i, j]] = if table.fault[row] { 1.0 } else { 0.0 };
        j += 1;
        for column in table.numeric_columns() {
            values[[i, j]] = column.values[row];
            j += 1;
        }
        for column in table.categorical_columns() {
            let code = column.codes[row];
            for level in 1..column.levels.len() {
                values[[i, j]] = if code == level { 1.0 } else { 0.0 };
                j += 1;
            }
        }
    }

    let response = rows
        .clone()
        .map(|row| table.usage[row].unwrap_or(f64::NAN))
        .collect();
    let train_index = rows
        .clone()
        .enumerate()
        .filter(|&(_, row)| table.train[row])
        .map(|(i, _)| i)
        .collect();

    EntityDesign {
        matrix: FeatureMatrix::new(names, values),
        response,
        train_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::array;

    fn table() -> FeatureTable {
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let mut t = FeatureTable {
            atm: vec!["A".into(), "B".into(), "B".into()],
            trandate: vec![d(1), d(1), d(2)],
            usage: vec![Some(1.0), None, Some(3.0)],
            train: vec![true, true, false],
            fault: vec![false, true, false],
            ..Default::default()
        };
        t.set_numeric("seq", vec![0.0, 0.0, 1.0]);
        t.set_categorical(
            "wday_label",
            vec!["Mon".into(), "Tue".into(), "Wed".into()],
            vec![0, 1, 2],
        );
        t
    }

    #[test]
    fn categoricals_are_treatment_coded() {
        let t = table();
        assert_eq!(
            predictor_names(&t),
            vec!["fault", "seq", "wday_labelTue", "wday_labelWed"]
        );
        let design = entity_design(&t, 1..3);
        assert_eq!(
            design.matrix.values,
            array![[1.0, 0.0, 1.0, 0.0], [0.0, 1.0, 0.0, 1.0]]
        );
        assert!(design.response[0].is_nan());
        assert_eq!(design.response[1], 3.0);
        assert_eq!(design.train_index, vec![0]);
    }

    #[test]
    fn named_selection_reorders_and_reports_missing_columns() {
        let design = entity_design(&table(), 0..1);
        let picked = design
            .matrix
            .select_named(&["seq".to_string(), "fault".to_string()])
            .unwrap();
        assert_eq!(picked.names, vec!["seq", "fault"]);
        assert_eq!(picked.values, array![[0.0, 0.0]]);
        assert_eq!(
            design.matrix.select_named(&["lag_7".to_string()]),
            Err("lag_7".to_string())
        );

        let dropped = design.matrix.drop_columns(&[0, 2]);
        assert_eq!(dropped.names, vec!["seq", "wday_labelWed"]);
    }
}
