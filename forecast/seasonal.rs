//! Seasonal factors.
//!
//! A seasonal factor is the typical usage of one calendar slice of an entity (all of
//! its Mondays, all of its Decembers, its paydays) divided by the typical usage of
//! the entity as a whole. Only visible usage participates, so rows whose usage was
//! hidden by the leakage guard or by fault detection receive the factor of their
//! slice without contributing to it.

use crate::finite::median_finite;
use crate::table::{FeatureTable, SchemaError};
use ahash::AHashMap;

/// The seven groupings, as (output column, grouping column) within each entity.
pub const SEASONAL_GROUPINGS: [(&str, &str); 7] = [
    ("sf_week", "week"),
    ("sf_month", "month"),
    ("sf_wday", "wday"),
    ("sf_mweek", "mweek"),
    ("sf_quarter", "quarter"),
    ("sf_holiday", "holiday"),
    ("sf_payday", "payday"),
];

/// Factor assigned when a slice or its entity has no usable baseline.
pub const NEUTRAL_FACTOR: f64 = 1.0;

/// Appends `output` holding, for every row, the factor of its (entity, grouping)
/// slice relative to the entity's baseline.
pub fn seasonal_factor_by(
    table: &mut FeatureTable,
    output: &str,
    grouping: &[&str],
) -> Result<(), SchemaError> {
    let keys: Vec<&[f64]> = grouping
        .iter()
        .map(|&name| {
            table
                .numeric(name)
                .ok_or_else(|| SchemaError::MissingColumn(name.to_string()))
        })
        .collect::<Result<_, _>>()?;

    let usage = table.usage_or_nan();
    let mut factors = vec![NEUTRAL_FACTOR; table.len()];

    for (_, range) in table.entity_ranges() {
        let baseline = median_finite(&usage[range.clone()], f64::NAN);

        let mut slices: AHashMap<Vec<u64>, Vec<f64>> = AHashMap::new();
        for row in range.clone() {
            slices
                .entry(slice_key(&keys, row))
                .or_default()
                .push(usage[row]);
        }

        let slice_factor: AHashMap<Vec<u64>, f64> = slices
            .into_iter()
            .map(|(key, values)| {
                let ratio = median_finite(&values, f64::NAN) / baseline;
                (key, if ratio.is_finite() { ratio } else { NEUTRAL_FACTOR })
            })
            .collect();

        for row in range {
            if let Some(&factor) = slice_factor.get(&slice_key(&keys, row)) {
                factors[row] = factor;
            }
        }
    }

    table.set_numeric(output, factors);
    Ok(())
}

fn slice_key(keys: &[&[f64]], row: usize) -> Vec<u64> {
    keys.iter().map(|column| column[row].to_bits()).collect()
}
