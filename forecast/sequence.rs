//! Sequence and lag features, computed per entity in date order.
//!
//! Every value here is built from strictly earlier dates, so a row never sees its
//! own usage even before the leakage guard is applied.

use crate::config::FeatureConfig;
use crate::finite::mean_finite;
use crate::table::FeatureTable;
use ahash::AHashMap;
use chrono::{Duration, NaiveDate};

pub fn lag_column(lag: usize) -> String {
    format!("lag_{lag}")
}

pub fn rolling_column(window: usize) -> String {
    format!("roll_{window}")
}

/// Appends `seq` (days since the entity's first date), one `lag_<k>` column per
/// configured lag and the trailing `roll_<w>` mean.
pub fn add_sequence(table: &mut FeatureTable, config: &FeatureConfig) {
    let n = table.len();
    let mut seq = vec![0.0; n];
    let mut lags: Vec<Vec<f64>> = vec![vec![f64::NAN; n]; config.lags.len()];
    let mut rolling = vec![f64::NAN; n];
    let window = config.rolling_window as i64;

    for (_, range) in table.entity_ranges() {
        let first = table.trandate[range.start];
        let by_date: AHashMap<NaiveDate, f64> = range
            .clone()
            .filter_map(|row| table.usage[row].map(|u| (table.trandate[row], u)))
            .collect();

        for row in range {
            let date = table.trandate[row];
            seq[row] = (date - first).num_days() as f64;

            for (column, &lag) in lags.iter_mut().zip(&config.lags) {
                if let Some(&value) = by_date.get(&(date - Duration::days(lag as i64))) {
                    column[row] = value;
                }
            }

            let trailing: Vec<f64> = (1..=window)
                .filter_map(|offset| by_date.get(&(date - Duration::days(offset))).copied())
                .collect();
            rolling[row] = mean_finite(&trailing, f64::NAN);
        }
    }

    table.set_numeric("seq", seq);
    for (values, &lag) in lags.into_iter().zip(&config.lags) {
        table.set_numeric(&lag_column(lag), values);
    }
    table.set_numeric(&rolling_column(config.rolling_window), rolling);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(usage: &[Option<f64>]) -> FeatureTable {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        FeatureTable {
            atm: vec!["A".to_string(); usage.len()],
            trandate: (0..usage.len())
                .map(|i| start + Duration::days(i as i64))
                .collect(),
            usage: usage.to_vec(),
            train: vec![true; usage.len()],
            fault: vec![false; usage.len()],
            ..Default::default()
        }
    }

    #[test]
    fn lags_and_rolling_means_look_backwards_only() {
        let mut t = table(&[Some(1.0), Some(2.0), None, Some(4.0)]);
        let config = FeatureConfig {
            lags: vec![1, 2],
            rolling_window: 2,
            min_zero_run: 3,
        };
        add_sequence(&mut t, &config);

        assert_eq!(t.numeric("seq").unwrap(), &[0.0, 1.0, 2.0, 3.0]);
        let lag1 = t.numeric("lag_1").unwrap();
        assert!(lag1[0].is_nan());
        assert_eq!(&lag1[1..3], &[1.0, 2.0]);
        assert!(lag1[3].is_nan());
        let lag2 = t.numeric("lag_2").unwrap();
        assert_eq!(lag2[3], 2.0);
        let roll = t.numeric("roll_2").unwrap();
        assert!(roll[0].is_nan());
        assert_eq!(&roll[1..], &[1.0, 1.5, 2.0]);
    }
}
