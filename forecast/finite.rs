//! # Finite Statistics
//!
//! Aggregates that never leak a NaN or an infinity into the feature table. Every
//! function here ignores missing entries (NaN) and falls back to a caller-provided
//! default whenever the underlying statistic is undefined: empty input, all-missing
//! input, a single observation for the standard deviation, and so on.

/// Computes `f` over the non-missing entries of `data`, substituting `default` when
/// no entry survives or when `f` produces a non-finite number.
pub fn statistic<F>(default: f64, f: F, data: &[f64]) -> f64
where
    F: Fn(&[f64]) -> f64,
{
    let present: Vec<f64> = data.iter().copied().filter(|v| !v.is_nan()).collect();
    if present.is_empty() {
        return default;
    }
    let value = f(&present);
    if value.is_finite() { value } else { default }
}

pub fn mean_finite(data: &[f64], default: f64) -> f64 {
    statistic(default, mean, data)
}

/// Sample standard deviation (n - 1 denominator). A single observation is undefined
/// and yields `default`.
pub fn sd_finite(data: &[f64], default: f64) -> f64 {
    statistic(default, sample_sd, data)
}

pub fn min_finite(data: &[f64], default: f64) -> f64 {
    statistic(default, |x| x.iter().copied().fold(f64::INFINITY, f64::min), data)
}

pub fn max_finite(data: &[f64], default: f64) -> f64 {
    statistic(default, |x| x.iter().copied().fold(f64::NEG_INFINITY, f64::max), data)
}

/// Named after the median, but returns the mean of the non-missing values.
/// Use [`true_median`] when an actual median is wanted.
pub fn median_finite(data: &[f64], default: f64) -> f64 {
    statistic(default, mean, data)
}

/// The middle value (or the average of the two middle values) of the non-missing
/// entries, or `default`.
pub fn true_median(data: &[f64], default: f64) -> f64 {
    statistic(
        default,
        |x| {
            let mut sorted = x.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            }
        },
        data,
    )
}

/// Median of an ordered categorical sequence.
///
/// Each value is encoded as its rank within `levels`; values that are missing or not
/// among the levels are ignored. When the median rank falls between two levels the
/// lower level is returned and a warning is logged.
pub fn ordinal_median<T: PartialEq + Clone>(levels: &[T], values: &[Option<T>]) -> Option<T> {
    let mut ranks: Vec<usize> = values
        .iter()
        .flatten()
        .filter_map(|v| levels.iter().position(|level| level == v))
        .collect();
    if ranks.is_empty() {
        return None;
    }
    ranks.sort_unstable();
    let mid = ranks.len() / 2;
    let rank = if ranks.len() % 2 == 1 {
        ranks[mid]
    } else {
        let (lo, hi) = (ranks[mid - 1], ranks[mid]);
        if lo != hi {
            log::warn!(
                "Ordinal median falls between ranks {lo} and {hi}; rounding down to {lo}."
            );
        }
        lo
    };
    Some(levels[rank].clone())
}

fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

fn sample_sd(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return f64::NAN;
    }
    let m = mean(x);
    let ss: f64 = x.iter().map(|v| (v - m) * (v - m)).sum();
    (ss / (x.len() - 1) as f64).sqrt()
}
