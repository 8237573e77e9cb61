//! Scalarizations of multi-objective results.
//!
//! Each function folds a list of objective values into one number, either
//! before calling `add_result` or as the `op` of [`RecordList::map`]. Means
//! and spreads use population statistics. Empty input yields NaN.
//!
//! [`RecordList::map`]: crate::aggregate::RecordList::map

use ro_types::{validation_error, RoResult};

use crate::aggregate::{mean, median, population_variance};

/// Weight for each term when the caller has no preference.
pub const DEFAULT_WEIGHT: f64 = 0.5;

/// Scale `data` so that it sums to 1.
pub fn normalize(data: &[f64]) -> RoResult<Vec<f64>> {
    let total: f64 = data.iter().sum();
    if total == 0.0 || !total.is_finite() {
        return Err(validation_error!("cannot normalize values summing to {}", total));
    }
    Ok(data.iter().map(|d| d / total).collect())
}

/// `w_mean * mean + w_var * variance`.
pub fn mean_variance(data: &[f64], w_mean: f64, w_var: f64) -> f64 {
    w_mean * mean(data) + w_var * population_variance(data)
}

/// `w_mean * mean + w_std * std`.
pub fn mean_std(data: &[f64], w_mean: f64, w_std: f64) -> f64 {
    w_mean * mean(data) + w_std * population_variance(data).sqrt()
}

/// `w_median * median + w_var * variance`.
pub fn median_variance(data: &[f64], w_median: f64, w_var: f64) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    w_median * median(data) + w_var * population_variance(data)
}

/// `w_median * median + w_std * std`.
pub fn median_std(data: &[f64], w_median: f64, w_std: f64) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    w_median * median(data) + w_std * population_variance(data).sqrt()
}
