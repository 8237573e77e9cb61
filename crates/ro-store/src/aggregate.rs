//! Aggregate view over an ordered list of records.

use ro_types::{validation_error, values_match, RoResult, RESULT_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Deref;

use crate::record::Record;

/// Outcome of a per-field reduction.
///
/// List-valued fields reduce position by position across records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldStat {
    Scalar(f64),
    Elementwise(Vec<f64>),
}

impl FieldStat {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Elementwise(_) => None,
        }
    }

    pub fn as_elementwise(&self) -> Option<&[f64]> {
        match self {
            Self::Scalar(_) => None,
            Self::Elementwise(v) => Some(v),
        }
    }
}

/// Records in a fixed order, with filtering and columnar statistics.
#[derive(Debug, Clone, Default)]
pub struct RecordList {
    records: Vec<Record>,
}

impl RecordList {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn into_vec(self) -> Vec<Record> {
        self.records
    }

    pub fn filter<F>(&self, predicate: F) -> RecordList
    where
        F: Fn(&Record) -> bool,
    {
        Self::new(
            self.records
                .iter()
                .filter(|r| predicate(r))
                .cloned()
                .collect(),
        )
    }

    /// Distinct values of `field`, in first-seen order.
    pub fn values(&self, field: &str) -> Vec<Value> {
        let mut seen: Vec<Value> = Vec::new();
        for value in self.records.iter().filter_map(|r| r.get(field)) {
            if !seen.iter().any(|s| values_match(s, value)) {
                seen.push(value.clone());
            }
        }
        seen
    }

    pub fn min(&self, field: &str) -> RoResult<FieldStat> {
        self.map(field, |xs| xs.iter().copied().fold(f64::INFINITY, f64::min))
    }

    pub fn max(&self, field: &str) -> RoResult<FieldStat> {
        self.map(field, |xs| xs.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }

    pub fn mean(&self, field: &str) -> RoResult<FieldStat> {
        self.map(field, mean)
    }

    /// Population variance.
    pub fn variance(&self, field: &str) -> RoResult<FieldStat> {
        self.map(field, population_variance)
    }

    /// Population standard deviation.
    pub fn std(&self, field: &str) -> RoResult<FieldStat> {
        self.map(field, |xs| population_variance(xs).sqrt())
    }

    pub fn median(&self, field: &str) -> RoResult<FieldStat> {
        self.map(field, median)
    }

    /// Reduce `field` with an arbitrary function of its values.
    ///
    /// Shape is decided by the first record: a list there means an
    /// elementwise reduction truncated to the shortest list, otherwise `op`
    /// sees one scalar per record. Any of the [`crate::objectives`]
    /// scalarizations can be passed as `op`.
    pub fn map(&self, field: &str, op: impl Fn(&[f64]) -> f64) -> RoResult<FieldStat> {
        let first = self
            .records
            .first()
            .ok_or_else(|| validation_error!("cannot reduce `{}` over zero records", field))?;

        if let Some(Value::Array(_)) = first.get(field) {
            let columns = self
                .records
                .iter()
                .map(|r| numeric_list(r, field))
                .collect::<RoResult<Vec<_>>>()?;
            let width = columns.iter().map(Vec::len).min().unwrap_or(0);
            let stats = (0..width)
                .map(|j| {
                    let column: Vec<f64> = columns.iter().map(|c| c[j]).collect();
                    op(&column)
                })
                .collect();
            return Ok(FieldStat::Elementwise(stats));
        }

        let scalars = self
            .records
            .iter()
            .map(|r| scalar(r, field))
            .collect::<RoResult<Vec<_>>>()?;
        Ok(FieldStat::Scalar(op(&scalars)))
    }
}

impl Deref for RecordList {
    type Target = [Record];

    fn deref(&self) -> &[Record] {
        &self.records
    }
}

impl IntoIterator for RecordList {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl From<Vec<Record>> for RecordList {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

fn scalar(record: &Record, field: &str) -> RoResult<f64> {
    if field == RESULT_FIELD {
        return Ok(record.result());
    }
    record
        .get_f64(field)
        .ok_or_else(|| validation_error!("record {} has no numeric `{}`", record.id(), field))
}

fn numeric_list(record: &Record, field: &str) -> RoResult<Vec<f64>> {
    match record.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    validation_error!("record {} has a non-numeric entry in `{}`", record.id(), field)
                })
            })
            .collect(),
        _ => Err(validation_error!(
            "record {} has no list-valued `{}`",
            record.id(),
            field
        )),
    }
}

pub(crate) fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

pub(crate) fn population_variance(xs: &[f64]) -> f64 {
    let m = mean(xs);
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64
}

pub(crate) fn median(xs: &[f64]) -> f64 {
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
