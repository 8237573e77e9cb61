//! Comparison direction applied to a record's `result`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Whether we are minimizing or maximizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    Minimize,
    Maximize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Minimize
    }
}

impl ObjectiveDirection {
    /// `a` is at least as good as `b` (`<=` when minimizing, `>=` when maximizing).
    pub fn prefers(self, a: f64, b: f64) -> bool {
        match self {
            Self::Minimize => a <= b,
            Self::Maximize => a >= b,
        }
    }

    /// `a` is strictly better than `b`.
    pub fn improves(self, a: f64, b: f64) -> bool {
        match self {
            Self::Minimize => a < b,
            Self::Maximize => a > b,
        }
    }

    /// Best-first ordering. NaN sorts as equal so it never panics a sort.
    pub fn ordering(self, a: f64, b: f64) -> Ordering {
        let natural = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        match self {
            Self::Minimize => natural,
            Self::Maximize => natural.reverse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_minimize() {
        assert_eq!(ObjectiveDirection::default(), ObjectiveDirection::Minimize);
    }

    #[test]
    fn prefers_includes_ties() {
        assert!(ObjectiveDirection::Minimize.prefers(1.0, 1.0));
        assert!(ObjectiveDirection::Maximize.prefers(1.0, 1.0));
        assert!(!ObjectiveDirection::Minimize.improves(1.0, 1.0));
        assert!(!ObjectiveDirection::Maximize.improves(1.0, 1.0));
    }

    #[test]
    fn ordering_is_best_first() {
        let mut values = vec![3.0, 1.0, 2.0];
        values.sort_by(|a, b| ObjectiveDirection::Maximize.ordering(*a, *b));
        assert_eq!(values, vec![3.0, 2.0, 1.0]);
        values.sort_by(|a, b| ObjectiveDirection::Minimize.ordering(*a, *b));
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&ObjectiveDirection::Maximize).unwrap();
        assert_eq!(json, "\"maximize\"");
    }
}
