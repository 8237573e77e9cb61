//! Common interface of the search strategies.

use ro_store::RecordId;
use ro_types::{Assignment, ParameterValue, RoResult};
use serde_json::{Map, Value};

use crate::experiment::Experiment;

/// A way of proposing parameter values over an [`Experiment`].
///
/// The plain experiment is itself the random-search strategy; the others wrap
/// one and decide what to try from the records already stored.
pub trait SearchStrategy: Send {
    /// The wrapped search context.
    fn experiment(&self) -> &Experiment;

    /// Propose and assign a value for one parameter.
    fn sample(&mut self, name: &str) -> RoResult<ParameterValue>;

    /// Propose and assign every parameter.
    fn sample_all(&mut self) -> RoResult<Assignment>;

    /// Record an outcome for the current assignment.
    fn add_result_with(
        &mut self,
        result: f64,
        data: Map<String, Value>,
        attachment: Option<Value>,
    ) -> RoResult<RecordId>;

    fn add_result(&mut self, result: f64) -> RoResult<RecordId> {
        self.add_result_with(result, Map::new(), None)
    }

    fn current(&self) -> &Assignment {
        self.experiment().current()
    }

    /// Human-readable strategy name.
    fn strategy_name(&self) -> &str;
}

impl SearchStrategy for Experiment {
    fn experiment(&self) -> &Experiment {
        self
    }

    fn sample(&mut self, name: &str) -> RoResult<ParameterValue> {
        Experiment::sample(self, name)
    }

    fn sample_all(&mut self) -> RoResult<Assignment> {
        Experiment::sample_all(self)
    }

    fn add_result_with(
        &mut self,
        result: f64,
        data: Map<String, Value>,
        attachment: Option<Value>,
    ) -> RoResult<RecordId> {
        Experiment::add_result_with(self, result, data, attachment)
    }

    fn strategy_name(&self) -> &str {
        "random"
    }
}
