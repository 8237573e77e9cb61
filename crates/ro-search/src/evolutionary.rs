//! Elite-based evolutionary perturbation.

use ro_store::{Record, RecordId};
use ro_types::{add_values, Assignment, ObjectiveDirection, ParameterValue, RoResult, SearchError};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::experiment::Experiment;
use crate::sampler::{SamplerRng, SeedSource};
use crate::strategy::SearchStrategy;

/// Value every parameter takes when there is no record to inherit from.
pub const BASELINE_VALUE: i64 = 0;

/// Selects a parent uniformly among the best `elite_size` records and
/// proposes `parent[name] + perturbation`, where the perturbation is drawn
/// from the experiment's own sampler for `name`.
///
/// With an empty store the parent is the baseline assignment (every parameter
/// at [`BASELINE_VALUE`]); this is the intended cold-start behaviour.
#[derive(Debug)]
pub struct Evolutionary {
    experiment: Experiment,
    elite_size: usize,
    fitness: ObjectiveDirection,
    parent: Option<Assignment>,
    rng: SamplerRng,
}

impl Evolutionary {
    pub fn new(experiment: Experiment, seeds: &mut SeedSource) -> Self {
        Self {
            experiment,
            elite_size: 10,
            fitness: ObjectiveDirection::Minimize,
            parent: None,
            rng: seeds.fork(),
        }
    }

    pub fn with_elite_size(mut self, elite_size: usize) -> Self {
        self.elite_size = elite_size;
        self
    }

    pub fn with_fitness(mut self, fitness: ObjectiveDirection) -> Self {
        self.fitness = fitness;
        self
    }

    pub fn elite_size(&self) -> usize {
        self.elite_size
    }

    pub fn fitness(&self) -> ObjectiveDirection {
        self.fitness
    }

    /// Parameter values perturbations are currently applied to.
    pub fn parent(&self) -> Option<&Assignment> {
        self.parent.as_ref()
    }

    pub fn into_experiment(self) -> Experiment {
        self.experiment
    }

    /// Reseed the experiment's samplers and the parent selection.
    pub fn seed(&mut self, seed: u64) {
        self.experiment.seed(seed);
        self.rng.reseed(seed);
    }

    /// Choose a new parent from the elite set.
    ///
    /// Returns the chosen record, or `None` when the store is empty and the
    /// baseline assignment was installed instead.
    pub fn sample_parent(&mut self) -> RoResult<Option<Record>> {
        let elite = self.experiment.top(self.elite_size, self.fitness)?;
        if elite.is_empty() {
            let names: Vec<String> = self.experiment.parameter_names().map(String::from).collect();
            let mut baseline = Assignment::new();
            for name in names {
                self.experiment.set(&name, BASELINE_VALUE)?;
                baseline.insert(name, Value::from(BASELINE_VALUE));
            }
            debug!("No records yet, evolving from the baseline assignment");
            self.parent = Some(baseline);
            return Ok(None);
        }

        let chosen = elite[self.rng.index(elite.len())].clone();
        let (parent, missing) = inherit(&chosen, self.experiment.parameter_names());
        for name in &missing {
            warn!(
                "Parent {} has no value for `{}`; perturbing it from {}",
                chosen.id(),
                name,
                BASELINE_VALUE
            );
        }
        debug!(
            "Selected parent {} (result {}) from {} elites",
            chosen.id(),
            chosen.result(),
            elite.count()
        );
        self.parent = Some(parent);
        Ok(Some(chosen))
    }
}

/// Split declared parameters into those `record` stores and those it lacks.
fn inherit<'a>(
    record: &Record,
    names: impl Iterator<Item = &'a str>,
) -> (Assignment, Vec<String>) {
    let mut parent = Assignment::new();
    let mut missing = Vec::new();
    for name in names {
        match record.get(name) {
            Some(value) => {
                parent.insert(name.to_string(), value.clone());
            }
            None => missing.push(name.to_string()),
        }
    }
    (parent, missing)
}

impl SearchStrategy for Evolutionary {
    fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    /// `parent[name] + perturbation`, selecting a parent first if needed.
    fn sample(&mut self, name: &str) -> RoResult<ParameterValue> {
        if self.parent.is_none() {
            self.sample_parent()?;
        }
        let perturbation = self.experiment.draw(name)?;
        let base = self
            .parent
            .as_ref()
            .and_then(|p| p.get(name))
            .cloned()
            .unwrap_or(Value::from(BASELINE_VALUE));

        let value = add_values(&base, &perturbation).ok_or_else(|| {
            SearchError::NonNumericParameter {
                name: name.to_string(),
                value: format!("{base} + {perturbation}"),
            }
        })?;
        self.experiment.set(name, value.clone())?;
        Ok(value)
    }

    /// Re-select the parent, then perturb every parameter.
    fn sample_all(&mut self) -> RoResult<Assignment> {
        self.sample_parent()?;
        let names: Vec<String> = self.experiment.parameter_names().map(String::from).collect();
        for name in names {
            self.sample(&name)?;
        }
        Ok(self.experiment.current().clone())
    }

    fn add_result_with(
        &mut self,
        result: f64,
        data: Map<String, Value>,
        attachment: Option<Value>,
    ) -> RoResult<RecordId> {
        self.experiment.add_result_with(result, data, attachment)
    }

    fn strategy_name(&self) -> &str {
        "evolutionary"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{Choice, Constant, SeedSource, Uniform};
    use ro_store::RecordDraft;
    use ro_types::RoError;
    use serde_json::json;
    use tempfile::TempDir;

    fn evo(tmp: &TempDir, perturb: f64) -> Evolutionary {
        let mut seeds = SeedSource::new(13);
        let e = Experiment::builder("evo")
            .root(tmp.path())
            .param("x", Constant::new(perturb))
            .param("y", Constant::new(perturb))
            .build()
            .unwrap();
        Evolutionary::new(e, &mut seeds).with_elite_size(2)
    }

    #[test]
    fn empty_store_falls_back_to_baseline() {
        let tmp = TempDir::new().unwrap();
        let mut evo = evo(&tmp, 0.5);
        assert!(evo.sample_parent().unwrap().is_none());
        assert_eq!(evo.current()["x"], json!(0));
        assert_eq!(evo.current()["y"], json!(0));

        let proposal = evo.sample_all().unwrap();
        assert_eq!(proposal["x"], json!(0.5));
        assert_eq!(proposal["y"], json!(0.5));
    }

    #[test]
    fn parent_comes_from_elite() {
        let tmp = TempDir::new().unwrap();
        let mut evo = evo(&tmp, 1.0);
        for (x, result) in [(10.0, 3.0), (20.0, 1.0), (30.0, 2.0), (40.0, 9.0)] {
            evo.experiment.set("x", x).unwrap();
            evo.experiment.set("y", x).unwrap();
            evo.add_result(result).unwrap();
        }

        for _ in 0..20 {
            let parent = evo.sample_parent().unwrap().expect("records exist");
            assert!(parent.result() <= 2.0, "non-elite parent {}", parent.result());
            let x = evo.parent().unwrap()["x"].as_f64().unwrap();
            assert!(x == 20.0 || x == 30.0);
        }
    }

    #[test]
    fn maximizing_fitness_picks_high_results() {
        let tmp = TempDir::new().unwrap();
        let mut evo = evo(&tmp, 1.0).with_fitness(ObjectiveDirection::Maximize).with_elite_size(1);
        for (x, result) in [(1.0, 5.0), (2.0, 7.0), (3.0, 6.0)] {
            evo.experiment.set("x", x).unwrap();
            evo.add_result(result).unwrap();
        }
        let proposal = evo.sample_all().unwrap();
        assert_eq!(proposal["x"], json!(3.0));
    }

    #[test]
    fn sample_perturbs_current_parent() {
        let tmp = TempDir::new().unwrap();
        let mut evo = evo(&tmp, 0.25);
        evo.experiment.set("x", 4.0).unwrap();
        evo.experiment.set("y", -1.0).unwrap();
        evo.add_result(0.0).unwrap();

        assert_eq!(evo.sample("x").unwrap(), json!(4.25));
        assert_eq!(evo.sample("y").unwrap(), json!(-0.75));
        assert_eq!(evo.experiment().get("x"), Some(&json!(4.25)));
    }

    #[test]
    fn parent_missing_a_parameter_falls_back_per_parameter() {
        let tmp = TempDir::new().unwrap();
        let mut evo = evo(&tmp, 0.5);
        evo.experiment
            .store()
            .append(RecordDraft::new(1.0).with_param("x", 3.0))
            .unwrap();

        let parent = evo.sample_parent().unwrap().expect("one record");
        let (inherited, missing) = inherit(&parent, evo.experiment.parameter_names());
        assert_eq!(missing, vec!["y".to_string()]);
        assert_eq!(inherited.get("x"), Some(&json!(3.0)));

        let proposal = evo.sample_all().unwrap();
        assert_eq!(proposal["x"], json!(3.5));
        assert_eq!(proposal["y"], json!(0.5));
    }

    #[test]
    fn seeding_reproduces_proposals() {
        let tmp = TempDir::new().unwrap();
        let build = |seed: u64| {
            let mut seeds = SeedSource::new(seed);
            let e = Experiment::builder("evo-seed")
                .root(tmp.path())
                .param("x", Uniform::new(-1.0, 1.0, &mut seeds))
                .build()
                .unwrap();
            Evolutionary::new(e, &mut seeds).with_elite_size(4)
        };
        let mut a = build(1);
        let mut b = build(2);
        for result in [4.0, 3.0, 2.0, 1.0, 0.5] {
            a.experiment.set("x", result).unwrap();
            a.add_result(result).unwrap();
        }

        a.seed(7);
        b.seed(7);
        let from_a: Vec<_> = (0..6).map(|_| a.sample_all().unwrap()).collect();
        let from_b: Vec<_> = (0..6).map(|_| b.sample_all().unwrap()).collect();
        assert_eq!(from_a, from_b);
    }

    #[test]
    fn non_numeric_parameter_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut seeds = SeedSource::new(1);
        let e = Experiment::builder("evo-str")
            .root(tmp.path())
            .param("act", Choice::new(vec!["relu"], &mut seeds))
            .build()
            .unwrap();
        let mut evo = Evolutionary::new(e, &mut seeds);
        match evo.sample("act") {
            Err(RoError::Search(SearchError::NonNumericParameter { name, .. })) => {
                assert_eq!(name, "act")
            }
            other => panic!("Expected NonNumericParameter, got: {:?}", other),
        }
    }
}
