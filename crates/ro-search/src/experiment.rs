//! The search context: declared samplers, current assignment, write path.

use ro_store::{Record, RecordDraft, RecordId, RecordList, RecordStore, StoreConfig};
use ro_types::{
    Assignment, ObjectiveDirection, ParameterValue, RoResult, SearchError, RESULT_FIELD,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::sampler::{Sampler, SamplerState};

/// Builder for an [`Experiment`].
#[derive(Debug)]
pub struct ExperimentBuilder {
    name: String,
    config: StoreConfig,
    params: Vec<(String, Box<dyn Sampler>)>,
}

impl ExperimentBuilder {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Results root directory; the experiment lives in `<root>/<name>`.
    pub fn root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.config = self.config.with_root(root);
        self
    }

    pub fn param(mut self, name: impl Into<String>, sampler: impl Sampler + 'static) -> Self {
        self.params.push((name.into(), Box::new(sampler)));
        self
    }

    pub fn boxed_param(mut self, name: impl Into<String>, sampler: Box<dyn Sampler>) -> Self {
        self.params.push((name.into(), sampler));
        self
    }

    /// Validate parameter names, open the store and draw initial values.
    pub fn build(self) -> RoResult<Experiment> {
        let mut seen = HashSet::new();
        for (name, _) in &self.params {
            if name == RESULT_FIELD {
                return Err(SearchError::ReservedName { name: name.clone() }.into());
            }
            if !seen.insert(name.as_str()) {
                return Err(SearchError::DuplicateParameter { name: name.clone() }.into());
            }
        }

        let store = RecordStore::open(&self.config, &self.name)?;
        let mut experiment = Experiment {
            name: self.name,
            params: self.params,
            current: Assignment::new(),
            store,
        };
        experiment.sample_all()?;
        info!(
            "Experiment {} ready with {} parameters",
            experiment.name,
            experiment.params.len()
        );
        Ok(experiment)
    }
}

/// A named set of parameter samplers, the values currently assigned to them,
/// and the record store results are written to.
///
/// Not persisted: each process rebuilds its own context.
#[derive(Debug)]
pub struct Experiment {
    name: String,
    params: Vec<(String, Box<dyn Sampler>)>,
    current: Assignment,
    store: RecordStore,
}

impl Experiment {
    pub fn builder(name: impl Into<String>) -> ExperimentBuilder {
        ExperimentBuilder {
            name: name.into(),
            config: StoreConfig::from_env(),
            params: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    /// Parameter names in declaration order.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(name, _)| name.as_str())
    }

    pub fn sampler(&self, name: &str) -> Option<&dyn Sampler> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.as_ref())
    }

    fn sampler_mut(&mut self, name: &str) -> RoResult<&mut Box<dyn Sampler>> {
        self.params
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
            .ok_or_else(|| SearchError::UnknownParameter { name: name.to_string() }.into())
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.current.get(name)
    }

    pub fn current(&self) -> &Assignment {
        &self.current
    }

    /// Draw from `name`'s sampler without touching the assignment.
    pub(crate) fn draw(&mut self, name: &str) -> RoResult<ParameterValue> {
        Ok(self.sampler_mut(name)?.sample())
    }

    /// Draw, assign and return a new value for `name`.
    pub fn sample(&mut self, name: &str) -> RoResult<ParameterValue> {
        let value = self.draw(name)?;
        self.current.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Sample every declared parameter exactly once.
    pub fn sample_all(&mut self) -> RoResult<Assignment> {
        for (name, sampler) in self.params.iter_mut() {
            self.current.insert(name.clone(), sampler.sample());
        }
        Ok(self.current.clone())
    }

    /// Override a parameter's current value without sampling.
    pub fn set(&mut self, name: &str, value: impl Into<ParameterValue>) -> RoResult<()> {
        if self.sampler(name).is_none() {
            return Err(SearchError::UnknownParameter { name: name.to_string() }.into());
        }
        self.current.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Record `result` for the current assignment.
    pub fn add_result(&mut self, result: f64) -> RoResult<RecordId> {
        self.add_result_with(result, Map::new(), None)
    }

    /// Record `result` with auxiliary fields and an optional attachment.
    pub fn add_result_with(
        &mut self,
        result: f64,
        data: Map<String, Value>,
        attachment: Option<Value>,
    ) -> RoResult<RecordId> {
        let mut draft = RecordDraft::new(result)
            .with_params(self.current.clone())
            .with_data(data);
        if let Some(attachment) = attachment {
            draft = draft.with_attachment(attachment);
        }
        let id = self.store.append(draft)?;
        debug!("Experiment {} recorded {} as {}", self.name, result, id);
        Ok(id)
    }

    /// Reseed every sampler. Affects future samples only.
    pub fn seed(&mut self, seed: u64) {
        for (_, sampler) in self.params.iter_mut() {
            sampler.seed(seed);
        }
    }

    pub fn sampler_states(&self) -> BTreeMap<String, SamplerState> {
        self.params
            .iter()
            .map(|(name, sampler)| (name.clone(), sampler.state()))
            .collect()
    }

    /// Restore sampler positions; names not declared here are ignored.
    pub fn set_sampler_states(&mut self, states: &BTreeMap<String, SamplerState>) {
        for (name, sampler) in self.params.iter_mut() {
            if let Some(state) = states.get(name) {
                sampler.set_state(state);
            }
        }
    }

    /// Persist every sampler's state to `path` as JSON.
    pub fn save_state<P: AsRef<Path>>(&self, path: P) -> RoResult<PathBuf> {
        let path = path.as_ref().to_path_buf();
        std::fs::write(&path, serde_json::to_vec_pretty(&self.sampler_states())?)?;
        Ok(path)
    }

    pub fn load_state<P: AsRef<Path>>(&mut self, path: P) -> RoResult<()> {
        let bytes = std::fs::read(path)?;
        let states: BTreeMap<String, SamplerState> = serde_json::from_slice(&bytes)?;
        self.set_sampler_states(&states);
        Ok(())
    }

    pub fn search(&self, objective: ObjectiveDirection) -> RoResult<Option<Record>> {
        self.store.search(objective)
    }

    pub fn minimum(&self) -> RoResult<Option<Record>> {
        self.store.minimum()
    }

    pub fn maximum(&self) -> RoResult<Option<Record>> {
        self.store.maximum()
    }

    pub fn top(&self, k: usize, objective: ObjectiveDirection) -> RoResult<RecordList> {
        self.store.top(k, objective)
    }

    pub fn all(&self) -> RoResult<RecordList> {
        self.store.all()
    }

    pub fn count(&self) -> RoResult<usize> {
        self.store.count()
    }
}
