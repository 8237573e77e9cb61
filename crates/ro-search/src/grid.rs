//! Coverage-driven grid search over discrete parameters.
//!
//! Replays the store into a visit-count tree over the Cartesian product of
//! every parameter's domain and always proposes the least visited
//! combination, so coverage stays as even as possible across workers.

use ro_store::RecordId;
use ro_types::{validation_error, values_match, Assignment, ParameterValue, RoResult, SearchError};
use serde_json::{Map, Value};
use tracing::debug;

use crate::experiment::Experiment;
use crate::strategy::SearchStrategy;

#[derive(Debug, Clone, PartialEq)]
enum GridNode {
    Branch(Vec<GridNode>),
    Leaf(u64),
}

/// Tree keyed by successive choice positions; leaves hold visit counts.
#[derive(Debug, Clone, PartialEq)]
pub struct GridIndex {
    root: GridNode,
    dims: Vec<usize>,
}

impl GridIndex {
    /// Full tree over `dims` with every leaf at zero.
    pub fn new(dims: &[usize]) -> Self {
        let mut node = GridNode::Leaf(0);
        for &width in dims.iter().rev() {
            node = GridNode::Branch(vec![node; width]);
        }
        Self {
            root: node,
            dims: dims.to_vec(),
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of combinations (leaves).
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    fn leaf(&self, path: &[usize]) -> Option<&u64> {
        if path.len() != self.dims.len() {
            return None;
        }
        let mut node = &self.root;
        for &i in path {
            node = match node {
                GridNode::Branch(children) => children.get(i)?,
                GridNode::Leaf(_) => return None,
            };
        }
        match node {
            GridNode::Leaf(count) => Some(count),
            GridNode::Branch(_) => None,
        }
    }

    fn leaf_mut(&mut self, path: &[usize]) -> Option<&mut u64> {
        if path.len() != self.dims.len() {
            return None;
        }
        let mut node = &mut self.root;
        for &i in path {
            node = match node {
                GridNode::Branch(children) => children.get_mut(i)?,
                GridNode::Leaf(_) => return None,
            };
        }
        match node {
            GridNode::Leaf(count) => Some(count),
            GridNode::Branch(_) => None,
        }
    }

    pub fn count(&self, path: &[usize]) -> Option<u64> {
        self.leaf(path).copied()
    }

    /// Add one visit to the leaf at `path`. Returns false if out of range.
    pub fn increment(&mut self, path: &[usize]) -> bool {
        match self.leaf_mut(path) {
            Some(count) => {
                *count += 1;
                true
            }
            None => false,
        }
    }

    /// Every leaf path with its count, in domain enumeration order.
    pub fn leaves(&self) -> LeafPaths<'_> {
        LeafPaths {
            stack: vec![(&self.root, Vec::new())],
        }
    }

    /// Total visits recorded.
    pub fn total(&self) -> u64 {
        self.leaves().map(|(_, count)| count).sum()
    }
}

/// Depth-first walk over the index leaves driven by an explicit stack.
#[derive(Debug)]
pub struct LeafPaths<'a> {
    stack: Vec<(&'a GridNode, Vec<usize>)>,
}

impl Iterator for LeafPaths<'_> {
    type Item = (Vec<usize>, u64);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, path)) = self.stack.pop() {
            match node {
                GridNode::Leaf(count) => return Some((path, *count)),
                GridNode::Branch(children) => {
                    for (i, child) in children.iter().enumerate().rev() {
                        let mut child_path = path.clone();
                        child_path.push(i);
                        self.stack.push((child, child_path));
                    }
                }
            }
        }
        None
    }
}

/// Grid search wrapping an [`Experiment`] whose samplers all have finite
/// domains.
#[derive(Debug)]
pub struct GridSearch {
    experiment: Experiment,
    domains: Vec<(String, Vec<ParameterValue>)>,
    index: GridIndex,
}

impl GridSearch {
    pub fn new(experiment: Experiment) -> RoResult<Self> {
        let mut domains = Vec::new();
        for name in experiment.parameter_names() {
            let choices = experiment
                .sampler(name)
                .and_then(|s| s.choices())
                .ok_or_else(|| SearchError::UnsupportedSampler {
                    parameter: name.to_string(),
                })?;
            if choices.is_empty() {
                return Err(validation_error!("parameter {} has an empty domain", name));
            }
            domains.push((name.to_string(), choices.to_vec()));
        }

        let dims: Vec<usize> = domains.iter().map(|(_, d)| d.len()).collect();
        let mut grid = Self {
            experiment,
            domains,
            index: GridIndex::new(&dims),
        };
        grid.refresh_index()?;
        Ok(grid)
    }

    pub fn index(&self) -> &GridIndex {
        &self.index
    }

    pub fn into_experiment(self) -> Experiment {
        self.experiment
    }

    /// Rebuild the coverage index from every record currently in the store.
    ///
    /// Records whose parameters fall outside the declared domains are ignored.
    pub fn refresh_index(&mut self) -> RoResult<()> {
        let mut index = GridIndex::new(self.index.dims());
        let mut replayed = 0usize;
        for record in self.experiment.store().scan()? {
            if let Some(path) = self.path_for(|name| record.get(name)) {
                index.increment(&path);
                replayed += 1;
            }
        }
        debug!(
            "Grid index rebuilt from {} records over {} combinations",
            replayed,
            index.size()
        );
        self.index = index;
        Ok(())
    }

    /// Visit count of a complete assignment, if it lies inside the grid.
    pub fn visits(&self, assignment: &Assignment) -> Option<u64> {
        let path = self.path_for(|name| assignment.get(name))?;
        self.index.count(&path)
    }

    fn path_for<'v, F>(&self, lookup: F) -> Option<Vec<usize>>
    where
        F: Fn(&str) -> Option<&'v Value>,
    {
        self.domains
            .iter()
            .map(|(name, domain)| {
                let value = lookup(name.as_str())?;
                domain.iter().position(|choice| values_match(choice, value))
            })
            .collect()
    }

    fn assign(&mut self, path: &[usize]) -> RoResult<Assignment> {
        for ((name, domain), &i) in self.domains.iter().zip(path) {
            self.experiment.set(name, domain[i].clone())?;
        }
        Ok(self.experiment.current().clone())
    }
}

impl SearchStrategy for GridSearch {
    fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    /// Least-visited value of `name`, holding the other parameters fixed at
    /// their current values. Ties go to the earliest domain value.
    fn sample(&mut self, name: &str) -> RoResult<ParameterValue> {
        let dim = self
            .domains
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| SearchError::UnknownParameter {
                name: name.to_string(),
            })?;

        let mut path = Vec::with_capacity(self.domains.len());
        for (i, (other, domain)) in self.domains.iter().enumerate() {
            if i == dim {
                path.push(0);
                continue;
            }
            let current = self.experiment.get(other);
            let pos = current
                .and_then(|v| domain.iter().position(|choice| values_match(choice, v)))
                .ok_or_else(|| {
                    validation_error!("current value of {} is outside its grid domain", other)
                })?;
            path.push(pos);
        }

        let mut best: Option<(usize, u64)> = None;
        for candidate in 0..self.domains[dim].1.len() {
            path[dim] = candidate;
            let count = self.index.count(&path).unwrap_or(0);
            if best.map_or(true, |(_, c)| count < c) {
                best = Some((candidate, count));
            }
        }

        let (choice, _) = best.unwrap_or((0, 0));
        let value = self.domains[dim].1[choice].clone();
        self.experiment.set(name, value.clone())?;
        Ok(value)
    }

    /// The first combination, in enumeration order, at the lowest visit
    /// count. No combination is proposed twice before all were proposed once.
    fn sample_all(&mut self) -> RoResult<Assignment> {
        let threshold = self.index.leaves().map(|(_, count)| count).min().unwrap_or(0);
        let path = self
            .index
            .leaves()
            .find(|(_, count)| *count <= threshold)
            .map(|(path, _)| path)
            .unwrap_or_default();
        self.assign(&path)
    }

    fn add_result_with(
        &mut self,
        result: f64,
        data: Map<String, Value>,
        attachment: Option<Value>,
    ) -> RoResult<RecordId> {
        let id = self.experiment.add_result_with(result, data, attachment)?;
        self.refresh_index()?;
        Ok(id)
    }

    fn strategy_name(&self) -> &str {
        "grid"
    }
}
