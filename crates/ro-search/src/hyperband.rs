//! HyperBand: successive halving across a geometric schedule of brackets.
//!
//! Each run picks a bracket `s` when it is constructed, then reports one
//! score per resource unit through [`HyperBand::stop`]. At every rung boundary
//! the run is compared with the peers that reached the same step and is
//! pruned unless it ranks among the surviving fraction. Run histories live in
//! `<experiment>/hyperband/<run-id>.json`.

use ro_store::RecordId;
use ro_types::{
    Assignment, ObjectiveDirection, ParameterValue, RoResult, SearchError, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::experiment::Experiment;
use crate::strategy::SearchStrategy;

/// Sub-directory of the experiment holding bracket-run files.
pub const HYPERBAND_DIR: &str = "hyperband";

// Tolerance for float noise in the floor/ceil of the bracket formulas.
const ROUNDING_EPS: f64 = 1e-9;

fn floor_exact(x: f64) -> f64 {
    (x + ROUNDING_EPS).floor()
}

fn ceil_exact(x: f64) -> f64 {
    (x - ROUNDING_EPS).ceil()
}

/// HyperBand run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperBandConfig {
    /// Resource units a run may consume (e.g. epochs).
    pub num_iter: u64,
    /// Downsampling rate; must be greater than 1.
    pub eta: f64,
    /// Direction used to rank peers at a rung.
    pub objective: ObjectiveDirection,
    /// Force a bracket instead of picking one from existing runs.
    pub bracket: Option<usize>,
}

impl HyperBandConfig {
    pub fn new(num_iter: u64) -> Self {
        Self {
            num_iter,
            eta: std::f64::consts::E,
            objective: ObjectiveDirection::Minimize,
            bracket: None,
        }
    }

    pub fn with_eta(mut self, eta: f64) -> Self {
        self.eta = eta;
        self
    }

    pub fn with_objective(mut self, objective: ObjectiveDirection) -> Self {
        self.objective = objective;
        self
    }

    pub fn with_bracket(mut self, s: usize) -> Self {
        self.bracket = Some(s);
        self
    }
}

/// One bracket's allocation: `n` configurations starting with `r` units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    pub s: usize,
    pub n: u64,
    pub r: f64,
}

/// Closed-form bracket sizing for a given `num_iter` and `eta`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HyperBandSchedule {
    num_iter: u64,
    eta: f64,
    s_max: usize,
}

impl HyperBandSchedule {
    pub fn new(num_iter: u64, eta: f64) -> RoResult<Self> {
        if !(eta.is_finite() && eta > 1.0) {
            return Err(SearchError::InvalidBracket {
                message: format!("eta must be a finite number greater than 1, got {eta}"),
            }
            .into());
        }
        if num_iter < 1 {
            return Err(SearchError::InvalidBracket {
                message: "num_iter must be at least 1".to_string(),
            }
            .into());
        }

        // floor(log_eta(num_iter)), computed without log rounding error.
        let limit = num_iter as f64 * (1.0 + ROUNDING_EPS);
        let mut s_max = 0usize;
        while eta.powi(s_max as i32 + 1) <= limit {
            s_max += 1;
        }
        Ok(Self {
            num_iter,
            eta,
            s_max,
        })
    }

    pub fn num_iter(&self) -> u64 {
        self.num_iter
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }

    pub fn s_max(&self) -> usize {
        self.s_max
    }

    /// Total budget `B = (s_max + 1) * num_iter`.
    pub fn budget(&self) -> u64 {
        (self.s_max as u64 + 1) * self.num_iter
    }

    /// `n = ceil(B / num_iter / (s + 1) * eta^s)`, `r = num_iter * eta^-s`.
    pub fn bracket(&self, s: usize) -> Bracket {
        let b = self.budget() as f64;
        let num_iter = self.num_iter as f64;
        let n = ceil_exact(b / num_iter / (s as f64 + 1.0) * self.eta.powi(s as i32));
        let r = num_iter * self.eta.powi(-(s as i32));
        Bracket { s, n: n as u64, r }
    }

    /// Steps between prune decisions at rung `i`: `floor(r * eta^i)`, at least 1.
    pub fn rung_length(&self, bracket: &Bracket, i: usize) -> u64 {
        (floor_exact(bracket.r * self.eta.powi(i as i32)) as u64).max(1)
    }

    /// Surviving configurations at rung `i`: `floor(n * eta^-i / eta)`.
    ///
    /// Shrinks by a factor of `eta` per rung, so each decision keeps a
    /// smaller fraction of the peers.
    pub fn rung_survivors(&self, bracket: &Bracket, i: usize) -> u64 {
        floor_exact(bracket.n as f64 * self.eta.powi(-(i as i32)) / self.eta) as u64
    }
}

/// Lifecycle of one bracket run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Active,
    Pruned,
    Completed,
}

/// On-disk form of a bracket run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketRun {
    pub s: usize,
    pub n: u64,
    pub r: f64,
    pub num_iter: u64,
    pub i: usize,
    #[serde(default)]
    pub status: RunStatus,
    /// One score per reported step.
    pub results: Vec<f64>,
    #[serde(flatten)]
    pub params: Assignment,
}

/// Read every parseable bracket run under `dir`. Unreadable files are skipped.
pub fn load_runs(dir: &Path) -> RoResult<Vec<(PathBuf, BracketRun)>> {
    let mut runs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let parsed = fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                serde_json::from_slice::<BracketRun>(&bytes).map_err(|e| e.to_string())
            });
        match parsed {
            Ok(run) => runs.push((path, run)),
            Err(e) => warn!("Skipping bracket run {}: {}", path.display(), e),
        }
    }
    Ok(runs)
}

/// Largest bracket whose run count is still below its quota.
///
/// Scans `s = s_max, ..., 0` and returns the first bracket with fewer than
/// `(s + 1) * round` runs, raising `round` until one qualifies.
fn select_bracket(runs: &[(PathBuf, BracketRun)], s_max: usize) -> usize {
    let mut counts = vec![0usize; s_max + 1];
    for (_, run) in runs {
        if let Some(count) = counts.get_mut(run.s) {
            *count += 1;
        }
    }
    let mut round = 1usize;
    loop {
        for s in (0..=s_max).rev() {
            if counts[s] < (s + 1) * round {
                return s;
            }
        }
        round += 1;
    }
}

/// One HyperBand run wrapping an [`Experiment`].
#[derive(Debug)]
pub struct HyperBand {
    experiment: Experiment,
    config: HyperBandConfig,
    schedule: HyperBandSchedule,
    bracket: Bracket,
    rung: usize,
    step: u64,
    next_update: u64,
    survivors: u64,
    status: RunStatus,
    results: Vec<f64>,
    dir: PathBuf,
    run_path: PathBuf,
}

impl HyperBand {
    pub fn new(experiment: Experiment, config: HyperBandConfig) -> RoResult<Self> {
        let schedule = HyperBandSchedule::new(config.num_iter, config.eta)?;
        let dir = experiment.dir().join(HYPERBAND_DIR);
        fs::create_dir_all(&dir).map_err(|e| StoreError::DirectoryUnavailable {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;

        let s = match config.bracket {
            Some(s) if s <= schedule.s_max() => s,
            Some(s) => {
                return Err(SearchError::InvalidBracket {
                    message: format!("bracket {s} exceeds s_max {}", schedule.s_max()),
                }
                .into())
            }
            None => select_bracket(&load_runs(&dir)?, schedule.s_max()),
        };

        let bracket = schedule.bracket(s);
        let next_update = schedule.rung_length(&bracket, 0);
        let survivors = schedule.rung_survivors(&bracket, 0);
        let run_path = dir.join(RecordId::generate().file_name());
        info!(
            "HyperBand run in bracket s={} (n={}, r={:.4}, s_max={})",
            bracket.s,
            bracket.n,
            bracket.r,
            schedule.s_max()
        );

        Ok(Self {
            experiment,
            config,
            schedule,
            bracket,
            rung: 0,
            step: 0,
            next_update,
            survivors,
            status: RunStatus::Active,
            results: Vec::new(),
            dir,
            run_path,
        })
    }

    pub fn config(&self) -> &HyperBandConfig {
        &self.config
    }

    pub fn schedule(&self) -> &HyperBandSchedule {
        &self.schedule
    }

    pub fn bracket(&self) -> Bracket {
        self.bracket
    }

    /// Current rung index `i`.
    pub fn rung(&self) -> usize {
        self.rung
    }

    /// Steps reported so far.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Step multiple at which the next prune decision happens.
    pub fn next_update(&self) -> u64 {
        self.next_update
    }

    /// Peers allowed to rank ahead of this run at the next decision.
    pub fn survivors(&self) -> u64 {
        self.survivors
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn results(&self) -> &[f64] {
        &self.results
    }

    pub fn run_path(&self) -> &Path {
        &self.run_path
    }

    pub fn into_experiment(self) -> Experiment {
        self.experiment
    }

    /// Report the score after one more resource unit.
    ///
    /// Returns `true` when the run should stop: it was pruned now or earlier,
    /// or it already completed.
    pub fn stop(&mut self, score: f64) -> RoResult<bool> {
        if self.status != RunStatus::Active {
            return Ok(true);
        }

        self.step += 1;
        if self.step % self.next_update != 0 {
            self.results.push(score);
            self.persist()?;
            return Ok(false);
        }

        if !self.survives(score)? {
            self.status = RunStatus::Pruned;
            self.persist()?;
            info!(
                "Pruned HyperBand run at step {} (rung {}, score {})",
                self.step, self.rung, score
            );
            return Ok(true);
        }

        self.rung += 1;
        self.next_update = self.schedule.rung_length(&self.bracket, self.rung);
        self.survivors = self.schedule.rung_survivors(&self.bracket, self.rung);
        self.results.push(score);
        self.persist()?;
        debug!(
            "Promoted to rung {} at step {} (next decision every {} steps)",
            self.rung, self.step, self.next_update
        );
        Ok(false)
    }

    /// Whether `score` ranks within the surviving fraction among the peers
    /// that have reported this step. With no such peers there is nothing to
    /// compare against and the run survives.
    fn survives(&self, score: f64) -> RoResult<bool> {
        let index = (self.step - 1) as usize;
        let peers: Vec<f64> = load_runs(&self.dir)?
            .into_iter()
            .filter(|(path, _)| path != &self.run_path)
            .filter_map(|(_, run)| run.results.get(index).copied())
            .collect();
        if peers.is_empty() {
            return Ok(true);
        }

        let ahead = peers
            .iter()
            .filter(|&&peer| self.config.objective.improves(peer, score))
            .count() as u64;
        debug!(
            "Rung check at step {}: {} of {} peers ahead, {} may be",
            self.step,
            ahead,
            peers.len(),
            self.survivors.max(1)
        );
        Ok(ahead < self.survivors.max(1))
    }

    fn persist(&self) -> RoResult<()> {
        let run = BracketRun {
            s: self.bracket.s,
            n: self.bracket.n,
            r: self.bracket.r,
            num_iter: self.schedule.num_iter(),
            i: self.rung,
            status: self.status,
            results: self.results.clone(),
            params: self.experiment.current().clone(),
        };
        let tmp = self.run_path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&run)?)?;
        fs::rename(&tmp, &self.run_path)?;
        Ok(())
    }
}

impl SearchStrategy for HyperBand {
    fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    fn sample(&mut self, name: &str) -> RoResult<ParameterValue> {
        self.experiment.sample(name)
    }

    fn sample_all(&mut self) -> RoResult<Assignment> {
        self.experiment.sample_all()
    }

    /// Record the final score and mark the run completed.
    fn add_result_with(
        &mut self,
        result: f64,
        data: Map<String, Value>,
        attachment: Option<Value>,
    ) -> RoResult<RecordId> {
        let id = self.experiment.add_result_with(result, data, attachment)?;
        if self.status == RunStatus::Active {
            self.status = RunStatus::Completed;
            if self.run_path.exists() {
                self.persist()?;
            }
        }
        Ok(id)
    }

    fn strategy_name(&self) -> &str {
        "hyperband"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{SeedSource, Uniform};
    use ro_types::RoError;
    use tempfile::TempDir;

    fn experiment(tmp: &TempDir, seeds: &mut SeedSource) -> Experiment {
        Experiment::builder("hb")
            .root(tmp.path())
            .param("alpha", Uniform::new(0.0, 0.01, seeds))
            .build()
            .unwrap()
    }

    fn run(tmp: &TempDir, seeds: &mut SeedSource, config: HyperBandConfig) -> HyperBand {
        HyperBand::new(experiment(tmp, seeds), config).unwrap()
    }

    #[test]
    fn schedule_for_eta_two_and_eight_units() {
        let schedule = HyperBandSchedule::new(8, 2.0).unwrap();
        assert_eq!(schedule.s_max(), 3);
        assert_eq!(schedule.budget(), 32);

        let expected = [(0, 4, 8.0), (1, 4, 4.0), (2, 6, 2.0), (3, 8, 1.0)];
        for (s, n, r) in expected {
            assert_eq!(schedule.bracket(s), Bracket { s, n, r }, "bracket {s}");
        }
    }

    #[test]
    fn schedule_default_eta() {
        let schedule = HyperBandSchedule::new(10, std::f64::consts::E).unwrap();
        assert_eq!(schedule.s_max(), 2);
        assert_eq!(schedule.budget(), 30);
        // ceil(30 / 10 / 3 * e^2) = ceil(7.389) = 8
        assert_eq!(schedule.bracket(2).n, 8);
    }

    #[test]
    fn schedule_survives_log_rounding() {
        // ln(1000) / ln(10) is slightly below 3 in floating point.
        let schedule = HyperBandSchedule::new(1000, 10.0).unwrap();
        assert_eq!(schedule.s_max(), 3);
        assert!((schedule.bracket(3).r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn schedule_rejects_bad_parameters() {
        for (num_iter, eta) in [(8, 1.0), (8, 0.5), (8, f64::NAN), (0, 2.0)] {
            match HyperBandSchedule::new(num_iter, eta) {
                Err(RoError::Search(SearchError::InvalidBracket { .. })) => {}
                other => panic!("Expected InvalidBracket for ({num_iter}, {eta}), got: {other:?}"),
            }
        }
    }

    #[test]
    fn rung_formulas() {
        let schedule = HyperBandSchedule::new(8, 2.0).unwrap();
        let bracket = schedule.bracket(3);
        assert_eq!(schedule.rung_length(&bracket, 0), 1);
        assert_eq!(schedule.rung_length(&bracket, 2), 4);
        assert_eq!(schedule.rung_survivors(&bracket, 0), 4);
        assert_eq!(schedule.rung_survivors(&bracket, 1), 2);
        assert_eq!(schedule.rung_survivors(&bracket, 2), 1);
        assert_eq!(schedule.rung_survivors(&bracket, 3), 0);
    }

    #[test]
    fn first_run_takes_largest_bracket_then_balances() {
        let tmp = TempDir::new().unwrap();
        let mut seeds = SeedSource::new(1);
        let config = HyperBandConfig::new(8).with_eta(2.0);

        for _ in 0..4 {
            let mut hb = run(&tmp, &mut seeds, config.clone());
            assert_eq!(hb.bracket().s, 3);
            hb.stop(1.0).unwrap();
        }
        let hb = run(&tmp, &mut seeds, config);
        assert_eq!(hb.bracket().s, 2);
    }

    #[test]
    fn forced_bracket_out_of_range_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut seeds = SeedSource::new(1);
        let result = HyperBand::new(
            experiment(&tmp, &mut seeds),
            HyperBandConfig::new(8).with_eta(2.0).with_bracket(4),
        );
        assert!(matches!(
            result,
            Err(RoError::Search(SearchError::InvalidBracket { .. }))
        ));
    }

    #[test]
    fn lone_run_is_never_pruned() {
        let tmp = TempDir::new().unwrap();
        let mut seeds = SeedSource::new(2);
        let mut hb = run(&tmp, &mut seeds, HyperBandConfig::new(8).with_eta(2.0).with_bracket(3));
        assert_eq!(hb.next_update(), 1);
        assert!(!hb.stop(100.0).unwrap());
        assert_eq!(hb.rung(), 1);
        assert_eq!(hb.next_update(), 2);
    }

    #[test]
    fn run_outside_survivors_is_pruned() {
        let tmp = TempDir::new().unwrap();
        let mut seeds = SeedSource::new(3);
        let config = HyperBandConfig::new(8).with_eta(2.0).with_bracket(3);

        for score in [1.0, 2.0, 3.0, 4.0] {
            let mut peer = run(&tmp, &mut seeds, config.clone());
            assert!(!peer.stop(score).unwrap());
        }

        let mut worse = run(&tmp, &mut seeds, config.clone());
        assert_eq!(worse.survivors(), 4);
        assert!(worse.stop(10.0).unwrap());
        assert_eq!(worse.status(), RunStatus::Pruned);
        assert!(worse.stop(0.0).unwrap());

        let mut better = run(&tmp, &mut seeds, config);
        assert!(!better.stop(2.5).unwrap());
        assert_eq!(better.status(), RunStatus::Active);
        assert_eq!(better.rung(), 1);
    }

    #[test]
    fn later_rungs_keep_a_smaller_fraction() {
        let tmp = TempDir::new().unwrap();
        let mut seeds = SeedSource::new(9);
        let config = HyperBandConfig::new(8).with_eta(2.0).with_bracket(3);

        // Written best-last so every peer clears its own second decision.
        for score in [5.0, 4.0, 3.0, 2.0, 1.0] {
            let mut peer = run(&tmp, &mut seeds, config.clone());
            assert!(!peer.stop(1.0).unwrap());
            assert!(!peer.stop(score).unwrap());
            assert_eq!(peer.rung(), 2);
        }

        let mut worst = run(&tmp, &mut seeds, config.clone());
        assert!(!worst.stop(1.0).unwrap());
        assert_eq!(worst.rung(), 1);
        assert_eq!(worst.survivors(), 2);
        assert_eq!(worst.next_update(), 2);
        assert!(worst.stop(1000.0).unwrap());
        assert_eq!(worst.status(), RunStatus::Pruned);
        assert_eq!(worst.results(), &[1.0]);

        let mut runner_up = run(&tmp, &mut seeds, config);
        assert!(!runner_up.stop(1.0).unwrap());
        assert!(!runner_up.stop(1.5).unwrap());
        assert_eq!(runner_up.rung(), 2);
        assert_eq!(runner_up.survivors(), 1);
    }

    #[test]
    fn maximizing_runs_prune_low_scores() {
        let tmp = TempDir::new().unwrap();
        let mut seeds = SeedSource::new(4);
        let config = HyperBandConfig::new(8)
            .with_eta(2.0)
            .with_bracket(3)
            .with_objective(ObjectiveDirection::Maximize);

        for score in [5.0, 6.0, 7.0, 8.0] {
            run(&tmp, &mut seeds, config.clone()).stop(score).unwrap();
        }
        assert!(run(&tmp, &mut seeds, config.clone()).stop(1.0).unwrap());
        assert!(!run(&tmp, &mut seeds, config).stop(9.0).unwrap());
    }

    #[test]
    fn steps_between_rungs_continue() {
        let tmp = TempDir::new().unwrap();
        let mut seeds = SeedSource::new(5);
        let mut hb = run(&tmp, &mut seeds, HyperBandConfig::new(8).with_eta(2.0).with_bracket(0));
        assert_eq!(hb.next_update(), 8);
        for epoch in 0..7 {
            assert!(!hb.stop(epoch as f64).unwrap());
        }
        assert_eq!(hb.rung(), 0);
        assert_eq!(hb.results().len(), 7);
    }

    #[test]
    fn completed_run_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let mut seeds = SeedSource::new(6);
        let mut hb = run(&tmp, &mut seeds, HyperBandConfig::new(4).with_eta(2.0).with_bracket(0));
        let mut loss = 1.0;
        for _ in 0..4 {
            loss *= 0.5;
            assert!(!hb.stop(loss).unwrap());
        }
        hb.add_result(loss).unwrap();
        assert_eq!(hb.status(), RunStatus::Completed);
        assert_eq!(hb.experiment().count().unwrap(), 1);

        let runs = load_runs(&tmp.path().join("hb").join(HYPERBAND_DIR)).unwrap();
        assert_eq!(runs.len(), 1);
        let (_, stored) = &runs[0];
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.results, vec![0.5, 0.25, 0.125, 0.0625]);
        assert_eq!(stored.num_iter, 4);
        assert!(stored.params.contains_key("alpha"));
    }

    #[test]
    fn run_file_layout() {
        let tmp = TempDir::new().unwrap();
        let mut seeds = SeedSource::new(7);
        let mut hb = run(&tmp, &mut seeds, HyperBandConfig::new(8).with_eta(2.0).with_bracket(2));
        hb.stop(0.75).unwrap();

        let raw: Value = serde_json::from_slice(&fs::read(hb.run_path()).unwrap()).unwrap();
        for key in ["s", "n", "r", "num_iter", "i", "status", "results", "alpha"] {
            assert!(raw.get(key).is_some(), "missing {key}");
        }
        assert_eq!(raw["s"], 2);
        assert_eq!(raw["n"], 6);
        assert_eq!(raw["results"], serde_json::json!([0.75]));
    }

    #[test]
    fn torn_peer_files_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let mut seeds = SeedSource::new(8);
        let mut hb = run(&tmp, &mut seeds, HyperBandConfig::new(8).with_eta(2.0).with_bracket(3));
        fs::write(tmp.path().join("hb").join(HYPERBAND_DIR).join("torn.json"), b"{\"s\": 3,").unwrap();
        assert!(!hb.stop(50.0).unwrap());
    }
}
