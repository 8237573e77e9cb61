//! Store configuration.

use ro_types::{config_error, RoResult};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Environment variable overriding the results root directory.
pub const ROOT_ENV_VAR: &str = "RANDOPT_DIR";

/// Where experiments live and how they are read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one sub-directory per experiment.
    pub root: PathBuf,
    /// Record-file count at which full listings are parsed in parallel.
    pub parallel_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("randopt_results"),
            parallel_threshold: 1000,
        }
    }
}

impl StoreConfig {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Default configuration with the root taken from `RANDOPT_DIR` when set.
    pub fn from_env() -> Self {
        match std::env::var_os(ROOT_ENV_VAR) {
            Some(root) if !root.is_empty() => Self::new(root),
            _ => Self::default(),
        }
    }

    pub fn with_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Directory of the named experiment.
    pub fn experiment_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Reject an empty root, or an experiment name that is not a single
    /// plain path component.
    pub fn validate(&self, name: &str) -> RoResult<()> {
        if self.root.as_os_str().is_empty() {
            return Err(config_error!("results root must not be empty"));
        }
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(()),
            _ => Err(config_error!("invalid experiment name: {:?}", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_is_relative_results_dir() {
        let config = StoreConfig::default();
        assert_eq!(config.root, PathBuf::from("randopt_results"));
        assert_eq!(config.parallel_threshold, 1000);
    }

    #[test]
    fn builder_chain() {
        let config = StoreConfig::new("/tmp/ro")
            .with_parallel_threshold(10)
            .with_root("/var/ro");
        assert_eq!(config.root, PathBuf::from("/var/ro"));
        assert_eq!(config.parallel_threshold, 10);
        assert_eq!(config.experiment_dir("quad"), PathBuf::from("/var/ro/quad"));
    }

    #[test]
    fn experiment_names_are_single_components() {
        let config = StoreConfig::new("results");
        assert!(config.validate("quadratic").is_ok());
        for bad in ["", ".", "..", "a/b", "/abs"] {
            assert!(config.validate(bad).is_err(), "accepted {bad:?}");
        }
        assert!(StoreConfig::new("").validate("quadratic").is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = StoreConfig::new("results").with_parallel_threshold(5);
        let json = serde_json::to_string(&config).unwrap();
        let back: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
