//! # ro-search
//!
//! Search contexts and sampling strategies for randopt.
//!
//! An [`Experiment`] binds named samplers to a record store and tracks the
//! current assignment. Random search is the experiment itself; [`GridSearch`],
//! [`Evolutionary`] and [`HyperBand`] wrap one and use the stored records to
//! decide what to try next.

pub mod evolutionary;
pub mod experiment;
pub mod grid;
pub mod hyperband;
pub mod sampler;
pub mod strategy;

pub use evolutionary::{Evolutionary, BASELINE_VALUE};
pub use experiment::{Experiment, ExperimentBuilder};
pub use grid::{GridIndex, GridSearch};
pub use hyperband::{
    Bracket, BracketRun, HyperBand, HyperBandConfig, HyperBandSchedule, RunStatus, HYPERBAND_DIR,
};
pub use sampler::{
    Choice, Constant, Dtype, Gaussian, LogUniform, Sampler, SamplerRng, SamplerState, SeedSource,
    Uniform,
};
pub use strategy::SearchStrategy;
