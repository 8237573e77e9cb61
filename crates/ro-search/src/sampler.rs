//! Parameter samplers.
//!
//! Every sampler owns a private ChaCha generator, so reseeding one parameter
//! never disturbs another. Initial seeds are drawn from a [`SeedSource`]
//! created once by the caller and passed in at construction.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use ro_types::{validation_error, ParameterValue, RoResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Capability every parameter sampler provides.
pub trait Sampler: Send + fmt::Debug {
    /// Draw the next value.
    fn sample(&mut self) -> ParameterValue;

    /// Restart the sample sequence from `seed`.
    fn seed(&mut self, seed: u64);

    /// Opaque snapshot of the generator position.
    fn state(&self) -> SamplerState;

    /// Resume from a snapshot taken with [`Sampler::state`].
    fn set_state(&mut self, state: &SamplerState);

    /// The finite domain, for samplers that have one.
    fn choices(&self) -> Option<&[ParameterValue]> {
        None
    }
}

/// Serializable generator position: seed, stream and word offset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerState {
    seed: [u8; 32],
    stream: u64,
    word_pos: u128,
}

/// Private generator owned by one sampler.
#[derive(Debug, Clone)]
pub struct SamplerRng {
    rng: ChaCha8Rng,
}

impl SamplerRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn state(&self) -> SamplerState {
        SamplerState {
            seed: self.rng.get_seed(),
            stream: self.rng.get_stream(),
            word_pos: self.rng.get_word_pos(),
        }
    }

    pub fn restore(&mut self, state: &SamplerState) {
        let mut rng = ChaCha8Rng::from_seed(state.seed);
        rng.set_stream(state.stream);
        rng.set_word_pos(state.word_pos);
        self.rng = rng;
    }

    /// Uniform draw in `[low, high)`.
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.rng.gen::<f64>()
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// One draw from `dist`.
    pub fn draw<D: Distribution<f64>>(&mut self, dist: &D) -> f64 {
        dist.sample(&mut self.rng)
    }
}

/// Process-wide seed generator, created once and passed to sampler
/// constructors to diversify their initial seeds.
#[derive(Debug, Clone)]
pub struct SeedSource {
    rng: ChaCha8Rng,
}

impl SeedSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Seeded from the operating system's entropy.
    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    /// A fresh, independent generator for one sampler.
    pub fn fork(&mut self) -> SamplerRng {
        SamplerRng::from_seed(self.rng.gen())
    }
}

/// Numeric representation of a drawn value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    Float,
    /// Truncated toward zero.
    Int,
}

fn numeric(value: f64, dtype: Dtype) -> ParameterValue {
    match dtype {
        Dtype::Float => Value::from(value),
        Dtype::Int => Value::from(value.trunc() as i64),
    }
}

/// Uniform over `[low, high)`.
#[derive(Debug, Clone)]
pub struct Uniform {
    low: f64,
    high: f64,
    dtype: Dtype,
    rng: SamplerRng,
}

impl Uniform {
    pub fn new(low: f64, high: f64, seeds: &mut SeedSource) -> Self {
        Self {
            low,
            high,
            dtype: Dtype::Float,
            rng: seeds.fork(),
        }
    }

    pub fn int(low: f64, high: f64, seeds: &mut SeedSource) -> Self {
        Self {
            dtype: Dtype::Int,
            ..Self::new(low, high, seeds)
        }
    }
}

impl Sampler for Uniform {
    fn sample(&mut self) -> ParameterValue {
        numeric(self.rng.uniform(self.low, self.high), self.dtype)
    }

    fn seed(&mut self, seed: u64) {
        self.rng.reseed(seed);
    }

    fn state(&self) -> SamplerState {
        self.rng.state()
    }

    fn set_state(&mut self, state: &SamplerState) {
        self.rng.restore(state);
    }
}

/// Log-uniform over `[low, high)`; both bounds must be positive.
#[derive(Debug, Clone)]
pub struct LogUniform {
    low: f64,
    high: f64,
    rng: SamplerRng,
}

impl LogUniform {
    pub fn new(low: f64, high: f64, seeds: &mut SeedSource) -> Self {
        Self {
            low,
            high,
            rng: seeds.fork(),
        }
    }
}

impl Sampler for LogUniform {
    fn sample(&mut self) -> ParameterValue {
        let log_val = self.rng.uniform(self.low.ln(), self.high.ln());
        Value::from(log_val.exp())
    }

    fn seed(&mut self, seed: u64) {
        self.rng.reseed(seed);
    }

    fn state(&self) -> SamplerState {
        self.rng.state()
    }

    fn set_state(&mut self, state: &SamplerState) {
        self.rng.restore(state);
    }
}

/// Normal distribution.
#[derive(Debug, Clone)]
pub struct Gaussian {
    normal: Normal<f64>,
    dtype: Dtype,
    rng: SamplerRng,
}

impl Gaussian {
    /// Fails on a non-finite mean, or a negative or non-finite `std`.
    pub fn new(mean: f64, std: f64, seeds: &mut SeedSource) -> RoResult<Self> {
        if !mean.is_finite() {
            return Err(validation_error!("gaussian mean must be finite, got {}", mean));
        }
        let normal = Normal::new(mean, std)
            .map_err(|e| validation_error!("gaussian std {}: {}", std, e))?;
        Ok(Self {
            normal,
            dtype: Dtype::Float,
            rng: seeds.fork(),
        })
    }

    pub fn int(mean: f64, std: f64, seeds: &mut SeedSource) -> RoResult<Self> {
        Ok(Self {
            dtype: Dtype::Int,
            ..Self::new(mean, std, seeds)?
        })
    }
}

impl Sampler for Gaussian {
    fn sample(&mut self) -> ParameterValue {
        numeric(self.rng.draw(&self.normal), self.dtype)
    }

    fn seed(&mut self, seed: u64) {
        self.rng.reseed(seed);
    }

    fn state(&self) -> SamplerState {
        self.rng.state()
    }

    fn set_state(&mut self, state: &SamplerState) {
        self.rng.restore(state);
    }
}

/// Uniform choice over a fixed list. The only kind of sampler besides
/// [`Constant`] with an enumerable domain.
#[derive(Debug, Clone)]
pub struct Choice {
    values: Vec<ParameterValue>,
    rng: SamplerRng,
}

impl Choice {
    pub fn new<V: Into<ParameterValue>>(values: Vec<V>, seeds: &mut SeedSource) -> Self {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            rng: seeds.fork(),
        }
    }
}

impl Sampler for Choice {
    fn sample(&mut self) -> ParameterValue {
        if self.values.is_empty() {
            return Value::Null;
        }
        let idx = self.rng.index(self.values.len());
        self.values[idx].clone()
    }

    fn seed(&mut self, seed: u64) {
        self.rng.reseed(seed);
    }

    fn state(&self) -> SamplerState {
        self.rng.state()
    }

    fn set_state(&mut self, state: &SamplerState) {
        self.rng.restore(state);
    }

    fn choices(&self) -> Option<&[ParameterValue]> {
        Some(&self.values)
    }
}

/// Always the same value.
#[derive(Debug, Clone)]
pub struct Constant {
    value: [ParameterValue; 1],
}

impl Constant {
    pub fn new(value: impl Into<ParameterValue>) -> Self {
        Self {
            value: [value.into()],
        }
    }
}

impl Sampler for Constant {
    fn sample(&mut self) -> ParameterValue {
        self.value[0].clone()
    }

    fn seed(&mut self, _seed: u64) {}

    fn state(&self) -> SamplerState {
        SamplerState::default()
    }

    fn set_state(&mut self, _state: &SamplerState) {}

    fn choices(&self) -> Option<&[ParameterValue]> {
        Some(&self.value)
    }
}
