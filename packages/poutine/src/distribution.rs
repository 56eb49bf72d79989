//! Interface to the distribution collaborator, plus the internal `Subsample`
//! pseudo-distribution used by `iarange` and `irange`.

use std::collections::BTreeMap;
use std::fmt;

use rand::seq::SliceRandom;
use rand::RngCore;

use crate::error::{PoutineError, Result};
use crate::tensor::Tensor;

/// Arguments forwarded to a distribution when no handler supplies a value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Tensor>,
    pub keyword: BTreeMap<String, Tensor>,
    pub sample_shape: Vec<usize>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: Tensor) -> Self {
        self.positional.push(value);
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: Tensor) -> Self {
        self.keyword.insert(key.into(), value);
        self
    }

    pub fn sample_shape(mut self, shape: &[usize]) -> Self {
        self.sample_shape = shape.to_vec();
        self
    }
}

/// A stochastic function: something that can be sampled and scored.
///
/// Implementations may themselves call `sample`/`param`; the rng handed to
/// them borrows the thread's generator only for the duration of each draw.
pub trait Distribution: fmt::Debug {
    fn sample(&self, args: &Args, rng: &mut dyn RngCore) -> Result<Tensor>;

    fn log_prob(&self, value: &Tensor) -> Result<Tensor>;

    fn name(&self) -> &str {
        "Distribution"
    }
}

/// Randomly select a subsample of a range of indices.
///
/// Internal use only; `iarange` and `irange` route draws of this through the
/// `sample` primitive so handlers see them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subsample {
    pub size: usize,
    pub subsample_size: Option<usize>,
}

impl Subsample {
    pub fn new(size: usize, subsample_size: Option<usize>) -> Self {
        Subsample {
            size,
            subsample_size,
        }
    }

    fn effective_size(&self) -> usize {
        match self.subsample_size {
            Some(n) if n <= self.size => n,
            _ => self.size,
        }
    }
}

impl Distribution for Subsample {
    fn sample(&self, args: &Args, rng: &mut dyn RngCore) -> Result<Tensor> {
        if !args.sample_shape.is_empty() {
            return Err(PoutineError::unsupported_shape(&args.sample_shape));
        }
        let n = self.effective_size();
        if n == self.size {
            return Ok(Tensor::arange(self.size));
        }
        let mut indices: Vec<usize> = (0..self.size).collect();
        indices.shuffle(rng);
        indices.truncate(n);
        Ok(Tensor::from_indices(&indices))
    }

    // Zero so that iarange provides an unbiased estimate of the
    // non-subsampled log_prob.
    fn log_prob(&self, _value: &Tensor) -> Result<Tensor> {
        Ok(Tensor::zeros(&[1]))
    }

    fn name(&self) -> &str {
        "_Subsample"
    }
}
