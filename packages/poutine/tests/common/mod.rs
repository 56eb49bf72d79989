#![allow(dead_code)]

use std::rc::Rc;

use poutine::{Args, Config, Distribution, PoutineError, Tensor};
use rand::{Rng, RngCore};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
    poutine::reset();
    poutine::configure(Config::default());
    poutine::clear_param_store();
}

/// Always returns the same value.
#[derive(Debug, Clone)]
pub struct Fixed(pub f64);

impl Distribution for Fixed {
    fn sample(&self, _args: &Args, _rng: &mut dyn RngCore) -> Result<Tensor, PoutineError> {
        Ok(Tensor::scalar(self.0))
    }

    fn log_prob(&self, _value: &Tensor) -> Result<Tensor, PoutineError> {
        Ok(Tensor::scalar(0.0))
    }

    fn name(&self) -> &str {
        "Fixed"
    }
}

/// Uniform on `[low, high)`.
#[derive(Debug, Clone)]
pub struct Uniform {
    pub low: f64,
    pub high: f64,
}

impl Distribution for Uniform {
    fn sample(&self, _args: &Args, rng: &mut dyn RngCore) -> Result<Tensor, PoutineError> {
        Ok(Tensor::scalar(rng.gen_range(self.low..self.high)))
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor, PoutineError> {
        let inside = value.data().iter().all(|v| (self.low..self.high).contains(v));
        let density = if inside {
            -(self.high - self.low).ln()
        } else {
            f64::NEG_INFINITY
        };
        Ok(Tensor::scalar(density))
    }

    fn name(&self) -> &str {
        "Uniform"
    }
}

pub fn fixed(value: f64) -> Rc<dyn Distribution> {
    Rc::new(Fixed(value))
}

pub fn uniform() -> Rc<dyn Distribution> {
    Rc::new(Uniform { low: 0.0, high: 1.0 })
}

pub fn no_dims_held() -> bool {
    poutine::context::dim_occupancy().is_empty()
}
