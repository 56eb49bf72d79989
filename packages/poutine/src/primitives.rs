//! The `sample` and `param` primitives.
//!
//! With no handler active both primitives act directly: `sample` draws from
//! the distribution (or returns the observation, with a warning) and `param`
//! reads the parameter store. Otherwise they build a [`Message`] and send it
//! through the stack.

use std::rc::Rc;

use crate::config::OutsideInferencePolicy;
use crate::context::{active_cond_indep_stack, am_i_wrapped, current_config, emit_warning, with_param_store, ContextRng};
use crate::dispatch::apply_stack;
use crate::distribution::{Args, Distribution};
use crate::error::{PoutineError, PoutineWarning, Result};
use crate::message::{Infer, Message};
use crate::tensor::Tensor;

#[derive(Debug, Clone, Default)]
pub struct SampleOptions {
    pub obs: Option<Tensor>,
    pub infer: Infer,
    pub args: Args,
}

impl SampleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn obs(mut self, value: Tensor) -> Self {
        self.obs = Some(value);
        self
    }

    pub fn infer(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.infer.insert(key.into(), value);
        self
    }

    pub fn args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParamOptions {
    pub init: Option<Tensor>,
    pub tags: Vec<String>,
}

impl ParamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(mut self, value: Tensor) -> Self {
        self.init = Some(value);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Draw a latent value for site `name`.
pub fn sample(name: &str, dist: Rc<dyn Distribution>) -> Result<Tensor> {
    sample_with(name, dist, SampleOptions::new())
}

/// Condition site `name` on `obs`.
pub fn observe(name: &str, dist: Rc<dyn Distribution>, obs: Tensor) -> Result<Tensor> {
    sample_with(name, dist, SampleOptions::new().obs(obs))
}

pub fn sample_with(name: &str, dist: Rc<dyn Distribution>, options: SampleOptions) -> Result<Tensor> {
    let SampleOptions { obs, infer, args } = options;

    if !am_i_wrapped() {
        if let Some(obs) = obs {
            return match current_config().outside_inference {
                OutsideInferencePolicy::Warn => {
                    emit_warning(PoutineWarning::OutsideInference {
                        name: name.to_string(),
                    });
                    Ok(obs)
                }
                OutsideInferencePolicy::Error => Err(PoutineError::OutsideInference {
                    name: name.to_string(),
                }),
            };
        }
        return dist.sample(&args, &mut ContextRng);
    }

    let mut msg = Message::sample(name, dist, args);
    msg.infer = infer;
    msg.cond_indep_stack = active_cond_indep_stack();
    if let Some(obs) = obs {
        msg.observe(obs);
    }
    apply_stack(&mut msg)?;
    msg.value.ok_or_else(|| PoutineError::Unresolved {
        name: name.to_string(),
    })
}

/// Read (or create from `init`) the learnable parameter `name`.
pub fn param(name: &str, init: Option<Tensor>) -> Result<Tensor> {
    param_with(name, ParamOptions { init, tags: Vec::new() })
}

pub fn param_with(name: &str, options: ParamOptions) -> Result<Tensor> {
    let ParamOptions { init, tags } = options;

    if !am_i_wrapped() {
        return with_param_store(|store| store.get_param(name, init, &tags));
    }

    let mut msg = Message::param(name, init, tags);
    msg.cond_indep_stack = active_cond_indep_stack();
    apply_stack(&mut msg)?;
    msg.value.ok_or_else(|| PoutineError::Unresolved {
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    use crate::config::Config;
    use crate::context::{clear_param_store, configure, push_handler, reset, take_warnings};
    use crate::handler::Handler;
    use crate::trace::TraceMessenger;

    #[derive(Debug)]
    struct Fixed(f64);

    impl Distribution for Fixed {
        fn sample(&self, _args: &Args, _rng: &mut dyn RngCore) -> Result<Tensor> {
            Ok(Tensor::scalar(self.0))
        }

        fn log_prob(&self, _value: &Tensor) -> Result<Tensor> {
            Ok(Tensor::scalar(0.0))
        }
    }

    fn setup() {
        reset();
        configure(Config::default());
    }

    #[test]
    fn test_unwrapped_sample_draws_directly() {
        setup();
        assert_eq!(sample("x", Rc::new(Fixed(2.0))).unwrap(), Tensor::scalar(2.0));
        assert!(take_warnings().is_empty());
    }

    #[test]
    fn test_unwrapped_observe_warns_and_returns_observation() {
        setup();
        let value = observe("obs", Rc::new(Fixed(2.0)), Tensor::scalar(7.0)).unwrap();
        assert_eq!(value, Tensor::scalar(7.0));
        assert_eq!(
            take_warnings(),
            vec![PoutineWarning::OutsideInference {
                name: "obs".to_string()
            }]
        );
    }

    #[test]
    fn test_unwrapped_observe_can_be_an_error() {
        reset();
        configure(Config {
            outside_inference: OutsideInferencePolicy::Error,
            ..Config::default()
        });
        let err = observe("obs", Rc::new(Fixed(2.0)), Tensor::scalar(7.0)).unwrap_err();
        assert!(matches!(err, PoutineError::OutsideInference { .. }));
        configure(Config::default());
    }

    #[test]
    fn test_wrapped_observe_does_not_warn() {
        setup();
        let _trace = push_handler(Handler::Trace(TraceMessenger::new()));
        let value = observe("obs", Rc::new(Fixed(2.0)), Tensor::scalar(7.0)).unwrap();
        assert_eq!(value, Tensor::scalar(7.0));
        assert!(take_warnings().is_empty());
    }

    #[test]
    fn test_infer_is_recorded() {
        setup();
        let messenger = TraceMessenger::new();
        let recorded = messenger.trace();
        let _trace = push_handler(Handler::Trace(messenger));
        let options = SampleOptions::new().infer("enumerate", serde_json::json!("parallel"));
        sample_with("z", Rc::new(Fixed(1.0)), options).unwrap();
        let trace = recorded.borrow();
        let site = trace.get("z").unwrap();
        assert_eq!(site.infer["enumerate"], serde_json::json!("parallel"));
    }

    #[test]
    fn test_param_unwrapped_and_wrapped_share_the_store() {
        setup();
        clear_param_store();
        let first = param("loc", Some(Tensor::scalar(0.25))).unwrap();
        let _trace = push_handler(Handler::Trace(TraceMessenger::new()));
        let second = param("loc", Some(Tensor::scalar(9.0))).unwrap();
        assert_eq!(first, second);
        clear_param_store();
    }

    #[test]
    fn test_param_without_init_is_not_found() {
        setup();
        clear_param_store();
        let err = param_with("missing", ParamOptions::new().tag("default")).unwrap_err();
        assert!(matches!(err, PoutineError::ParamNotFound { .. }));
    }
}
