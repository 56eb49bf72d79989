//! Registering the parameters of a container (e.g. a network) in bulk.

use crate::context::with_handler;
use crate::error::{PoutineError, Result};
use crate::handler::{Handler, LiftMessenger, Prior};
use crate::param_store::{param_with_module_name, MODULE_NAMESPACE_DIVIDER};
use crate::primitives::{param_with, ParamOptions};
use crate::tensor::Tensor;

/// Something that owns named learnable tensors.
pub trait ParamContainer {
    fn named_parameters(&self) -> Vec<(String, Tensor)>;

    fn set_parameter(&mut self, name: &str, value: Tensor) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct ModuleOptions {
    pub tags: Vec<String>,
    /// Write the values the stack returned back into the container.
    pub update_module_params: bool,
}

impl ModuleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn update_module_params(mut self, update: bool) -> Self {
        self.update_module_params = update;
        self
    }
}

/// Register every parameter of `container` as `param("{name}$$${param}")`.
///
/// Each parameter goes through the stack, so an enclosing `lift` turns it
/// into a sample. When `update_module_params` is set, any parameter whose
/// returned tensor is not the one the container holds is written back.
pub fn module<M>(name: &str, container: &mut M, options: &ModuleOptions) -> Result<()>
where
    M: ParamContainer + ?Sized,
{
    if name.contains(MODULE_NAMESPACE_DIVIDER) {
        return Err(PoutineError::InvalidModuleName {
            name: name.to_string(),
            divider: MODULE_NAMESPACE_DIVIDER,
        });
    }

    let mut updates = Vec::new();
    for (param_name, value) in container.named_parameters() {
        let qualified = param_with_module_name(name, &param_name);
        let returned = param_with(
            &qualified,
            ParamOptions {
                init: Some(value.clone()),
                tags: options.tags.clone(),
            },
        )?;
        if !returned.ptr_eq(&value) {
            updates.push((param_name, returned));
        }
    }

    if options.update_module_params {
        for (param_name, value) in updates {
            log::debug!("updating '{param_name}' of module '{name}'");
            container.set_parameter(&param_name, value)?;
        }
    }
    Ok(())
}

/// Build a sampler of random containers: each call clones `container` and
/// replaces its parameters with draws from `prior`.
pub fn random_module<M>(name: impl Into<String>, container: M, prior: Prior) -> impl Fn() -> Result<M>
where
    M: ParamContainer + Clone,
{
    let name = name.into();
    let options = ModuleOptions::new().update_module_params(true);
    move || {
        let mut sampled = container.clone();
        with_handler(Handler::Lift(LiftMessenger::new(prior.clone())), || {
            module(&name, &mut sampled, &options)
        })?;
        Ok(sampled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{clear_param_store, reset, with_param_store};

    #[derive(Debug, Clone)]
    struct Linear {
        weight: Tensor,
        bias: Tensor,
    }

    impl ParamContainer for Linear {
        fn named_parameters(&self) -> Vec<(String, Tensor)> {
            vec![
                ("weight".to_string(), self.weight.clone()),
                ("bias".to_string(), self.bias.clone()),
            ]
        }

        fn set_parameter(&mut self, name: &str, value: Tensor) -> Result<()> {
            match name {
                "weight" => self.weight = value,
                "bias" => self.bias = value,
                other => {
                    return Err(PoutineError::ParamNotFound {
                        name: other.to_string(),
                    })
                }
            }
            Ok(())
        }
    }

    fn linear(w: f64, b: f64) -> Linear {
        Linear {
            weight: Tensor::scalar(w),
            bias: Tensor::scalar(b),
        }
    }

    #[test]
    fn test_rejects_divider_in_name() {
        reset();
        let err = module("a$$$b", &mut linear(1.0, 0.0), &ModuleOptions::new()).unwrap_err();
        assert!(matches!(err, PoutineError::InvalidModuleName { .. }));
    }

    #[test]
    fn test_registers_qualified_names() {
        reset();
        clear_param_store();
        module("net", &mut linear(1.0, 0.0), &ModuleOptions::new().tag("nn")).unwrap();
        let names = with_param_store(|store| store.names());
        assert_eq!(names, vec!["net$$$weight".to_string(), "net$$$bias".to_string()]);
        let tags = with_param_store(|store| store.param_tags("net$$$bias"));
        assert_eq!(tags, vec!["nn".to_string()]);
        clear_param_store();
    }

    #[test]
    fn test_update_writes_back_stored_values() {
        reset();
        clear_param_store();
        module("net", &mut linear(1.0, 0.0), &ModuleOptions::new()).unwrap();

        let mut fresh = linear(5.0, 5.0);
        module("net", &mut fresh, &ModuleOptions::new().update_module_params(true)).unwrap();
        assert_eq!(fresh.weight, Tensor::scalar(1.0));
        assert_eq!(fresh.bias, Tensor::scalar(0.0));
        clear_param_store();
    }

    #[test]
    fn test_without_update_container_is_untouched() {
        reset();
        clear_param_store();
        module("net", &mut linear(1.0, 0.0), &ModuleOptions::new()).unwrap();
        let mut fresh = linear(5.0, 5.0);
        module("net", &mut fresh, &ModuleOptions::new()).unwrap();
        assert_eq!(fresh.weight, Tensor::scalar(5.0));
        clear_param_store();
    }
}
