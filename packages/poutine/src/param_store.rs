//! Parameter store interface and the in-memory store used by default.

use std::collections::{BTreeSet, HashMap};

use crate::error::{PoutineError, Result};
use crate::tensor::Tensor;

/// Separator between a module name and the name of one of its parameters.
pub const MODULE_NAMESPACE_DIVIDER: &str = "$$$";

pub const DEFAULT_TAG: &str = "default";

pub fn param_with_module_name(module_name: &str, param_name: &str) -> String {
    format!("{module_name}{MODULE_NAMESPACE_DIVIDER}{param_name}")
}

/// Module part of a qualified name, `None` for unqualified names.
pub fn module_from_param_with_module_name(param_name: &str) -> Option<&str> {
    param_name
        .split_once(MODULE_NAMESPACE_DIVIDER)
        .map(|(module, _)| module)
}

/// Parameter name as the user wrote it, with any module prefix removed.
pub fn user_param_name(param_name: &str) -> &str {
    param_name
        .rsplit_once(MODULE_NAMESPACE_DIVIDER)
        .map_or(param_name, |(_, user)| user)
}

/// Key-value service mapping qualified names to persistent tensors.
///
/// `get_param` is get-or-create: the first value registered under a name is
/// the one every later call returns.
pub trait ParamStore {
    fn get_param(&mut self, name: &str, init: Option<Tensor>, tags: &[String]) -> Result<Tensor>;

    fn get(&self, name: &str) -> Option<Tensor>;

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn names(&self) -> Vec<String>;

    fn param_tags(&self, name: &str) -> Vec<String>;

    fn clear(&mut self);

    fn len(&self) -> usize {
        self.names().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryParamStore {
    params: HashMap<String, Tensor>,
    order: Vec<String>,
    tags: HashMap<String, BTreeSet<String>>,
}

impl InMemoryParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names carrying `tag`, in registration order.
    pub fn params_with_tag(&self, tag: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| self.tags.get(*name).is_some_and(|tags| tags.contains(tag)))
            .cloned()
            .collect()
    }

}

impl ParamStore for InMemoryParamStore {
    fn get_param(&mut self, name: &str, init: Option<Tensor>, tags: &[String]) -> Result<Tensor> {
        if let Some(existing) = self.params.get(name) {
            let existing = existing.clone();
            if !tags.is_empty() {
                let entry = self.tags.entry(name.to_string()).or_default();
                entry.extend(tags.iter().cloned());
            }
            return Ok(existing);
        }

        let value = init.ok_or_else(|| PoutineError::ParamNotFound {
            name: name.to_string(),
        })?;
        log::debug!("registering parameter '{name}' with shape {:?}", value.shape());
        self.params.insert(name.to_string(), value.clone());
        self.order.push(name.to_string());
        let entry = self.tags.entry(name.to_string()).or_default();
        if tags.is_empty() {
            entry.insert(DEFAULT_TAG.to_string());
        } else {
            entry.extend(tags.iter().cloned());
        }
        Ok(value)
    }

    fn get(&self, name: &str) -> Option<Tensor> {
        self.params.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    fn param_tags(&self, name: &str) -> Vec<String> {
        self.tags
            .get(name)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn clear(&mut self) {
        self.params.clear();
        self.order.clear();
        self.tags.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}
