//! Execution traces: an ordered record of every resolved site.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use crate::error::Result;
use crate::handler::Messenger;
use crate::message::{CondIndepStackFrame, Infer, Message, MessageType};
use crate::tensor::Tensor;

/// Owned snapshot of a message after the stack resolved it.
#[derive(Debug, Clone, Serialize)]
pub struct Site {
    pub name: String,
    #[serde(rename = "type")]
    pub site_type: MessageType,
    pub fn_name: Option<String>,
    pub value: Option<Tensor>,
    pub is_observed: bool,
    pub scale: f64,
    pub cond_indep_stack: Vec<CondIndepStackFrame>,
    pub infer: Infer,
}

impl Site {
    pub fn from_message(msg: &Message) -> Self {
        Site {
            name: msg.name.clone(),
            site_type: msg.message_type(),
            fn_name: msg.primitive.dist().map(|d| d.name().to_string()),
            value: msg.value.clone(),
            is_observed: msg.is_observed,
            scale: msg.scale,
            cond_indep_stack: msg.cond_indep_stack.clone(),
            infer: msg.infer.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Trace {
    nodes: Vec<Site>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a site. A parameter read twice keeps its latest record in the
    /// original position; sample-name uniqueness is enforced by dispatch.
    pub fn add_node(&mut self, site: Site) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.name == site.name) {
            *existing = site;
            return;
        }
        self.nodes.push(site);
    }

    pub fn nodes(&self) -> &[Site] {
        &self.nodes
    }

    pub fn get(&self, name: &str) -> Option<&Site> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn sample_sites(&self) -> impl Iterator<Item = &Site> {
        self.nodes
            .iter()
            .filter(|n| n.site_type == MessageType::Sample)
    }

    /// Latent sample sites, i.e. the ones a guide is expected to supply.
    pub fn latent_sites(&self) -> impl Iterator<Item = &Site> {
        self.sample_sites().filter(|n| !n.is_observed)
    }

    pub fn observed_sites(&self) -> impl Iterator<Item = &Site> {
        self.sample_sites().filter(|n| n.is_observed)
    }

    pub fn param_sites(&self) -> impl Iterator<Item = &Site> {
        self.nodes
            .iter()
            .filter(|n| n.site_type == MessageType::Param)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Records every message it sees on the way out.
#[derive(Debug, Clone, Default)]
pub struct TraceMessenger {
    trace: Rc<RefCell<Trace>>,
}

impl TraceMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the trace being written.
    pub fn trace(&self) -> Rc<RefCell<Trace>> {
        Rc::clone(&self.trace)
    }

    /// Detach the recorded trace, leaving an empty one behind.
    pub fn take(&self) -> Trace {
        std::mem::take(&mut *self.trace.borrow_mut())
    }
}

impl Messenger for TraceMessenger {
    fn postprocess(&mut self, msg: &mut Message) -> Result<()> {
        self.trace.borrow_mut().add_node(Site::from_message(msg));
        Ok(())
    }
}
