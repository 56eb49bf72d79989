//! The record threaded through the handler stack for one primitive call.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::distribution::{Args, Distribution};
use crate::error::Result;
use crate::tensor::Tensor;

/// Inference hints attached to a site.
pub type Infer = BTreeMap<String, serde_json::Value>;

/// Post-resolution hook run after every handler has seen the message.
pub type Continuation = Rc<dyn Fn(&mut Message) -> Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Sample,
    Param,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Sample => f.write_str("sample"),
            MessageType::Param => f.write_str("param"),
        }
    }
}

/// What the default action does when no handler resolves the message.
#[derive(Debug, Clone)]
pub enum Primitive {
    Sample {
        dist: Rc<dyn Distribution>,
        args: Args,
    },
    Param {
        init: Option<Tensor>,
        tags: Vec<String>,
    },
}

impl Primitive {
    pub fn message_type(&self) -> MessageType {
        match self {
            Primitive::Sample { .. } => MessageType::Sample,
            Primitive::Param { .. } => MessageType::Param,
        }
    }

    pub fn dist(&self) -> Option<&Rc<dyn Distribution>> {
        match self {
            Primitive::Sample { dist, .. } => Some(dist),
            Primitive::Param { .. } => None,
        }
    }
}

/// One enclosing independence context, as seen by a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CondIndepStackFrame {
    pub name: String,
    /// Tensor axis (negative) for vectorized contexts, `None` for `irange`.
    pub dim: Option<isize>,
    /// Full size of the range, `-1` when unbounded.
    pub size: i64,
    pub subsample_size: i64,
    /// Distinguishes sequential iterations of one `irange`.
    pub counter: usize,
}

impl CondIndepStackFrame {
    pub fn is_vectorized(&self) -> bool {
        self.dim.is_some()
    }
}

#[derive(Clone)]
pub struct Message {
    pub name: String,
    pub primitive: Primitive,
    pub is_observed: bool,
    pub value: Option<Tensor>,
    pub infer: Infer,
    pub scale: f64,
    /// Outermost context first.
    pub cond_indep_stack: Vec<CondIndepStackFrame>,
    pub done: bool,
    pub stop: bool,
    pub continuation: Option<Continuation>,
}

impl Message {
    pub fn sample(name: impl Into<String>, dist: Rc<dyn Distribution>, args: Args) -> Self {
        Message::with_primitive(name, Primitive::Sample { dist, args })
    }

    pub fn param(name: impl Into<String>, init: Option<Tensor>, tags: Vec<String>) -> Self {
        Message::with_primitive(name, Primitive::Param { init, tags })
    }

    fn with_primitive(name: impl Into<String>, primitive: Primitive) -> Self {
        Message {
            name: name.into(),
            primitive,
            is_observed: false,
            value: None,
            infer: Infer::new(),
            scale: 1.0,
            cond_indep_stack: Vec::new(),
            done: false,
            stop: false,
            continuation: None,
        }
    }

    /// Fix the value as an observation.
    pub fn observe(&mut self, value: Tensor) {
        self.value = Some(value);
        self.is_observed = true;
    }

    pub fn message_type(&self) -> MessageType {
        self.primitive.message_type()
    }

    pub fn is_sample(&self) -> bool {
        self.message_type() == MessageType::Sample
    }

    pub fn is_param(&self) -> bool {
        self.message_type() == MessageType::Param
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.message_type())
            .field("name", &self.name)
            .field("is_observed", &self.is_observed)
            .field("value", &self.value)
            .field("scale", &self.scale)
            .field("cond_indep_stack", &self.cond_indep_stack)
            .field("done", &self.done)
            .field("stop", &self.stop)
            .field("has_continuation", &self.continuation.is_some())
            .finish()
    }
}
