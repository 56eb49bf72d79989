//! Handler types for message interception.
//!
//! The set of handlers is closed: every handler the stack can hold is a
//! variant of [`Handler`], each delegating to a messenger with `process`
//! (on the way in) and `postprocess` (on the way out) hooks.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::distribution::{Args, Distribution};
use crate::error::{PoutineError, Result};
use crate::ids::HandlerId;
use crate::message::{CondIndepStackFrame, Message, MessageType, Primitive};
use crate::param_store::user_param_name;
use crate::tensor::Tensor;
use crate::trace::{Trace, TraceMessenger};

/// Hooks a handler applies to each message passing through it.
pub trait Messenger {
    fn process(&mut self, _msg: &mut Message) -> Result<()> {
        Ok(())
    }

    fn postprocess(&mut self, _msg: &mut Message) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Handler {
    Scale(ScaleMessenger),
    Indep(IndepMessenger),
    Trace(TraceMessenger),
    Condition(ConditionMessenger),
    Do(DoMessenger),
    Block(BlockMessenger),
    Replay(ReplayMessenger),
    Lift(LiftMessenger),
}

impl Handler {
    pub fn kind(&self) -> &'static str {
        match self {
            Handler::Scale(_) => "scale",
            Handler::Indep(_) => "indep",
            Handler::Trace(_) => "trace",
            Handler::Condition(_) => "condition",
            Handler::Do(_) => "do",
            Handler::Block(_) => "block",
            Handler::Replay(_) => "replay",
            Handler::Lift(_) => "lift",
        }
    }

    /// The frame this handler contributes to `cond_indep_stack`, if any.
    pub fn cond_indep_frame(&self) -> Option<CondIndepStackFrame> {
        match self {
            Handler::Indep(indep) => Some(indep.frame()),
            _ => None,
        }
    }
}

impl Messenger for Handler {
    fn process(&mut self, msg: &mut Message) -> Result<()> {
        match self {
            Handler::Scale(h) => h.process(msg),
            Handler::Indep(h) => h.process(msg),
            Handler::Trace(h) => h.process(msg),
            Handler::Condition(h) => h.process(msg),
            Handler::Do(h) => h.process(msg),
            Handler::Block(h) => h.process(msg),
            Handler::Replay(h) => h.process(msg),
            Handler::Lift(h) => h.process(msg),
        }
    }

    fn postprocess(&mut self, msg: &mut Message) -> Result<()> {
        match self {
            Handler::Scale(h) => h.postprocess(msg),
            Handler::Indep(h) => h.postprocess(msg),
            Handler::Trace(h) => h.postprocess(msg),
            Handler::Condition(h) => h.postprocess(msg),
            Handler::Do(h) => h.postprocess(msg),
            Handler::Block(h) => h.postprocess(msg),
            Handler::Replay(h) => h.postprocess(msg),
            Handler::Lift(h) => h.postprocess(msg),
        }
    }
}

/// A handler installed on the stack.
#[derive(Debug, Clone)]
pub struct HandlerEntry {
    pub id: HandlerId,
    pub handler: Rc<RefCell<Handler>>,
}

impl HandlerEntry {
    pub fn new(handler: Handler) -> Self {
        HandlerEntry {
            id: HandlerId::fresh(),
            handler: Rc::new(RefCell::new(handler)),
        }
    }
}

/// Multiplies the log-weight scale of every message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleMessenger {
    pub factor: f64,
}

impl ScaleMessenger {
    pub fn new(factor: f64) -> Self {
        ScaleMessenger { factor }
    }
}

impl Messenger for ScaleMessenger {
    fn process(&mut self, msg: &mut Message) -> Result<()> {
        msg.scale *= self.factor;
        Ok(())
    }
}

/// Marks messages as conditionally independent within a named context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndepMessenger {
    pub name: String,
    pub dim: Option<isize>,
    pub size: i64,
    pub subsample_size: i64,
    pub counter: usize,
}

impl IndepMessenger {
    pub fn new(name: impl Into<String>, dim: Option<isize>, size: i64, subsample_size: i64) -> Self {
        IndepMessenger {
            name: name.into(),
            dim,
            size,
            subsample_size,
            counter: 0,
        }
    }

    /// Advance to the next sequential context (one per `irange` iteration).
    pub fn next_context(&mut self) {
        self.counter += 1;
    }

    pub fn frame(&self) -> CondIndepStackFrame {
        CondIndepStackFrame {
            name: self.name.clone(),
            dim: self.dim,
            size: self.size,
            subsample_size: self.subsample_size,
            counter: self.counter,
        }
    }
}

impl Messenger for IndepMessenger {
    fn process(&mut self, msg: &mut Message) -> Result<()> {
        let frame = self.frame();
        // Primitives pre-populate the stack from the live contexts.
        if !msg.cond_indep_stack.contains(&frame) {
            msg.cond_indep_stack.insert(0, frame);
        }
        Ok(())
    }
}

/// Fixes named sample sites to observed values.
#[derive(Debug, Clone, Default)]
pub struct ConditionMessenger {
    pub data: HashMap<String, Tensor>,
}

impl ConditionMessenger {
    pub fn new(data: HashMap<String, Tensor>) -> Self {
        ConditionMessenger { data }
    }
}

impl Messenger for ConditionMessenger {
    fn process(&mut self, msg: &mut Message) -> Result<()> {
        if !msg.is_sample() {
            return Ok(());
        }
        if let Some(value) = self.data.get(&msg.name) {
            msg.observe(value.clone());
        }
        Ok(())
    }
}

/// Intervention: fixes named sample sites without treating them as evidence.
#[derive(Debug, Clone, Default)]
pub struct DoMessenger {
    pub data: HashMap<String, Tensor>,
}

impl DoMessenger {
    pub fn new(data: HashMap<String, Tensor>) -> Self {
        DoMessenger { data }
    }
}

impl Messenger for DoMessenger {
    fn process(&mut self, msg: &mut Message) -> Result<()> {
        if !msg.is_sample() {
            return Ok(());
        }
        if let Some(value) = self.data.get(&msg.name) {
            msg.value = Some(value.clone());
            msg.is_observed = false;
            msg.done = true;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockFilter {
    HideAll,
    Hide(HashSet<String>),
    Expose(HashSet<String>),
    HideTypes(HashSet<MessageType>),
}

impl BlockFilter {
    pub fn hides(&self, msg: &Message) -> bool {
        match self {
            BlockFilter::HideAll => true,
            BlockFilter::Hide(names) => names.contains(&msg.name),
            BlockFilter::Expose(names) => !names.contains(&msg.name),
            BlockFilter::HideTypes(types) => types.contains(&msg.message_type()),
        }
    }
}

/// Hides matching messages from every handler outside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMessenger {
    pub filter: BlockFilter,
}

impl BlockMessenger {
    pub fn new(filter: BlockFilter) -> Self {
        BlockMessenger { filter }
    }
}

impl Messenger for BlockMessenger {
    fn process(&mut self, msg: &mut Message) -> Result<()> {
        if self.filter.hides(msg) {
            msg.stop = true;
        }
        Ok(())
    }
}

/// Reuses latent sample values recorded in another trace.
#[derive(Debug, Clone)]
pub struct ReplayMessenger {
    pub guide_trace: Trace,
    /// Optional renaming: model site name -> guide site name.
    pub sites: Option<HashMap<String, String>>,
}

impl ReplayMessenger {
    pub fn new(guide_trace: Trace) -> Self {
        ReplayMessenger {
            guide_trace,
            sites: None,
        }
    }

    pub fn with_sites(guide_trace: Trace, sites: HashMap<String, String>) -> Self {
        ReplayMessenger {
            guide_trace,
            sites: Some(sites),
        }
    }
}

impl Messenger for ReplayMessenger {
    fn process(&mut self, msg: &mut Message) -> Result<()> {
        if !msg.is_sample() || msg.is_observed {
            return Ok(());
        }
        let guide_name = match &self.sites {
            Some(sites) => match sites.get(&msg.name) {
                Some(guide_name) => guide_name.as_str(),
                None => return Ok(()),
            },
            None => msg.name.as_str(),
        };
        let Some(guide_site) = self.guide_trace.get(guide_name) else {
            return Ok(());
        };
        if guide_site.site_type != MessageType::Sample || guide_site.is_observed {
            return Err(PoutineError::ReplayMismatch {
                name: guide_name.to_string(),
            });
        }
        msg.value = guide_site.value.clone();
        msg.done = true;
        Ok(())
    }
}

/// Prior placed over parameters by `lift`.
#[derive(Debug, Clone)]
pub enum Prior {
    /// One distribution for every parameter.
    Single(Rc<dyn Distribution>),
    /// Keyed by the parameter's user-facing name; unlisted parameters stay
    /// ordinary parameters.
    PerParam(HashMap<String, Rc<dyn Distribution>>),
}

impl Prior {
    fn for_param(&self, name: &str) -> Option<Rc<dyn Distribution>> {
        match self {
            Prior::Single(dist) => Some(Rc::clone(dist)),
            Prior::PerParam(priors) => priors.get(user_param_name(name)).cloned(),
        }
    }
}

/// Turns `param` messages into `sample` messages drawn from a prior.
#[derive(Debug, Clone)]
pub struct LiftMessenger {
    pub prior: Prior,
}

impl LiftMessenger {
    pub fn new(prior: Prior) -> Self {
        LiftMessenger { prior }
    }
}

impl Messenger for LiftMessenger {
    fn process(&mut self, msg: &mut Message) -> Result<()> {
        if !msg.is_param() {
            return Ok(());
        }
        let Some(dist) = self.prior.for_param(&msg.name) else {
            return Ok(());
        };
        msg.primitive = Primitive::Sample {
            dist,
            args: Args::new(),
        };
        msg.value = None;
        msg.is_observed = false;
        msg.done = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Subsample;

    fn sample_msg(name: &str) -> Message {
        Message::sample(name, Rc::new(Subsample::new(3, None)), Args::new())
    }

    #[test]
    fn test_scale_composes_multiplicatively() {
        let mut msg = sample_msg("x");
        ScaleMessenger::new(10.0).process(&mut msg).unwrap();
        ScaleMessenger::new(2.5).process(&mut msg).unwrap();
        assert_eq!(msg.scale, 25.0);
    }

    #[test]
    fn test_indep_prepends_so_outermost_comes_first() {
        let mut msg = sample_msg("x");
        let mut inner = IndepMessenger::new("inner", Some(-2), 50, 5);
        let mut outer = IndepMessenger::new("outer", Some(-1), 100, 10);
        inner.process(&mut msg).unwrap();
        outer.process(&mut msg).unwrap();
        let names: Vec<_> = msg.cond_indep_stack.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["outer", "inner"]);
    }

    #[test]
    fn test_indep_does_not_duplicate_prepopulated_frame() {
        let mut indep = IndepMessenger::new("data", Some(-1), 10, 10);
        let mut msg = sample_msg("x");
        msg.cond_indep_stack.push(indep.frame());
        indep.process(&mut msg).unwrap();
        assert_eq!(msg.cond_indep_stack.len(), 1);
    }

    #[test]
    fn test_next_context_changes_frame() {
        let mut indep = IndepMessenger::new("loop", None, 4, 4);
        let first = indep.frame();
        indep.next_context();
        assert_ne!(first, indep.frame());
        assert_eq!(indep.frame().counter, 1);
    }

    #[test]
    fn test_condition_marks_observed() {
        let mut data = HashMap::new();
        data.insert("x".to_string(), Tensor::scalar(3.0));
        let mut msg = sample_msg("x");
        ConditionMessenger::new(data).process(&mut msg).unwrap();
        assert!(msg.is_observed);
        assert_eq!(msg.value, Some(Tensor::scalar(3.0)));
    }

    #[test]
    fn test_do_fixes_value_without_observing() {
        let mut data = HashMap::new();
        data.insert("x".to_string(), Tensor::scalar(3.0));
        let mut msg = sample_msg("x");
        DoMessenger::new(data).process(&mut msg).unwrap();
        assert!(!msg.is_observed);
        assert!(msg.done);
    }

    #[test]
    fn test_block_filters() {
        let msg = sample_msg("x");
        let hide: HashSet<String> = ["x".to_string()].into_iter().collect();
        assert!(BlockFilter::HideAll.hides(&msg));
        assert!(BlockFilter::Hide(hide.clone()).hides(&msg));
        assert!(!BlockFilter::Expose(hide).hides(&msg));
        let types: HashSet<MessageType> = [MessageType::Param].into_iter().collect();
        assert!(!BlockFilter::HideTypes(types).hides(&msg));
    }

    #[test]
    fn test_lift_turns_param_into_sample() {
        let prior: Rc<dyn Distribution> = Rc::new(Subsample::new(2, None));
        let mut lift = LiftMessenger::new(Prior::Single(prior));
        let mut msg = Message::param("m$$$w", Some(Tensor::scalar(0.0)), Vec::new());
        lift.process(&mut msg).unwrap();
        assert!(msg.is_sample());
        assert!(msg.value.is_none());
    }

    #[test]
    fn test_lift_per_param_uses_user_name() {
        let prior: Rc<dyn Distribution> = Rc::new(Subsample::new(2, None));
        let mut priors = HashMap::new();
        priors.insert("bias".to_string(), prior);
        let mut lift = LiftMessenger::new(Prior::PerParam(priors));

        let mut lifted = Message::param("net$$$bias", None, Vec::new());
        lift.process(&mut lifted).unwrap();
        assert!(lifted.is_sample());

        let mut kept = Message::param("net$$$weight", None, Vec::new());
        lift.process(&mut kept).unwrap();
        assert!(kept.is_param());
    }

    #[test]
    fn test_handler_kind_and_frame() {
        let handler = Handler::Indep(IndepMessenger::new("d", Some(-1), 5, 5));
        assert_eq!(handler.kind(), "indep");
        assert_eq!(handler.cond_indep_frame().map(|f| f.size), Some(5));
        assert!(Handler::Scale(ScaleMessenger::new(1.0))
            .cond_indep_frame()
            .is_none());
    }
}
