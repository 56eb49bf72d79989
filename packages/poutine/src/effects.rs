//! Closure-scoped combinators over the handlers.
//!
//! Each runs `f` with one handler installed and removes it again on every
//! exit path.

use std::collections::HashMap;

use crate::context::with_handler;
use crate::error::Result;
use crate::handler::{
    BlockFilter, BlockMessenger, ConditionMessenger, DoMessenger, Handler, LiftMessenger, Prior,
    ReplayMessenger, ScaleMessenger,
};
use crate::tensor::Tensor;
use crate::trace::{Trace, TraceMessenger};

/// Run `f` and record every site it resolves.
pub fn trace<R>(f: impl FnOnce() -> Result<R>) -> Result<(R, Trace)> {
    let messenger = TraceMessenger::new();
    let recorded = messenger.trace();
    let value = with_handler(Handler::Trace(messenger), f)?;
    let trace = recorded.take();
    Ok((value, trace))
}

pub fn condition<R>(data: HashMap<String, Tensor>, f: impl FnOnce() -> Result<R>) -> Result<R> {
    with_handler(Handler::Condition(ConditionMessenger::new(data)), f)
}

pub fn do_intervention<R>(data: HashMap<String, Tensor>, f: impl FnOnce() -> Result<R>) -> Result<R> {
    with_handler(Handler::Do(DoMessenger::new(data)), f)
}

pub fn block<R>(filter: BlockFilter, f: impl FnOnce() -> Result<R>) -> Result<R> {
    with_handler(Handler::Block(BlockMessenger::new(filter)), f)
}

/// Run `f` reusing the latent values recorded in `guide_trace`.
pub fn replay<R>(guide_trace: Trace, f: impl FnOnce() -> Result<R>) -> Result<R> {
    with_handler(Handler::Replay(ReplayMessenger::new(guide_trace)), f)
}

pub fn lift<R>(prior: Prior, f: impl FnOnce() -> Result<R>) -> Result<R> {
    with_handler(Handler::Lift(LiftMessenger::new(prior)), f)
}

pub fn scale<R>(factor: f64, f: impl FnOnce() -> Result<R>) -> Result<R> {
    with_handler(Handler::Scale(ScaleMessenger::new(factor)), f)
}
