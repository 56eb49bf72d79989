//! poutine: effect handlers and independence contexts for probabilistic
//! programs.
//!
//! # Architecture
//!
//! - **Primitives**: `sample` and `param` build a [`Message`] and send it
//!   through the active handler stack, or act directly when no handler is
//!   active.
//! - **Two-pass dispatch**: `process` innermost to outermost (stoppable),
//!   a default action, then `postprocess` outermost to innermost.
//! - **Thread-confined context**: the handler stack, dimension allocator,
//!   parameter store and generator live in one per-thread context; scopes
//!   are RAII guards.
//! - **Independence contexts**: `iarange` (vectorized, claims a tensor axis)
//!   and `irange` (sequential), both with unbiased subsample rescaling.

pub mod config;
pub mod context;
mod debug_log;
pub mod dim_allocator;
pub mod dispatch;
pub mod distribution;
pub mod effects;
pub mod error;
pub mod handler;
pub mod iarange;
pub mod ids;
pub mod message;
pub mod module;
pub mod param_store;
pub mod primitives;
pub mod tensor;
pub mod trace;

// Re-exports for convenience
pub use config::{Config, ConfigError, OutsideInferencePolicy};
pub use context::{
    allocate_dim, am_i_wrapped, clear_param_store, configure, current_config, push_handler,
    reset, set_param_store, set_rng_seed, stack_depth, take_warnings, with_handler,
    with_param_store, ContextRng, DimGuard, HandlerGuard,
};
pub use dim_allocator::DimAllocator;
pub use dispatch::apply_stack;
pub use distribution::{Args, Distribution, Subsample};
pub use error::{PoutineError, PoutineWarning, Result};
pub use handler::{
    BlockFilter, BlockMessenger, ConditionMessenger, DoMessenger, Handler, HandlerEntry,
    IndepMessenger, LiftMessenger, Messenger, Prior, ReplayMessenger, ScaleMessenger,
};
pub use iarange::{
    iarange, irange, IArange, IArangeOptions, IArangeScope, IRange, IRangeIter, IRangeOptions,
};
pub use ids::{ExecutionId, HandlerId};
pub use message::{CondIndepStackFrame, Infer, Message, MessageType, Primitive};
pub use module::{module, random_module, ModuleOptions, ParamContainer};
pub use param_store::{
    module_from_param_with_module_name, param_with_module_name, user_param_name,
    InMemoryParamStore, ParamStore, MODULE_NAMESPACE_DIVIDER,
};
pub use primitives::{observe, param, param_with, sample, sample_with, ParamOptions, SampleOptions};
pub use tensor::Tensor;
pub use trace::{Site, Trace, TraceMessenger};
