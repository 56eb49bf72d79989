//! Thread-confined execution context: handler stack, dimension allocator,
//! parameter store, generator, warnings and the per-execution site registry.
//!
//! Every piece of mutable state the primitives touch lives here, one instance
//! per thread, so independent executions on different threads never share a
//! stack. Borrows of the context are always short and never span user code,
//! which keeps primitives reentrant: a distribution may itself call `sample`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::Config;
use crate::dim_allocator::DimAllocator;
use crate::error::{PoutineWarning, Result};
use crate::handler::{Handler, HandlerEntry};
use crate::ids::{ExecutionId, HandlerId};
use crate::message::{CondIndepStackFrame, MessageType};
use crate::param_store::{InMemoryParamStore, ParamStore};
use crate::tensor::Tensor;

/// What the registry remembers about a site already dispatched.
#[derive(Debug, Clone)]
pub(crate) struct SiteRecord {
    pub(crate) site_type: MessageType,
    pub(crate) is_observed: bool,
    pub(crate) value: Option<Tensor>,
}

pub(crate) struct ExecutionContext {
    pub(crate) stack: Vec<HandlerEntry>,
    pub(crate) dims: DimAllocator,
    pub(crate) param_store: Box<dyn ParamStore>,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) warnings: Vec<PoutineWarning>,
    pub(crate) sites: HashMap<String, SiteRecord>,
    pub(crate) execution_id: ExecutionId,
    pub(crate) config: Config,
}

impl ExecutionContext {
    fn new() -> Self {
        let config = Config::from_env().unwrap_or_else(|err| {
            log::warn!("ignoring invalid environment configuration: {err}");
            Config::default()
        });
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        ExecutionContext {
            stack: Vec::new(),
            dims: DimAllocator::new(),
            param_store: Box::new(InMemoryParamStore::new()),
            rng,
            warnings: Vec::new(),
            sites: HashMap::new(),
            execution_id: ExecutionId::placeholder(),
            config,
        }
    }

    fn push(&mut self, entry: HandlerEntry) {
        if self.stack.is_empty() {
            self.execution_id = ExecutionId::fresh();
            self.sites.clear();
            log::debug!("starting execution {}", self.execution_id.raw());
        }
        self.stack.push(entry);
    }

    fn pop(&mut self, id: HandlerId) {
        let Some(pos) = self.stack.iter().rposition(|entry| entry.id == id) else {
            log::debug!("handler {} already removed from the stack", id.raw());
            return;
        };
        if pos + 1 != self.stack.len() {
            // An error unwound past inner scopes: drop everything above too.
            log::debug!(
                "popping handler {} with {} handler(s) still above it",
                id.raw(),
                self.stack.len() - pos - 1
            );
        }
        self.stack.truncate(pos);
    }
}

thread_local! {
    static CONTEXT: RefCell<ExecutionContext> = RefCell::new(ExecutionContext::new());
}

pub(crate) fn with_context<R>(f: impl FnOnce(&mut ExecutionContext) -> R) -> R {
    CONTEXT.with(|ctx| f(&mut ctx.borrow_mut()))
}

/// True when at least one handler is active on this thread.
pub fn am_i_wrapped() -> bool {
    with_context(|ctx| !ctx.stack.is_empty())
}

pub fn stack_depth() -> usize {
    with_context(|ctx| ctx.stack.len())
}

/// Scoped installation of a handler. Dropping the guard pops it, on every exit
/// path including `?` and panics.
#[must_use = "the handler is popped as soon as the guard is dropped"]
#[derive(Debug)]
pub struct HandlerGuard {
    id: HandlerId,
    handler: Rc<RefCell<Handler>>,
}

impl HandlerGuard {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Shared handle to the installed handler.
    pub fn handler(&self) -> Rc<RefCell<Handler>> {
        Rc::clone(&self.handler)
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        let id = self.id;
        let popped = CONTEXT.try_with(|ctx| match ctx.try_borrow_mut() {
            Ok(mut ctx) => {
                ctx.pop(id);
                true
            }
            Err(_) => false,
        });
        if matches!(popped, Ok(true)) {
            log::debug!("popped handler {}", id.raw());
        } else {
            log::warn!("handler {} left on the stack: execution context unavailable", id.raw());
        }
    }
}

pub fn push_handler(handler: Handler) -> HandlerGuard {
    let kind = handler.kind();
    let entry = HandlerEntry::new(handler);
    let guard = HandlerGuard {
        id: entry.id,
        handler: Rc::clone(&entry.handler),
    };
    with_context(|ctx| ctx.push(entry));
    log::debug!("pushed {kind} handler {}", guard.id.raw());
    guard
}

/// Run `f` with `handler` installed.
pub fn with_handler<R>(handler: Handler, f: impl FnOnce() -> Result<R>) -> Result<R> {
    let _guard = push_handler(handler);
    f()
}

/// Handlers in stack order (outermost first), detached from the context so
/// their hooks can run without holding a borrow.
pub(crate) fn handler_snapshot() -> Vec<Rc<RefCell<Handler>>> {
    with_context(|ctx| {
        ctx.stack
            .iter()
            .map(|entry| Rc::clone(&entry.handler))
            .collect()
    })
}

/// Frames of the active independence contexts, outermost first.
pub(crate) fn active_cond_indep_stack() -> Vec<CondIndepStackFrame> {
    handler_snapshot()
        .iter()
        .filter_map(|h| h.borrow().cond_indep_frame())
        .collect()
}

/// Scoped claim on a tensor axis. Dropping the guard frees the axis.
#[must_use = "the axis is freed as soon as the guard is dropped"]
#[derive(Debug)]
pub struct DimGuard {
    name: String,
    dim: isize,
}

impl DimGuard {
    pub fn dim(&self) -> isize {
        self.dim
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DimGuard {
    fn drop(&mut self) {
        let freed = CONTEXT.try_with(|ctx| match ctx.try_borrow_mut() {
            Ok(mut ctx) => Some(ctx.dims.free(&self.name, self.dim)),
            Err(_) => None,
        });
        match freed {
            Ok(Some(Ok(()))) => {}
            Ok(Some(Err(err))) => log::error!("failed to free dim: {err}"),
            _ => log::warn!(
                "dim={} of iarange \"{}\" left allocated: execution context unavailable",
                self.dim,
                self.name
            ),
        }
    }
}

pub fn allocate_dim(name: &str, dim: Option<isize>) -> Result<DimGuard> {
    let dim = with_context(|ctx| ctx.dims.allocate(name, dim))?;
    Ok(DimGuard {
        name: name.to_string(),
        dim,
    })
}

/// Snapshot of the allocator, index 0 = axis -1.
pub fn dim_occupancy() -> Vec<Option<String>> {
    with_context(|ctx| ctx.dims.occupancy())
}

/// `RngCore` over the thread's generator. Each draw borrows the generator
/// only for that draw.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextRng;

impl RngCore for ContextRng {
    fn next_u32(&mut self) -> u32 {
        with_context(|ctx| ctx.rng.next_u32())
    }

    fn next_u64(&mut self) -> u64 {
        with_context(|ctx| ctx.rng.next_u64())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        with_context(|ctx| ctx.rng.fill_bytes(dest))
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        with_context(|ctx| ctx.rng.try_fill_bytes(dest))
    }
}

pub fn set_rng_seed(seed: u64) {
    with_context(|ctx| ctx.rng = ChaCha8Rng::seed_from_u64(seed));
}

pub(crate) fn emit_warning(warning: PoutineWarning) {
    log::warn!("{warning}");
    with_context(|ctx| ctx.warnings.push(warning));
}

/// Drain the warnings raised on this thread since the last call.
pub fn take_warnings() -> Vec<PoutineWarning> {
    with_context(|ctx| std::mem::take(&mut ctx.warnings))
}

pub fn configure(config: Config) {
    with_context(|ctx| {
        if let Some(seed) = config.rng_seed {
            ctx.rng = ChaCha8Rng::seed_from_u64(seed);
        }
        ctx.config = config;
    });
}

pub fn current_config() -> Config {
    with_context(|ctx| ctx.config.clone())
}

/// Run `f` against the thread's parameter store.
pub fn with_param_store<R>(f: impl FnOnce(&mut dyn ParamStore) -> R) -> R {
    with_context(|ctx| f(ctx.param_store.as_mut()))
}

/// Replace the thread's parameter store, returning the previous one.
pub fn set_param_store(store: Box<dyn ParamStore>) -> Box<dyn ParamStore> {
    with_context(|ctx| std::mem::replace(&mut ctx.param_store, store))
}

pub fn clear_param_store() {
    with_param_store(|store| store.clear());
}

/// Drop all per-execution state on this thread: handlers, axes, site names
/// and warnings. The parameter store is kept.
pub fn reset() {
    with_context(|ctx| {
        ctx.stack.clear();
        ctx.dims.clear();
        ctx.sites.clear();
        ctx.warnings.clear();
    });
}
