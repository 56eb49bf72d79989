//! Identifier types for the handler stack.
//!
//! All IDs are lightweight Copy types using newtype pattern for type safety.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for one installation of a handler on the stack.
///
/// Each `push_handler` creates a fresh HandlerId; the guard uses it to find
/// its own entry when popping.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HandlerId(pub u64);

/// Unique identifier for one wrapped execution.
///
/// A new execution starts whenever a handler is pushed onto an empty stack.
/// Site-name uniqueness is checked per execution.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ExecutionId(pub u64);

static HANDLER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static EXECUTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

impl HandlerId {
    /// Create a fresh unique HandlerId.
    pub fn fresh() -> Self {
        HandlerId(HANDLER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl ExecutionId {
    /// Create a fresh unique ExecutionId.
    pub fn fresh() -> Self {
        ExecutionId(EXECUTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Placeholder for "no execution has started on this thread yet".
    pub fn placeholder() -> Self {
        ExecutionId(0)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}
