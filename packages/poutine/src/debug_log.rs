//! Compile-time gated trace logging for the dispatch loop.

/// Emit per-hook dispatch traces only when the `dispatch_debug_logs` Cargo
/// feature is enabled.
///
/// With the feature disabled (default), this macro compiles to a no-op while
/// still type-checking format arguments.
#[macro_export]
macro_rules! dispatch_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "dispatch_debug_logs")]
        {
            log::trace!(target: "poutine::dispatch", $($arg)*);
        }
        #[cfg(not(feature = "dispatch_debug_logs"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}
