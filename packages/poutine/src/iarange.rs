//! Independence contexts with optional subsampling.
//!
//! [`IArange`] is the vectorized form: it claims a tensor axis and marks every
//! site inside it as conditionally independent along that axis. [`IRange`] is
//! the sequential form: a loop whose iterations are each marked independent.
//! Both rescale the sites inside them by `size / subsample_size` so a
//! minibatch gives an unbiased estimate of the full-data log density.

use std::cell::Cell;
use std::rc::Rc;

use crate::context::{allocate_dim, am_i_wrapped, handler_snapshot, push_handler, DimGuard, HandlerGuard};
use crate::distribution::Subsample;
use crate::error::{PoutineError, Result};
use crate::handler::{Handler, IndepMessenger, ScaleMessenger};
use crate::primitives::sample;
use crate::tensor::Tensor;

/// Sentinel size of an unbounded context.
pub const UNBOUNDED: i64 = -1;

/// Resolved `(size, subsample_size, subsample)` of an independence context.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub size: i64,
    pub subsample_size: i64,
    pub subsample: Option<Tensor>,
}

impl Resolved {
    pub fn scale_factor(&self) -> f64 {
        self.size as f64 / self.subsample_size as f64
    }
}

/// Name of the internal subsample site, unique per enclosing `irange`
/// iteration.
fn subsample_site_name(name: &str) -> String {
    let mut parts = vec![name.to_string()];
    for handler in handler_snapshot() {
        if let Handler::Indep(indep) = &*handler.borrow() {
            parts.push(indep.counter.to_string());
        }
    }
    parts.join("_")
}

/// Entries of an explicit subsample must be integer indices
/// into `0..size`, laid out along one axis.
fn validate_subsample(name: &str, size: usize, subsample: &Tensor) -> Result<()> {
    if subsample.shape().len() != 1 {
        return Err(PoutineError::invalid_subsample(
            name,
            format!("expected a one-dimensional index tensor, got shape {:?}", subsample.shape()),
        ));
    }
    if let Some(bad) = subsample
        .data()
        .iter()
        .find(|v| !v.is_finite() || v.fract() != 0.0 || **v < 0.0 || **v >= size as f64)
    {
        return Err(PoutineError::invalid_subsample(
            name,
            format!("entry {bad} is not an index in 0..{size}"),
        ));
    }
    Ok(())
}

/// Resolve the subsample of an independence context.
///
/// Without a size the context is unbounded and carries no subsample. With a
/// size and no explicit subsample, one is drawn through `sample` so handlers
/// see (and may replay) it. An explicit subsample fixes `subsample_size` to
/// its length. An empty range or subsample is rejected, since it leaves no
/// finite rescaling factor.
pub fn resolve_subsample(
    name: &str,
    size: Option<usize>,
    subsample_size: Option<usize>,
    subsample: Option<Tensor>,
) -> Result<Resolved> {
    let Some(size) = size else {
        if subsample_size.is_some() || subsample.is_some() {
            return Err(PoutineError::SubsampleWithoutSize {
                name: name.to_string(),
            });
        }
        return Ok(Resolved {
            size: UNBOUNDED,
            subsample_size: UNBOUNDED,
            subsample: None,
        });
    };
    if size == 0 {
        return Err(PoutineError::invalid_subsample(name, "size must be positive"));
    }
    if subsample_size == Some(0) {
        return Err(PoutineError::invalid_subsample(name, "subsample_size must be positive"));
    }

    let subsample = match subsample {
        Some(subsample) => {
            validate_subsample(name, size, &subsample)?;
            if let Some(given) = subsample_size {
                if given != subsample.len() {
                    return Err(PoutineError::subsample_size_mismatch(given, subsample.len()));
                }
            }
            subsample
        }
        None => {
            let site = subsample_site_name(name);
            log::debug!("drawing subsample for '{name}' at site '{site}'");
            sample(&site, Rc::new(Subsample::new(size, subsample_size)))?
        }
    };
    if subsample.is_empty() {
        return Err(PoutineError::invalid_subsample(name, "subsample is empty"));
    }

    Ok(Resolved {
        size: size as i64,
        subsample_size: subsample.len() as i64,
        subsample: Some(subsample),
    })
}

#[derive(Debug, Clone, Default)]
pub struct IArangeOptions {
    pub size: Option<usize>,
    pub subsample_size: Option<usize>,
    pub subsample: Option<Tensor>,
    pub dim: Option<isize>,
}

impl IArangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn subsample_size(mut self, subsample_size: usize) -> Self {
        self.subsample_size = Some(subsample_size);
        self
    }

    pub fn subsample(mut self, subsample: Tensor) -> Self {
        self.subsample = Some(subsample);
        self
    }

    pub fn dim(mut self, dim: isize) -> Self {
        self.dim = Some(dim);
        self
    }
}

/// Vectorized independence context.
///
/// Construction resolves the subsample once; each [`IArange::enter`] then
/// claims an axis and installs the handlers for the lifetime of the returned
/// scope. The axis picked on first entry is reused on later entries.
#[derive(Debug)]
pub struct IArange {
    name: String,
    dim: Cell<Option<isize>>,
    resolved: Resolved,
}

impl IArange {
    pub fn new(name: impl Into<String>, options: IArangeOptions) -> Result<Self> {
        let name = name.into();
        let resolved = resolve_subsample(&name, options.size, options.subsample_size, options.subsample)?;
        Ok(IArange {
            name,
            dim: Cell::new(options.dim),
            resolved,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> i64 {
        self.resolved.size
    }

    pub fn subsample_size(&self) -> i64 {
        self.resolved.subsample_size
    }

    pub fn subsample(&self) -> Option<&Tensor> {
        self.resolved.subsample.as_ref()
    }

    /// Axis requested or resolved on an earlier entry.
    pub fn dim(&self) -> Option<isize> {
        self.dim.get()
    }

    pub fn enter(&self) -> Result<IArangeScope<'_>> {
        let dim = allocate_dim(&self.name, self.dim.get())?;
        self.dim.set(Some(dim.dim()));

        let (indep, scale) = if am_i_wrapped() {
            let scale = push_handler(Handler::Scale(ScaleMessenger::new(self.resolved.scale_factor())));
            let indep = push_handler(Handler::Indep(IndepMessenger::new(
                &self.name,
                Some(dim.dim()),
                self.resolved.size,
                self.resolved.subsample_size,
            )));
            (Some(indep), Some(scale))
        } else {
            (None, None)
        };

        Ok(IArangeScope {
            indep,
            scale,
            dim,
            subsample: self.resolved.subsample.as_ref(),
        })
    }

    /// Run `f` inside the context, passing it the subsample.
    pub fn scope<R>(&self, f: impl FnOnce(Option<&Tensor>) -> Result<R>) -> Result<R> {
        let scope = self.enter()?;
        f(scope.subsample())
    }
}

/// An entered [`IArange`]. Fields drop in declaration order: the
/// independence handler, then the scale handler, then the axis.
#[must_use = "the context exits as soon as the scope is dropped"]
#[derive(Debug)]
pub struct IArangeScope<'a> {
    indep: Option<HandlerGuard>,
    scale: Option<HandlerGuard>,
    dim: DimGuard,
    subsample: Option<&'a Tensor>,
}

impl<'a> IArangeScope<'a> {
    pub fn subsample(&self) -> Option<&'a Tensor> {
        self.subsample
    }

    pub fn dim(&self) -> isize {
        self.dim.dim()
    }

    pub fn is_wrapped(&self) -> bool {
        self.indep.is_some() && self.scale.is_some()
    }
}

/// Construct and resolve an `iarange`.
pub fn iarange(name: impl Into<String>, options: IArangeOptions) -> Result<IArange> {
    IArange::new(name, options)
}

#[derive(Debug, Clone, Default)]
pub struct IRangeOptions {
    pub subsample_size: Option<usize>,
    pub subsample: Option<Tensor>,
}

impl IRangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subsample_size(mut self, subsample_size: usize) -> Self {
        self.subsample_size = Some(subsample_size);
        self
    }

    pub fn subsample(mut self, subsample: Tensor) -> Self {
        self.subsample = Some(subsample);
        self
    }
}

/// Sequential independence context.
#[derive(Debug, Clone)]
pub struct IRange {
    name: String,
    size: i64,
    subsample_size: i64,
    indices: Vec<usize>,
}

pub fn irange(name: impl Into<String>, size: usize, options: IRangeOptions) -> Result<IRange> {
    let name = name.into();
    let resolved = resolve_subsample(&name, Some(size), options.subsample_size, options.subsample)?;
    let indices = resolved
        .subsample
        .as_ref()
        .map(Tensor::to_indices)
        .unwrap_or_default();
    Ok(IRange {
        name,
        size: resolved.size,
        subsample_size: resolved.subsample_size,
        indices,
    })
}

impl IRange {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// A fresh pass over the subsample. Handlers are installed lazily on the
    /// first call to `next`.
    pub fn iter(&self) -> IRangeIter<'_> {
        IRangeIter {
            range: self,
            position: 0,
            current: None,
            scale: None,
            indep: None,
            started: false,
        }
    }
}

impl<'a> IntoIterator for &'a IRange {
    type Item = usize;
    type IntoIter = IRangeIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over an [`IRange`]. While wrapped it holds one scale handler for
/// the whole loop and a fresh independence handler per step.
#[derive(Debug)]
pub struct IRangeIter<'a> {
    range: &'a IRange,
    position: usize,
    current: Option<HandlerGuard>,
    scale: Option<HandlerGuard>,
    indep: Option<IndepMessenger>,
    started: bool,
}

impl IRangeIter<'_> {
    fn start(&mut self) {
        self.started = true;
        if !am_i_wrapped() {
            return;
        }
        let factor = self.range.size as f64 / self.range.subsample_size as f64;
        self.scale = Some(push_handler(Handler::Scale(ScaleMessenger::new(factor))));
        self.indep = Some(IndepMessenger::new(
            &self.range.name,
            None,
            self.range.size,
            self.range.subsample_size,
        ));
    }
}

impl Iterator for IRangeIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        // Leave the previous iteration's context.
        self.current = None;
        if !self.started {
            self.start();
        }
        let Some(&index) = self.range.indices.get(self.position) else {
            self.scale = None;
            return None;
        };
        self.position += 1;
        if let Some(indep) = self.indep.as_mut() {
            indep.next_context();
            self.current = Some(push_handler(Handler::Indep(indep.clone())));
        }
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.range.indices.len() - self.position;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::{configure, dim_occupancy, reset, stack_depth};
    use crate::trace::TraceMessenger;

    fn setup() {
        reset();
        configure(Config::default());
    }

    #[test]
    fn test_unbounded_context() {
        setup();
        let resolved = resolve_subsample("x", None, None, None).unwrap();
        assert_eq!(resolved.size, UNBOUNDED);
        assert_eq!(resolved.subsample_size, UNBOUNDED);
        assert!(resolved.subsample.is_none());
        assert_eq!(resolved.scale_factor(), 1.0);
    }

    #[test]
    fn test_subsample_without_size_is_rejected() {
        setup();
        let err = resolve_subsample("x", None, Some(3), None).unwrap_err();
        assert!(matches!(err, PoutineError::SubsampleWithoutSize { .. }));
    }

    #[test]
    fn test_explicit_subsample_fixes_size() {
        setup();
        let resolved = resolve_subsample("x", Some(10), None, Some(Tensor::from_indices(&[1, 4, 7]))).unwrap();
        assert_eq!(resolved.subsample_size, 3);
        assert_eq!(resolved.size, 10);
    }

    #[test]
    fn test_explicit_subsample_size_mismatch() {
        setup();
        let err =
            resolve_subsample("x", Some(10), Some(5), Some(Tensor::from_indices(&[1, 4, 7]))).unwrap_err();
        assert_eq!(err, PoutineError::subsample_size_mismatch(5, 3));
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        setup();
        let zero_size = resolve_subsample("x", Some(0), None, None).unwrap_err();
        assert!(matches!(zero_size, PoutineError::InvalidSubsample { .. }));
        let zero_subsample = resolve_subsample("x", Some(10), Some(0), None).unwrap_err();
        assert!(matches!(zero_subsample, PoutineError::InvalidSubsample { .. }));
        let empty = resolve_subsample("x", Some(10), None, Some(Tensor::from_indices(&[]))).unwrap_err();
        assert!(matches!(empty, PoutineError::InvalidSubsample { .. }));
    }

    #[test]
    fn test_explicit_subsample_entries_must_be_indices() {
        setup();
        for bad in [vec![1.0, -1.0], vec![0.5], vec![f64::NAN], vec![10.0]] {
            let err = resolve_subsample("x", Some(10), None, Some(Tensor::from_vec(bad))).unwrap_err();
            assert!(matches!(err, PoutineError::InvalidSubsample { .. }), "{err}");
        }
        let matrix = Tensor::new(vec![0.0, 1.0], vec![1, 2]).unwrap();
        assert!(resolve_subsample("x", Some(10), None, Some(matrix)).is_err());
    }

    #[test]
    fn test_drawn_subsample_has_requested_length() {
        setup();
        let resolved = resolve_subsample("x", Some(100), Some(10), None).unwrap();
        let indices = resolved.subsample.unwrap().to_indices();
        assert_eq!(indices.len(), 10);
        assert!(indices.iter().all(|&i| i < 100));
    }

    #[test]
    fn test_enter_allocates_and_frees_axis() {
        setup();
        let outer = IArange::new("outer", IArangeOptions::new().size(4)).unwrap();
        let inner = IArange::new("inner", IArangeOptions::new().size(3)).unwrap();
        {
            let a = outer.enter().unwrap();
            let b = inner.enter().unwrap();
            assert_eq!((a.dim(), b.dim()), (-1, -2));
            assert!(!a.is_wrapped());
        }
        assert!(dim_occupancy().is_empty());
        assert_eq!(outer.dim(), Some(-1));
    }

    #[test]
    fn test_wrapped_enter_pushes_scale_and_indep() {
        setup();
        let _trace = push_handler(Handler::Trace(TraceMessenger::new()));
        let data = IArange::new("data", IArangeOptions::new().size(100).subsample_size(10)).unwrap();
        {
            let scope = data.enter().unwrap();
            assert!(scope.is_wrapped());
            assert_eq!(stack_depth(), 3);
        }
        assert_eq!(stack_depth(), 1);
    }

    #[test]
    fn test_irange_iterates_in_order_and_restarts() {
        setup();
        let range = irange("data", 10, IRangeOptions::new().subsample_size(10)).unwrap();
        let first: Vec<usize> = range.iter().collect();
        let second: Vec<usize> = range.iter().collect();
        assert_eq!(first, (0..10).collect::<Vec<_>>());
        assert_eq!(first, second);
    }

    #[test]
    fn test_irange_handlers_are_released_after_loop() {
        setup();
        let _trace = push_handler(Handler::Trace(TraceMessenger::new()));
        let range = irange("loop", 3, IRangeOptions::new()).unwrap();
        for _ in &range {
            assert_eq!(stack_depth(), 3);
        }
        assert_eq!(stack_depth(), 1);
    }

    #[test]
    fn test_irange_abandoned_loop_releases_handlers() {
        setup();
        let _trace = push_handler(Handler::Trace(TraceMessenger::new()));
        let range = irange("loop", 5, IRangeOptions::new()).unwrap();
        for i in &range {
            if i == 1 {
                break;
            }
        }
        assert_eq!(stack_depth(), 1);
    }
}
