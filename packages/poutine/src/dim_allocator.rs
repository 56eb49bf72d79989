//! Tensor-axis bookkeeping for vectorized independence contexts.
//!
//! Dimensions are indexed from the right: slot `i` of the stack is axis
//! `-(i + 1)`.

use crate::error::{PoutineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimAllocator {
    // In reverse orientation of log_prob.shape.
    stack: Vec<Option<String>>,
}

impl DimAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an axis for `name`. `None` picks the rightmost axis left of every
    /// claimed one; `Some(dim)` claims exactly `dim`, which must be negative.
    pub fn allocate(&mut self, name: &str, dim: Option<isize>) -> Result<isize> {
        if self.stack.iter().flatten().any(|held| held == name) {
            return Err(PoutineError::DuplicateIndependenceContext {
                name: name.to_string(),
            });
        }
        let dim = match dim {
            None => {
                self.stack.push(Some(name.to_string()));
                -(self.stack.len() as isize)
            }
            Some(dim) if dim >= 0 => {
                return Err(PoutineError::InvalidDim {
                    name: name.to_string(),
                    dim,
                });
            }
            Some(dim) => {
                let slot = Self::slot(dim);
                if self.stack.len() <= slot {
                    self.stack.resize(slot + 1, None);
                }
                if let Some(other) = &self.stack[slot] {
                    return Err(PoutineError::axis_collision(name, other.clone(), dim));
                }
                self.stack[slot] = Some(name.to_string());
                dim
            }
        };
        log::debug!("allocated dim={dim} to iarange \"{name}\"");
        Ok(dim)
    }

    /// Release `dim`, which must still be held by `name`.
    pub fn free(&mut self, name: &str, dim: isize) -> Result<()> {
        let found = if dim < 0 {
            self.stack.get(Self::slot(dim)).cloned().flatten()
        } else {
            None
        };
        if found.as_deref() != Some(name) {
            return Err(PoutineError::DimNotHeld {
                name: name.to_string(),
                dim,
                found,
            });
        }
        self.stack[Self::slot(dim)] = None;
        while matches!(self.stack.last(), Some(None)) {
            self.stack.pop();
        }
        Ok(())
    }

    /// Holder of `dim`, if any.
    pub fn holder(&self, dim: isize) -> Option<&str> {
        if dim >= 0 {
            return None;
        }
        self.stack.get(Self::slot(dim))?.as_deref()
    }

    /// Snapshot of the slots, index 0 = axis -1.
    pub fn occupancy(&self) -> Vec<Option<String>> {
        self.stack.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    fn slot(dim: isize) -> usize {
        (-1 - dim) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_allocation_moves_left() {
        let mut alloc = DimAllocator::new();
        assert_eq!(alloc.allocate("a", None).unwrap(), -1);
        assert_eq!(alloc.allocate("b", None).unwrap(), -2);
        assert_eq!(alloc.allocate("c", None).unwrap(), -3);
    }

    #[test]
    fn test_manual_allocation_pads_and_auto_skips_it() {
        let mut alloc = DimAllocator::new();
        assert_eq!(alloc.allocate("m", Some(-2)).unwrap(), -2);
        assert_eq!(alloc.occupancy(), vec![None, Some("m".to_string())]);
        assert_eq!(alloc.allocate("a", None).unwrap(), -3);
        assert_eq!(alloc.allocate("b", Some(-1)).unwrap(), -1);
    }

    #[test]
    fn test_collision_names_both_contexts() {
        let mut alloc = DimAllocator::new();
        alloc.allocate("x", Some(-1)).unwrap();
        let err = alloc.allocate("y", Some(-1)).unwrap_err();
        assert_eq!(
            err,
            PoutineError::AxisCollision {
                name: "y".to_string(),
                other: "x".to_string(),
                dim: -1,
                suggested: -2,
            }
        );
    }

    #[test]
    fn test_non_negative_dim_is_rejected() {
        let mut alloc = DimAllocator::new();
        assert!(matches!(
            alloc.allocate("x", Some(0)),
            Err(PoutineError::InvalidDim { dim: 0, .. })
        ));
        assert!(alloc.is_empty());
    }

    #[test]
    fn test_duplicate_live_name_is_rejected() {
        let mut alloc = DimAllocator::new();
        alloc.allocate("x", None).unwrap();
        assert!(matches!(
            alloc.allocate("x", None),
            Err(PoutineError::DuplicateIndependenceContext { .. })
        ));
    }

    #[test]
    fn test_free_trims_trailing_slots() {
        let mut alloc = DimAllocator::new();
        alloc.allocate("a", None).unwrap();
        alloc.allocate("far", Some(-4)).unwrap();
        alloc.free("far", -4).unwrap();
        assert_eq!(alloc.occupancy(), vec![Some("a".to_string())]);
        alloc.free("a", -1).unwrap();
        assert!(alloc.is_empty());
    }

    #[test]
    fn test_free_verifies_holder() {
        let mut alloc = DimAllocator::new();
        alloc.allocate("a", None).unwrap();
        let err = alloc.free("b", -1).unwrap_err();
        assert!(matches!(err, PoutineError::DimNotHeld { found: Some(_), .. }));
        assert!(alloc.free("a", -7).is_err());
        assert_eq!(alloc.holder(-1), Some("a"));
    }

    #[test]
    fn test_inner_free_keeps_outer_slot() {
        let mut alloc = DimAllocator::new();
        alloc.allocate("outer", None).unwrap();
        alloc.allocate("inner", None).unwrap();
        alloc.free("outer", -1).unwrap();
        assert_eq!(alloc.occupancy(), vec![None, Some("inner".to_string())]);
        alloc.free("inner", -2).unwrap();
        assert!(alloc.is_empty());
    }
}
