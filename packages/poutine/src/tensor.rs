//! Minimal tensor values flowing through messages.
//!
//! The tensor engine is an external collaborator; this type only carries what
//! the handler stack needs: data, shape, value equality and storage identity.

use std::fmt;
use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::{PoutineError, Result};

#[derive(Debug)]
struct Storage {
    data: Vec<f64>,
    shape: Vec<usize>,
}

/// Immutable, reference-counted tensor. Cloning shares storage, so two clones
/// are the same parameter for `ptr_eq`.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: Arc<Storage>,
}

impl Tensor {
    pub fn new(data: Vec<f64>, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(PoutineError::ShapeMismatch {
                expected: shape,
                actual: vec![data.len()],
            });
        }
        Ok(Tensor {
            storage: Arc::new(Storage { data, shape }),
        })
    }

    pub fn scalar(value: f64) -> Self {
        Tensor {
            storage: Arc::new(Storage {
                data: vec![value],
                shape: Vec::new(),
            }),
        }
    }

    /// One-dimensional tensor.
    pub fn from_vec(data: Vec<f64>) -> Self {
        let shape = vec![data.len()];
        Tensor {
            storage: Arc::new(Storage { data, shape }),
        }
    }

    pub fn arange(n: usize) -> Self {
        Tensor::from_vec((0..n).map(|i| i as f64).collect())
    }

    pub fn from_indices(indices: &[usize]) -> Self {
        Tensor::from_vec(indices.iter().map(|&i| i as f64).collect())
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Tensor::filled(shape, 0.0)
    }

    pub fn ones(shape: &[usize]) -> Self {
        Tensor::filled(shape, 1.0)
    }

    fn filled(shape: &[usize], value: f64) -> Self {
        let n = shape.iter().product();
        Tensor {
            storage: Arc::new(Storage {
                data: vec![value; n],
                shape: shape.to_vec(),
            }),
        }
    }

    pub fn data(&self) -> &[f64] {
        &self.storage.data
    }

    pub fn shape(&self) -> &[usize] {
        &self.storage.shape
    }

    pub fn numel(&self) -> usize {
        self.storage.data.len()
    }

    /// Length of the leading axis; a scalar has length 1.
    pub fn len(&self) -> usize {
        self.storage.shape.first().copied().unwrap_or(1)
    }

    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    /// The single element of a one-element tensor.
    pub fn item(&self) -> Option<f64> {
        match self.storage.data.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    /// Interpret the data as integer indices. Negative entries read as 0;
    /// explicit subsamples are checked by `resolve_subsample` beforehand.
    pub fn to_indices(&self) -> Vec<usize> {
        self.storage
            .data
            .iter()
            .map(|v| if *v <= 0.0 { 0 } else { v.round() as usize })
            .collect()
    }

    /// Gather entries of a one-dimensional tensor at `indices`.
    pub fn index_select(&self, indices: &[usize]) -> Result<Tensor> {
        let data = &self.storage.data;
        let mut out = Vec::with_capacity(indices.len());
        for &i in indices {
            let value = data.get(i).copied().ok_or_else(|| PoutineError::ShapeMismatch {
                expected: vec![i + 1],
                actual: self.shape().to_vec(),
            })?;
            out.push(value);
        }
        Ok(Tensor::from_vec(out))
    }

    /// True when both tensors share storage, i.e. are the same parameter.
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.storage.shape == other.storage.shape && self.storage.data == other.storage.data)
    }
}

impl From<f64> for Tensor {
    fn from(value: f64) -> Self {
        Tensor::scalar(value)
    }
}

impl From<Vec<f64>> for Tensor {
    fn from(data: Vec<f64>) -> Self {
        Tensor::from_vec(data)
    }
}

impl Serialize for Tensor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Tensor", 2)?;
        state.serialize_field("data", self.data())?;
        state.serialize_field("shape", self.shape())?;
        state.end()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shape().is_empty() {
            return write!(f, "tensor({})", self.data()[0]);
        }
        write!(f, "tensor({:?}, shape={:?})", self.data(), self.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_inconsistent_shape() {
        let err = Tensor::new(vec![1.0, 2.0, 3.0], vec![2, 2]).unwrap_err();
        assert!(matches!(err, PoutineError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_clone_shares_identity_but_copies_do_not() {
        let a = Tensor::from_vec(vec![1.0, 2.0]);
        let b = a.clone();
        let c = Tensor::from_vec(vec![1.0, 2.0]);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a, c);
    }

    #[test]
    fn test_arange_and_indices() {
        let t = Tensor::arange(4);
        assert_eq!(t.shape(), &[4]);
        assert_eq!(t.to_indices(), vec![0, 1, 2, 3]);
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_item_only_for_single_element() {
        assert_eq!(Tensor::scalar(2.5).item(), Some(2.5));
        assert_eq!(Tensor::zeros(&[2]).item(), None);
    }

    #[test]
    fn test_index_select() {
        let data = Tensor::from_vec(vec![10.0, 11.0, 12.0]);
        let picked = data.index_select(&[2, 0]).unwrap();
        assert_eq!(picked.data(), &[12.0, 10.0]);
        assert!(data.index_select(&[3]).is_err());
    }
}
