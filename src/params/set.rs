//! Immutable, ordered parameter sets.
//!
//! A `ParameterSet` is shared by reference count, so handing the global model
//! to many clients never copies the buffers and never exposes them to mutation.

use crate::core::{Error, Hash256, Result};
use crate::params::tensor::Tensor;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::sync::Arc;

/// One model's full trainable state, in a fixed tensor order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    tensors: Arc<Vec<Tensor>>,
}

impl ParameterSet {
    /// Freeze a list of tensors into a parameter set.
    pub fn new(tensors: Vec<Tensor>) -> Self {
        Self {
            tensors: Arc::new(tensors),
        }
    }

    /// An empty parameter set.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// True when there are no tensors or every tensor is empty.
    pub fn is_empty(&self) -> bool {
        self.tensors.iter().all(|t| t.is_empty())
    }

    /// Shapes of every tensor, in order.
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.tensors.iter().map(|t| t.shape().to_vec()).collect()
    }

    /// Total number of scalar parameters.
    pub fn num_elements(&self) -> usize {
        self.tensors.iter().map(|t| t.len()).sum()
    }

    /// Whether every value is finite.
    pub fn is_finite(&self) -> bool {
        self.tensors.iter().all(|t| t.is_finite())
    }

    /// Non-empty, internally consistent and finite.
    pub fn is_well_formed(&self) -> bool {
        !self.is_empty() && self.tensors.iter().all(|t| t.is_consistent()) && self.is_finite()
    }

    /// Whether both sets have the same tensor count and per-tensor shapes.
    pub fn same_shape(&self, other: &ParameterSet) -> bool {
        self.tensors.len() == other.tensors.len()
            && self
                .tensors
                .iter()
                .zip(other.tensors.iter())
                .all(|(a, b)| a.shape() == b.shape())
    }

    /// Describe the first shape difference, or `Ok` when shapes agree.
    pub fn check_shape(&self, expected: &ParameterSet) -> Result<()> {
        if self.tensors.len() != expected.tensors.len() {
            return Err(Error::ShapeMismatch(format!(
                "expected {} tensors, got {}",
                expected.tensors.len(),
                self.tensors.len()
            )));
        }
        for (i, (got, want)) in self.tensors.iter().zip(expected.tensors.iter()).enumerate() {
            if got.shape() != want.shape() {
                return Err(Error::ShapeMismatch(format!(
                    "tensor {} has shape {:?}, expected {:?}",
                    i,
                    got.shape(),
                    want.shape()
                )));
            }
        }
        Ok(())
    }

    /// Whether two handles point at the same buffers.
    pub fn ptr_eq(&self, other: &ParameterSet) -> bool {
        Arc::ptr_eq(&self.tensors, &other.tensors)
    }

    /// SHA3-256 over shapes and little-endian values.
    pub fn digest(&self) -> Hash256 {
        let mut hasher = Sha3_256::new();
        hasher.update((self.tensors.len() as u64).to_le_bytes());
        for tensor in self.tensors.iter() {
            hasher.update((tensor.shape().len() as u64).to_le_bytes());
            for dim in tensor.shape() {
                hasher.update((*dim as u64).to_le_bytes());
            }
            for v in tensor.data() {
                hasher.update(v.to_le_bytes());
            }
        }
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Hash256::new(bytes)
    }
}

impl From<Vec<Tensor>> for ParameterSet {
    fn from(tensors: Vec<Tensor>) -> Self {
        Self::new(tensors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParameterSet {
        ParameterSet::new(vec![
            Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            Tensor::from_vec(vec![0.5]),
        ])
    }

    #[test]
    fn test_shapes_and_counts() {
        let p = sample();
        assert_eq!(p.len(), 2);
        assert_eq!(p.num_elements(), 5);
        assert_eq!(p.shapes(), vec![vec![2, 2], vec![1]]);
        assert!(!p.is_empty());
        assert!(ParameterSet::empty().is_empty());
    }

    #[test]
    fn test_same_shape() {
        let a = sample();
        let b = ParameterSet::new(vec![Tensor::zeros(&[2, 2]), Tensor::zeros(&[1])]);
        let c = ParameterSet::new(vec![Tensor::zeros(&[4]), Tensor::zeros(&[1])]);
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
        assert!(matches!(c.check_shape(&a), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_clone_shares_buffers() {
        let a = sample();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_sensitive_to_values_and_order() {
        let a = sample();
        let reordered = ParameterSet::new(vec![
            Tensor::from_vec(vec![0.5]),
            Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        ]);
        let reshaped = ParameterSet::new(vec![
            Tensor::new(vec![4], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            Tensor::from_vec(vec![0.5]),
        ]);
        assert_eq!(a.digest(), sample().digest());
        assert_ne!(a.digest(), reordered.digest());
        assert_ne!(a.digest(), reshaped.digest());
    }

    #[test]
    fn test_well_formed() {
        assert!(sample().is_well_formed());
        assert!(!ParameterSet::empty().is_well_formed());
        let nan = ParameterSet::new(vec![Tensor::from_vec(vec![f32::NAN])]);
        assert!(!nan.is_well_formed());
    }
}
