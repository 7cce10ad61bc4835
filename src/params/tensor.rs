//! Dense tensor storage.

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A dense row-major tensor of 32-bit floats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking that the shape covers the data exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        match element_count(&shape) {
            Some(expected) if expected == data.len() => Ok(Self { shape, data }),
            Some(expected) => Err(Error::InvalidParameters(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            ))),
            None => Err(Error::InvalidParameters(format!(
                "shape {:?} overflows the element count",
                shape
            ))),
        }
    }

    /// A one-dimensional tensor.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// A zero-filled tensor.
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// In-place access for a model's own working copy. Tensors inside a
    /// `ParameterSet` are behind a shared pointer and never reach this.
    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Number of scalar elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether every element is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Whether the shape covers the data exactly. Always true for tensors
    /// built through `new`; decoded tensors may violate it.
    pub fn is_consistent(&self) -> bool {
        element_count(&self.shape) == Some(self.data.len())
    }
}

/// Product of the dimensions, `None` on overflow.
fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}
