//! Model parameters.
//!
//! Provides:
//! - Dense tensors with validated shapes
//! - Immutable, shareable parameter sets
//! - Content digests for provenance

pub mod set;
pub mod tensor;

pub use set::ParameterSet;
pub use tensor::Tensor;
