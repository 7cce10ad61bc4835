//! Dataset Module
//!
//! Deterministic per-client partitions:
//! - Synthetic linear regression data
//! - IID sharding of a shared image dataset

pub mod images;
pub mod provider;
pub mod regression;

pub use images::{ImageData, ImagePartitioner};
pub use provider::{DatasetProvider, Partition};
pub use regression::{RegressionData, SyntheticRegression};
