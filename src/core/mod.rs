//! Core utilities and common types for fedround.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
