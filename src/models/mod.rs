//! Local Models Module
//!
//! Client-side learners behind one capability interface:
//! - Linear regression (full-batch gradient descent)
//! - Convolutional classifier (mini-batch SGD with momentum)

pub mod cnn;
pub mod learner;
pub mod linear;

pub use cnn::{CnnConfig, ConvNet};
pub use learner::{
    EvaluationResult, LocalTrainer, ModelConfig, ModelKind, TrainConfig, TrainingResult,
};
pub use linear::LinearRegression;
