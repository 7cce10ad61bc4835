//! Local learner interface for on-device training.
//!
//! Every model family plugs into federation through `LocalTrainer`. The
//! coordinator never sees a concrete model type, only `ParameterSet`s.

use crate::core::{Error, Hyperparameters, Metrics, Result};
use crate::models::cnn::{CnnConfig, ConvNet};
use crate::models::linear::LinearRegression;
use crate::params::ParameterSet;
use serde::{Deserialize, Serialize};

/// Model families known to the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Linear regressor trained with batch gradient descent
    Linear,
    /// Convolutional classifier trained with mini-batch SGD
    Cnn,
}

impl ModelKind {
    /// Local passes per fit when the run does not set `local_epochs`.
    pub fn default_local_epochs(self) -> usize {
        match self {
            ModelKind::Linear => 10,
            ModelKind::Cnn => 1,
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Linear => write!(f, "linear"),
            ModelKind::Cnn => write!(f, "cnn"),
        }
    }
}

/// Model selection and geometry, chosen once at construction time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelConfig {
    Linear { n_features: usize },
    Cnn(CnnConfig),
}

impl ModelConfig {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelConfig::Linear { .. } => ModelKind::Linear,
            ModelConfig::Cnn(_) => ModelKind::Cnn,
        }
    }

    /// Check geometry before anything is built.
    pub fn validate(&self) -> Result<()> {
        match self {
            ModelConfig::Linear { n_features } if *n_features == 0 => Err(Error::InvalidConfig(
                "n_features must be positive".to_string(),
            )),
            ModelConfig::Linear { .. } => Ok(()),
            ModelConfig::Cnn(config) => config.validate(),
        }
    }

    /// Parameters of a freshly initialized model, used to seed the global model.
    pub fn initial_parameters(&self, seed: u64) -> Result<ParameterSet> {
        match self {
            ModelConfig::Linear { n_features } => {
                Ok(LinearRegression::new(*n_features).get_parameters())
            }
            ModelConfig::Cnn(config) => Ok(ConvNet::with_seed(config.clone(), seed)?.get_parameters()),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::Linear { n_features: 10 }
    }
}

/// Local training hyperparameters, resolved from a request's config.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainConfig {
    /// Passes over the local training partition
    pub local_epochs: usize,
    /// Step size
    pub learning_rate: f32,
    /// Mini-batch size (ignored by full-batch learners)
    pub batch_size: usize,
    /// SGD momentum factor
    pub momentum: f32,
    /// Shuffle seed; fresh entropy when absent
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            local_epochs: 1,
            learning_rate: 0.01,
            batch_size: 32,
            momentum: 0.9,
            seed: None,
        }
    }
}

impl TrainConfig {
    /// Overlay request hyperparameters on these defaults.
    pub fn resolve(&self, hp: &Hyperparameters) -> Result<Self> {
        let resolved = Self {
            local_epochs: hp.get_usize("local_epochs").unwrap_or(self.local_epochs),
            learning_rate: hp
                .get_f64("learning_rate")
                .map(|v| v as f32)
                .unwrap_or(self.learning_rate),
            batch_size: hp.get_usize("batch_size").unwrap_or(self.batch_size),
            momentum: hp
                .get_f64("momentum")
                .map(|v| v as f32)
                .unwrap_or(self.momentum),
            seed: hp.get_u64("seed").or(self.seed),
        };

        if resolved.local_epochs == 0 {
            return Err(Error::Training("local_epochs must be positive".to_string()));
        }
        if !(resolved.learning_rate > 0.0 && resolved.learning_rate.is_finite()) {
            return Err(Error::Training("learning_rate must be positive".to_string()));
        }
        if resolved.batch_size == 0 {
            return Err(Error::Training("batch_size must be positive".to_string()));
        }
        Ok(resolved)
    }
}

/// Result of local training.
#[derive(Clone, Debug)]
pub struct TrainingResult {
    /// Mean per-example training loss
    pub loss: f64,
    /// Number of examples in the training partition
    pub num_examples: u64,
    /// Extra model-specific metrics
    pub metrics: Metrics,
}

/// Result of local evaluation.
#[derive(Clone, Debug)]
pub struct EvaluationResult {
    /// Mean per-example loss
    pub loss: f64,
    /// Number of examples evaluated
    pub num_examples: u64,
    /// Model-specific metrics (accuracy, r2_score, ...)
    pub metrics: Metrics,
}

/// Capability set every model family provides.
///
/// `set_parameters(&get_parameters())` must leave the model unchanged, and
/// `get_parameters` must not depend on any training data.
pub trait LocalTrainer: Send {
    /// Data split type this model trains on.
    type Data: Send;

    /// Model family.
    fn kind(&self) -> ModelKind;

    /// Snapshot the current parameters.
    fn get_parameters(&self) -> ParameterSet;

    /// Replace the parameters. The input is copied, never retained mutably.
    fn set_parameters(&mut self, parameters: &ParameterSet) -> Result<()>;

    /// Train on a local split.
    fn fit(&mut self, data: &Self::Data, config: &TrainConfig) -> Result<TrainingResult>;

    /// Evaluate on a local split without updating parameters.
    fn evaluate(&self, data: &Self::Data) -> Result<EvaluationResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_config_resolution() {
        let hp = Hyperparameters::new()
            .with("local_epochs", 4usize)
            .with("learning_rate", 0.1)
            .with("seed", 7usize);
        let config = TrainConfig::default().resolve(&hp).unwrap();
        assert_eq!(config.local_epochs, 4);
        assert!((config.learning_rate - 0.1).abs() < 1e-7);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn test_train_config_rejects_bad_values() {
        let hp = Hyperparameters::new().with("local_epochs", 0usize);
        assert!(TrainConfig::default().resolve(&hp).is_err());

        let hp = Hyperparameters::new().with("learning_rate", -1.0);
        assert!(TrainConfig::default().resolve(&hp).is_err());
    }

    #[test]
    fn test_model_config_json() {
        let config: ModelConfig =
            serde_json::from_str(r#"{"kind": "linear", "n_features": 3}"#).unwrap();
        assert_eq!(config, ModelConfig::Linear { n_features: 3 });
        assert_eq!(config.kind(), ModelKind::Linear);

        let params = config.initial_parameters(0).unwrap();
        assert_eq!(params.shapes(), vec![vec![3], vec![1]]);
    }

    #[test]
    fn test_model_config_validation() {
        assert!(ModelConfig::Linear { n_features: 0 }.validate().is_err());
        assert!(ModelConfig::Cnn(CnnConfig::default()).validate().is_ok());
    }
}
