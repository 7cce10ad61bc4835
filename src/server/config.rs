//! Federation configuration.
//!
//! Loaded from JSON; every round receives an immutable `RoundConfig` derived
//! from it.

use crate::core::{ConfigValue, Error, Hyperparameters, Result};
use crate::models::ModelConfig;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Run-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Number of rounds to attempt
    pub num_rounds: u64,
    /// Fraction of available clients sampled for training
    pub fraction_fit: f64,
    /// Fraction of available clients sampled for evaluation; 0 disables it
    pub fraction_evaluate: f64,
    /// Minimum clients trained per round, and the fit quorum
    pub min_fit_clients: usize,
    /// Minimum clients evaluated per round, and the evaluate quorum
    pub min_evaluate_clients: usize,
    /// Clients that must be reachable for a round to start
    pub min_available_clients: usize,
    /// Local passes per fit; the model's default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_epochs: Option<usize>,
    /// Local step size
    pub learning_rate: f64,
    /// Local mini-batch size
    pub batch_size: usize,
    /// Per-call timeout in milliseconds
    pub call_timeout_ms: u64,
    /// Seed for client sampling; fresh entropy when absent
    pub sampling_seed: Option<u64>,
    /// Model trained by the federation
    pub model: ModelConfig,
    /// Extra values forwarded to clients
    #[serde(
        serialize_with = "hyperparameters_to_json",
        deserialize_with = "hyperparameters_from_json"
    )]
    pub hyperparameters: Hyperparameters,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            num_rounds: 3,
            fraction_fit: 1.0,
            fraction_evaluate: 0.5,
            min_fit_clients: 2,
            min_evaluate_clients: 2,
            min_available_clients: 2,
            local_epochs: None,
            learning_rate: 0.01,
            batch_size: 32,
            call_timeout_ms: 30_000,
            sampling_seed: None,
            model: ModelConfig::default(),
            hyperparameters: Hyperparameters::new(),
        }
    }
}

impl FederationConfig {
    /// Parse and validate a JSON document. Missing keys take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_rounds(mut self, num_rounds: u64) -> Self {
        self.num_rounds = num_rounds;
        self
    }

    pub fn with_fractions(mut self, fit: f64, evaluate: f64) -> Self {
        self.fraction_fit = fit;
        self.fraction_evaluate = evaluate;
        self
    }

    /// Set all three client minimums.
    pub fn with_min_clients(mut self, fit: usize, evaluate: usize, available: usize) -> Self {
        self.min_fit_clients = fit;
        self.min_evaluate_clients = evaluate;
        self.min_available_clients = available;
        self
    }

    pub fn with_local_training(mut self, epochs: usize, learning_rate: f64) -> Self {
        self.local_epochs = Some(epochs);
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_sampling_seed(mut self, seed: u64) -> Self {
        self.sampling_seed = Some(seed);
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn with_hyperparameter(mut self, key: &str, value: impl Into<ConfigValue>) -> Self {
        self.hyperparameters.set(key, value);
        self
    }

    /// Check every range constraint.
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: String) -> Result<()> {
            Err(Error::InvalidConfig(msg))
        }

        if self.num_rounds == 0 {
            return invalid("num_rounds must be positive".to_string());
        }
        for (name, value) in [
            ("fraction_fit", self.fraction_fit),
            ("fraction_evaluate", self.fraction_evaluate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        for (name, value) in [
            ("min_fit_clients", self.min_fit_clients),
            ("min_evaluate_clients", self.min_evaluate_clients),
            ("min_available_clients", self.min_available_clients),
            ("local_epochs", self.local_epochs()),
            ("batch_size", self.batch_size),
        ] {
            if value == 0 {
                return invalid(format!("{} must be at least 1", name));
            }
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if self.call_timeout_ms == 0 {
            return invalid("call_timeout_ms must be positive".to_string());
        }
        self.model.validate()
    }

    /// Effective local passes per fit.
    pub fn local_epochs(&self) -> usize {
        self.local_epochs
            .unwrap_or_else(|| self.model.kind().default_local_epochs())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Configuration for round `round_number`.
    ///
    /// `server_round`, `local_epochs`, `learning_rate` and `batch_size` are
    /// always present in the round's hyperparameters.
    pub fn round_config(&self, round_number: u64) -> RoundConfig {
        let hyperparameters = self.hyperparameters.merged(
            &Hyperparameters::new()
                .with("server_round", round_number as i64)
                .with("local_epochs", self.local_epochs())
                .with("learning_rate", self.learning_rate)
                .with("batch_size", self.batch_size),
        );
        RoundConfig {
            round_number,
            fraction_fit: self.fraction_fit,
            fraction_evaluate: self.fraction_evaluate,
            min_fit_clients: self.min_fit_clients,
            min_evaluate_clients: self.min_evaluate_clients,
            min_available_clients: self.min_available_clients,
            hyperparameters,
            call_timeout: self.call_timeout(),
            sampling_seed: self.sampling_seed.map(|s| s.wrapping_add(round_number)),
        }
    }
}

/// Immutable per-round configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundConfig {
    /// Round number, starting at 1
    pub round_number: u64,
    pub fraction_fit: f64,
    pub fraction_evaluate: f64,
    pub min_fit_clients: usize,
    pub min_evaluate_clients: usize,
    pub min_available_clients: usize,
    /// Sent to every client with each request
    pub hyperparameters: Hyperparameters,
    /// Bound on each client call
    pub call_timeout: Duration,
    /// Sampling seed for this round
    pub sampling_seed: Option<u64>,
}

impl RoundConfig {
    /// Whether the evaluation phase runs at all.
    pub fn evaluation_enabled(&self) -> bool {
        self.fraction_evaluate > 0.0
    }
}

fn hyperparameters_to_json<S: Serializer>(
    hp: &Hyperparameters,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(hp.len()))?;
    for (key, value) in hp.iter() {
        map.serialize_entry(key, &value.to_json())?;
    }
    map.end()
}

fn hyperparameters_from_json<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Hyperparameters, D::Error> {
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    let mut hp = Hyperparameters::new();
    for (key, value) in raw {
        let value = ConfigValue::from_json(&value)
            .ok_or_else(|| D::Error::custom(format!("hyperparameter {} must be a scalar", key)))?;
        hp.set(&key, value);
    }
    Ok(hp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CnnConfig;

    #[test]
    fn test_defaults() {
        let config = FederationConfig::default();
        assert_eq!(config.num_rounds, 3);
        assert_eq!(config.fraction_fit, 1.0);
        assert_eq!(config.fraction_evaluate, 0.5);
        assert_eq!(config.min_available_clients, 2);
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deep_cnn_json_is_invalid_config() {
        let blocks = vec!["1"; 70].join(",");
        let json = format!(
            r#"{{"model": {{"kind": "cnn", "in_channels": 1, "height": 8, "width": 8,
                "conv_channels": [{}], "hidden_units": 4, "num_classes": 2}}}}"#,
            blocks
        );
        let err = FederationConfig::from_json_str(&json).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_from_json() {
        let config = FederationConfig::from_json_str(
            r#"{
                "num_rounds": 5,
                "fraction_evaluate": 0.0,
                "local_epochs": 10,
                "model": {"kind": "linear", "n_features": 4},
                "hyperparameters": {"momentum": 0.5, "tag": "demo", "shuffle": true}
            }"#,
        )
        .unwrap();
        assert_eq!(config.num_rounds, 5);
        assert_eq!(config.min_fit_clients, 2);
        assert_eq!(config.model, ModelConfig::Linear { n_features: 4 });
        assert_eq!(config.hyperparameters.get_f64("momentum"), Some(0.5));
        assert_eq!(config.hyperparameters.get_str("tag"), Some("demo"));
    }

    #[test]
    fn test_json_round_trip() {
        let config = FederationConfig::default()
            .with_model(ModelConfig::Cnn(CnnConfig::default()))
            .with_hyperparameter("momentum", 0.9);
        let parsed = FederationConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(FederationConfig::default().with_rounds(0).validate().is_err());
        assert!(FederationConfig::default()
            .with_fractions(1.5, 0.5)
            .validate()
            .is_err());
        assert!(FederationConfig::default()
            .with_min_clients(0, 1, 1)
            .validate()
            .is_err());
        assert!(FederationConfig::default()
            .with_local_training(1, 0.0)
            .validate()
            .is_err());
        assert!(matches!(
            FederationConfig::from_json_str(r#"{"hyperparameters": {"bad": [1, 2]}}"#),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_local_epochs_default_per_model() {
        let linear = FederationConfig::default();
        assert_eq!(linear.local_epochs(), 10);
        let cnn = FederationConfig::default().with_model(ModelConfig::Cnn(CnnConfig::default()));
        assert_eq!(cnn.local_epochs(), 1);
        assert_eq!(cnn.round_config(1).hyperparameters.get_usize("local_epochs"), Some(1));
        assert_eq!(cnn.with_local_training(3, 0.1).local_epochs(), 3);
    }

    #[test]
    fn test_round_config_injects_keys() {
        let config = FederationConfig::default()
            .with_local_training(4, 0.05)
            .with_hyperparameter("learning_rate", 1.0)
            .with_sampling_seed(10);
        let round = config.round_config(2);
        assert_eq!(round.round_number, 2);
        assert_eq!(round.hyperparameters.get_u64("server_round"), Some(2));
        assert_eq!(round.hyperparameters.get_usize("local_epochs"), Some(4));
        assert_eq!(round.hyperparameters.get_f64("learning_rate"), Some(0.05));
        assert_eq!(round.sampling_seed, Some(12));
        assert!(round.evaluation_enabled());
    }
}
