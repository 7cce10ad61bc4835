//! Linear regression learner.
//!
//! Weights and bias trained by full-batch gradient descent on mean squared error.

use crate::core::{Error, Metrics, Result};
use crate::data::RegressionData;
use crate::models::learner::{
    EvaluationResult, LocalTrainer, ModelKind, TrainConfig, TrainingResult,
};
use crate::params::{ParameterSet, Tensor};

/// Linear model `y = x · w + b`.
#[derive(Clone, Debug)]
pub struct LinearRegression {
    n_features: usize,
    weights: Vec<f32>,
    bias: f32,
}

impl LinearRegression {
    /// Create a zero-initialized model.
    pub fn new(n_features: usize) -> Self {
        Self {
            n_features,
            weights: vec![0.0; n_features],
            bias: 0.0,
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Predict one sample.
    pub fn predict(&self, features: &[f32]) -> f32 {
        self.weights
            .iter()
            .zip(features.iter())
            .map(|(w, x)| w * x)
            .sum::<f32>()
            + self.bias
    }

    fn check_data(&self, data: &RegressionData) -> Result<()> {
        if data.features.len() != data.targets.len() {
            return Err(Error::Dataset(format!(
                "{} feature rows but {} targets",
                data.features.len(),
                data.targets.len()
            )));
        }
        if let Some(row) = data.features.iter().find(|r| r.len() != self.n_features) {
            return Err(Error::Dataset(format!(
                "expected {} features, got {}",
                self.n_features,
                row.len()
            )));
        }
        Ok(())
    }

    fn mse(&self, data: &RegressionData) -> f64 {
        let n = data.len();
        if n == 0 {
            return 0.0;
        }
        data.features
            .iter()
            .zip(data.targets.iter())
            .map(|(x, y)| {
                let e = (self.predict(x) - y) as f64;
                e * e
            })
            .sum::<f64>()
            / n as f64
    }
}

impl LocalTrainer for LinearRegression {
    type Data = RegressionData;

    fn kind(&self) -> ModelKind {
        ModelKind::Linear
    }

    fn get_parameters(&self) -> ParameterSet {
        ParameterSet::new(vec![
            Tensor::from_vec(self.weights.clone()),
            Tensor::from_vec(vec![self.bias]),
        ])
    }

    fn set_parameters(&mut self, parameters: &ParameterSet) -> Result<()> {
        parameters.check_shape(&self.get_parameters())?;
        let tensors = parameters.tensors();
        self.weights = tensors[0].data().to_vec();
        self.bias = tensors[1].data()[0];
        Ok(())
    }

    fn fit(&mut self, data: &RegressionData, config: &TrainConfig) -> Result<TrainingResult> {
        self.check_data(data)?;
        let n = data.len();
        if n == 0 {
            return Ok(TrainingResult {
                loss: 0.0,
                num_examples: 0,
                metrics: Metrics::new(),
            });
        }

        let scale = 2.0 / n as f64;
        let lr = config.learning_rate as f64;

        for _ in 0..config.local_epochs {
            let mut grad_w = vec![0.0f64; self.n_features];
            let mut grad_b = 0.0f64;

            for (x, y) in data.features.iter().zip(data.targets.iter()) {
                let error = (self.predict(x) - y) as f64;
                for (g, xi) in grad_w.iter_mut().zip(x.iter()) {
                    *g += error * *xi as f64;
                }
                grad_b += error;
            }

            for (w, g) in self.weights.iter_mut().zip(grad_w.iter()) {
                *w -= (lr * scale * g) as f32;
            }
            self.bias -= (lr * scale * grad_b) as f32;
        }

        let loss = self.mse(data);
        let mut metrics = Metrics::new();
        metrics.insert("train_loss".to_string(), loss);

        Ok(TrainingResult {
            loss,
            num_examples: n as u64,
            metrics,
        })
    }

    fn evaluate(&self, data: &RegressionData) -> Result<EvaluationResult> {
        self.check_data(data)?;
        let n = data.len();
        if n == 0 {
            return Ok(EvaluationResult {
                loss: 0.0,
                num_examples: 0,
                metrics: Metrics::new(),
            });
        }

        let mse = self.mse(data);
        let mean = data.targets.iter().map(|y| *y as f64).sum::<f64>() / n as f64;
        let ss_res = mse * n as f64;
        let ss_tot: f64 = data
            .targets
            .iter()
            .map(|y| (*y as f64 - mean).powi(2))
            .sum();
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

        let mut metrics = Metrics::new();
        metrics.insert("r2_score".to_string(), r2);

        Ok(EvaluationResult {
            loss: mse,
            num_examples: n as u64,
            metrics,
        })
    }
}
