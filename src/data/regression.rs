//! Synthetic regression partitions.

use crate::core::{Error, Result};
use crate::data::provider::{check_partition, gaussian, DatasetProvider, Partition};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Seed shared by every partition for the ground-truth weights.
const TRUTH_SEED: u64 = 42;

/// Feature rows and scalar targets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegressionData {
    pub features: Vec<Vec<f32>>,
    pub targets: Vec<f32>,
}

impl RegressionData {
    pub fn new(features: Vec<Vec<f32>>, targets: Vec<f32>) -> Self {
        Self { features, targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Generates `y = x · w* + 2 + noise` with partition-specific features.
///
/// All partitions share the same true weights, so federated averaging
/// converges towards them.
#[derive(Clone, Debug)]
pub struct SyntheticRegression {
    /// Samples per partition (before the train/test split)
    pub n_samples: usize,
    /// Feature dimension
    pub n_features: usize,
    /// Standard deviation of the target noise
    pub noise: f32,
    /// Fraction of samples used for training
    pub train_fraction: f32,
    true_weights: Vec<f32>,
    true_bias: f32,
}

impl SyntheticRegression {
    /// Create a generator.
    pub fn new(n_samples: usize, n_features: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(TRUTH_SEED);
        let true_weights = (0..n_features).map(|_| gaussian(&mut rng)).collect();
        Self {
            n_samples,
            n_features,
            noise: 0.1,
            train_fraction: 0.8,
            true_weights,
            true_bias: 2.0,
        }
    }

    /// Set the target noise.
    pub fn with_noise(mut self, noise: f32) -> Self {
        self.noise = noise;
        self
    }

    /// Ground-truth weights.
    pub fn true_weights(&self) -> &[f32] {
        &self.true_weights
    }

    pub fn true_bias(&self) -> f32 {
        self.true_bias
    }
}

impl Default for SyntheticRegression {
    fn default() -> Self {
        Self::new(100, 10)
    }
}

impl DatasetProvider for SyntheticRegression {
    type Data = RegressionData;

    fn load_partition(
        &self,
        partition_id: usize,
        num_partitions: usize,
    ) -> Result<Partition<RegressionData>> {
        check_partition(partition_id, num_partitions)?;
        if !(self.train_fraction > 0.0 && self.train_fraction <= 1.0) {
            return Err(Error::Dataset(format!(
                "train_fraction {} outside (0, 1]",
                self.train_fraction
            )));
        }

        let mut rng = StdRng::seed_from_u64(TRUTH_SEED + partition_id as u64);
        let mut features = Vec::with_capacity(self.n_samples);
        let mut targets = Vec::with_capacity(self.n_samples);
        for _ in 0..self.n_samples {
            let x: Vec<f32> = (0..self.n_features).map(|_| gaussian(&mut rng)).collect();
            let clean: f32 = x
                .iter()
                .zip(self.true_weights.iter())
                .map(|(a, b)| a * b)
                .sum::<f32>()
                + self.true_bias;
            targets.push(clean + self.noise * gaussian(&mut rng));
            features.push(x);
        }

        let split = (self.train_fraction * self.n_samples as f32) as usize;
        let test_features = features.split_off(split);
        let test_targets = targets.split_off(split);

        Ok(Partition {
            train: RegressionData::new(features, targets),
            test: RegressionData::new(test_features, test_targets),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_sizes() {
        let provider = SyntheticRegression::new(100, 4);
        let partition = provider.load_partition(0, 2).unwrap();
        assert_eq!(partition.train.len(), 80);
        assert_eq!(partition.test.len(), 20);
        assert_eq!(partition.train.features[0].len(), 4);
    }

    #[test]
    fn test_partitions_deterministic_and_distinct() {
        let provider = SyntheticRegression::new(20, 3);
        let a = provider.load_partition(1, 3).unwrap();
        let b = provider.load_partition(1, 3).unwrap();
        let c = provider.load_partition(2, 3).unwrap();
        assert_eq!(a.train, b.train);
        assert_ne!(a.train, c.train);
    }

    #[test]
    fn test_shared_ground_truth() {
        let a = SyntheticRegression::new(10, 5);
        let b = SyntheticRegression::new(50, 5);
        assert_eq!(a.true_weights(), b.true_weights());
        assert_eq!(a.true_bias(), 2.0);
    }

    #[test]
    fn test_noise_free_targets_follow_truth() {
        let provider = SyntheticRegression::new(10, 2).with_noise(0.0);
        let partition = provider.load_partition(0, 1).unwrap();
        let w = provider.true_weights();
        for (x, y) in partition.train.features.iter().zip(partition.train.targets.iter()) {
            let expected = x[0] * w[0] + x[1] * w[1] + 2.0;
            assert!((expected - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_out_of_range_partition() {
        let provider = SyntheticRegression::default();
        assert!(provider.load_partition(5, 5).is_err());
    }
}
