//! Partition providers.
//!
//! A provider is built once by whoever starts client workers and handed to
//! each of them by reference; nothing here is process-global.

use crate::core::{Error, Result};
use rand::Rng;

/// One client's private train/test split.
#[derive(Clone, Debug)]
pub struct Partition<D> {
    pub train: D,
    pub test: D,
}

/// Source of deterministic per-client partitions.
pub trait DatasetProvider: Send + Sync {
    /// Data split type produced.
    type Data: Send;

    /// Load partition `partition_id` of `num_partitions`.
    ///
    /// The same arguments always yield the same partition.
    fn load_partition(
        &self,
        partition_id: usize,
        num_partitions: usize,
    ) -> Result<Partition<Self::Data>>;
}

/// Validate partition arguments.
pub(crate) fn check_partition(partition_id: usize, num_partitions: usize) -> Result<()> {
    if num_partitions == 0 {
        return Err(Error::Dataset("num_partitions must be positive".to_string()));
    }
    if partition_id >= num_partitions {
        return Err(Error::Dataset(format!(
            "partition {} out of range for {} partitions",
            partition_id, num_partitions
        )));
    }
    Ok(())
}

/// Standard normal sample (Box-Muller).
pub(crate) fn gaussian(rng: &mut impl Rng) -> f32 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_check_partition() {
        assert!(check_partition(0, 1).is_ok());
        assert!(check_partition(1, 1).is_err());
        assert!(check_partition(0, 0).is_err());
    }

    #[test]
    fn test_gaussian_moments() {
        let mut rng = StdRng::seed_from_u64(9);
        let samples: Vec<f32> = (0..20_000).map(|_| gaussian(&mut rng)).collect();
        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / samples.len() as f32;
        assert!(mean.abs() < 0.05);
        assert!((var - 1.0).abs() < 0.05);
    }
}
