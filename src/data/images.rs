//! Image classification partitions.

use crate::core::{Error, Result};
use crate::data::provider::{check_partition, gaussian, DatasetProvider, Partition};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Labelled images stored as flat `channels * height * width` buffers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageData {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub images: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
}

impl ImageData {
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
        images: Vec<Vec<f32>>,
        labels: Vec<usize>,
    ) -> Self {
        Self {
            channels,
            height,
            width,
            images,
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Class-conditional synthetic images: each class has a fixed random
    /// prototype and samples add Gaussian noise to it.
    pub fn synthetic(
        num_samples: usize,
        (channels, height, width): (usize, usize, usize),
        num_classes: usize,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let pixels = channels * height * width;
        let prototypes: Vec<Vec<f32>> = (0..num_classes)
            .map(|_| (0..pixels).map(|_| rng.gen::<f32>()).collect())
            .collect();

        let mut images = Vec::with_capacity(num_samples);
        let mut labels = Vec::with_capacity(num_samples);
        for i in 0..num_samples {
            let label = i % num_classes.max(1);
            let image = prototypes[label]
                .iter()
                .map(|p| p + 0.1 * gaussian(&mut rng))
                .collect();
            images.push(image);
            labels.push(label);
        }
        Self::new(channels, height, width, images, labels)
    }

    fn select(&self, indices: &[usize]) -> Self {
        Self {
            channels: self.channels,
            height: self.height,
            width: self.width,
            images: indices.iter().map(|&i| self.images[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// IID partitioner over one shared image dataset.
///
/// The dataset is shuffled once at construction; partition `k` of `n` is the
/// `k`-th near-equal shard of that order, then split into train/test with a
/// fixed seed.
#[derive(Clone, Debug)]
pub struct ImagePartitioner {
    dataset: Arc<ImageData>,
    order: Vec<usize>,
    /// Fraction of each shard held out for evaluation
    pub test_fraction: f32,
    split_seed: u64,
}

impl ImagePartitioner {
    /// Create a partitioner with a shuffle seed.
    pub fn new(dataset: Arc<ImageData>, seed: u64) -> Self {
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        Self {
            dataset,
            order,
            test_fraction: 0.2,
            split_seed: 42,
        }
    }

    /// Set the held-out fraction.
    pub fn with_test_fraction(mut self, fraction: f32) -> Self {
        self.test_fraction = fraction;
        self
    }

    pub fn dataset(&self) -> &ImageData {
        &self.dataset
    }

    /// Indices of shard `partition_id`; the first `len % n` shards get one extra.
    fn shard(&self, partition_id: usize, num_partitions: usize) -> &[usize] {
        let len = self.order.len();
        let base = len / num_partitions;
        let extra = len % num_partitions;
        let start = partition_id * base + partition_id.min(extra);
        let size = base + usize::from(partition_id < extra);
        &self.order[start..start + size]
    }
}

impl DatasetProvider for ImagePartitioner {
    type Data = ImageData;

    fn load_partition(
        &self,
        partition_id: usize,
        num_partitions: usize,
    ) -> Result<Partition<ImageData>> {
        check_partition(partition_id, num_partitions)?;
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(Error::Dataset(format!(
                "test_fraction {} outside [0, 1)",
                self.test_fraction
            )));
        }

        let mut shard = self.shard(partition_id, num_partitions).to_vec();
        shard.shuffle(&mut StdRng::seed_from_u64(self.split_seed));
        let n_test = (self.test_fraction * shard.len() as f32).ceil() as usize;
        let (test, train) = shard.split_at(n_test.min(shard.len()));

        Ok(Partition {
            train: self.dataset.select(train),
            test: self.dataset.select(test),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> Arc<ImageData> {
        Arc::new(ImageData::synthetic(n, (1, 4, 4), 3, 7))
    }

    #[test]
    fn test_synthetic_shapes() {
        let data = ImageData::synthetic(9, (2, 4, 4), 3, 1);
        assert_eq!(data.len(), 9);
        assert_eq!(data.images[0].len(), 32);
        assert_eq!(data.labels[..3], [0, 1, 2]);
    }

    #[test]
    fn test_shards_cover_dataset_once() {
        let partitioner = ImagePartitioner::new(dataset(23), 0);
        let mut seen = Vec::new();
        for k in 0..4 {
            seen.extend_from_slice(partitioner.shard(k, 4));
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..23).collect::<Vec<_>>());
        assert_eq!(partitioner.shard(0, 4).len(), 6);
        assert_eq!(partitioner.shard(3, 4).len(), 5);
    }

    #[test]
    fn test_train_test_split() {
        let partitioner = ImagePartitioner::new(dataset(100), 0);
        let partition = partitioner.load_partition(1, 2).unwrap();
        assert_eq!(partition.train.len(), 40);
        assert_eq!(partition.test.len(), 10);
        assert_eq!(partition.train.channels, 1);
    }

    #[test]
    fn test_partition_deterministic() {
        let partitioner = ImagePartitioner::new(dataset(30), 3);
        let a = partitioner.load_partition(0, 3).unwrap();
        let b = partitioner.load_partition(0, 3).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.test, b.test);
    }

    #[test]
    fn test_invalid_partition() {
        let partitioner = ImagePartitioner::new(dataset(10), 0);
        assert!(partitioner.load_partition(2, 2).is_err());
    }
}
