//! Client sampling.

use crate::core::ClientId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;

/// Slack absorbed before rounding up, so `0.07 * 100` yields 7 and not 8.
const CEIL_TOLERANCE: f64 = 1e-9;

/// Number of clients to sample: `ceil(fraction * available)`, raised to
/// `minimum`, capped at `available`.
pub fn sample_size(fraction: f64, available: usize, minimum: usize) -> usize {
    let wanted = (fraction * available as f64 - CEIL_TOLERANCE).ceil().max(0.0) as usize;
    wanted.max(minimum).min(available)
}

/// Uniform sampling without replacement.
pub struct ClientSampler {
    rng: StdRng,
}

impl ClientSampler {
    /// Seeded sampler; fresh entropy when `seed` is `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Draw a cohort from `available`.
    ///
    /// When the cohort covers every available client the result is the full
    /// set in id order and no randomness is consumed.
    pub fn sample(
        &mut self,
        available: &BTreeSet<ClientId>,
        fraction: f64,
        minimum: usize,
    ) -> Vec<ClientId> {
        let count = sample_size(fraction, available.len(), minimum);
        if count >= available.len() {
            return available.iter().cloned().collect();
        }
        let pool: Vec<&ClientId> = available.iter().collect();
        let mut cohort: Vec<ClientId> = pool
            .choose_multiple(&mut self.rng, count)
            .map(|id| (*id).clone())
            .collect();
        cohort.sort();
        cohort
    }
}
