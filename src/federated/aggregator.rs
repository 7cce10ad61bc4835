//! Weighted aggregation of client updates.
//!
//! Implements FedAvg: every tensor element becomes the sample-weighted mean of
//! the clients' values, and every metric the sample-weighted mean over the
//! clients that reported it.

use crate::core::{Error, Metrics, Result};
use crate::federated::contribution::{ClientContribution, EvaluationContribution};
use crate::params::{ParameterSet, Tensor};
use std::collections::HashMap;

/// Combines client contributions into a new global model.
///
/// Implementations must be pure: the same contributions, in any order,
/// produce the same output within floating-point tolerance.
pub trait AggregationStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &str;

    /// Merge fit contributions into one parameter set.
    fn aggregate_fit(&self, contributions: &[ClientContribution]) -> Result<ParameterSet>;

    /// Merge fit metrics.
    fn aggregate_fit_metrics(&self, contributions: &[ClientContribution]) -> Metrics {
        weighted_metrics(
            contributions
                .iter()
                .map(|c| (c.num_examples, &c.metrics)),
        )
    }

    /// Merge evaluation losses and metrics. Returns `None` without eligible input.
    fn aggregate_evaluate(
        &self,
        contributions: &[EvaluationContribution],
    ) -> Option<(f64, Metrics)> {
        let loss = weighted_loss(contributions.iter().map(|c| (c.num_examples, c.loss)))?;
        let metrics = weighted_metrics(
            contributions
                .iter()
                .map(|c| (c.num_examples, &c.metrics)),
        );
        Some((loss, metrics))
    }
}

/// Federated averaging strategy.
#[derive(Clone, Copy, Debug, Default)]
pub struct FedAvg;

impl AggregationStrategy for FedAvg {
    fn name(&self) -> &str {
        "fedavg"
    }

    fn aggregate_fit(&self, contributions: &[ClientContribution]) -> Result<ParameterSet> {
        weighted_average(contributions)
    }
}

/// Sample-weighted mean of parameter sets.
///
/// Zero-sample contributions are skipped. All remaining sets must share one
/// shape; a mismatch is a configuration error, not a client fault.
pub fn weighted_average(contributions: &[ClientContribution]) -> Result<ParameterSet> {
    let eligible: Vec<&ClientContribution> =
        contributions.iter().filter(|c| c.is_eligible()).collect();

    let first = match eligible.first() {
        Some(c) => *c,
        None => return Err(Error::EmptyAggregation),
    };

    for c in &eligible[1..] {
        c.parameters.check_shape(&first.parameters).map_err(|e| {
            Error::ShapeMismatch(format!("contribution from {}: {}", c.client_id, e))
        })?;
    }

    let total_weight: f64 = eligible.iter().map(|c| c.num_examples as f64).sum();

    let mut tensors = Vec::with_capacity(first.parameters.len());
    for (i, template) in first.parameters.tensors().iter().enumerate() {
        let mut acc = vec![0.0f64; template.len()];
        for c in &eligible {
            let weight = c.num_examples as f64;
            for (slot, v) in acc.iter_mut().zip(c.parameters.tensors()[i].data()) {
                *slot += weight * (*v as f64);
            }
        }
        let data: Vec<f32> = acc.into_iter().map(|v| (v / total_weight) as f32).collect();
        tensors.push(Tensor::new(template.shape().to_vec(), data)?);
    }

    Ok(ParameterSet::new(tensors))
}

/// Sample-weighted mean of a scalar. Zero weights and non-finite values are skipped.
pub fn weighted_loss(items: impl Iterator<Item = (u64, f64)>) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut total = 0.0;
    for (n, loss) in items {
        if n == 0 || !loss.is_finite() {
            continue;
        }
        weighted_sum += n as f64 * loss;
        total += n as f64;
    }
    if total > 0.0 {
        Some(weighted_sum / total)
    } else {
        None
    }
}

/// Per-key sample-weighted mean, renormalized over the reporters of each key.
pub fn weighted_metrics<'a>(items: impl Iterator<Item = (u64, &'a Metrics)>) -> Metrics {
    let mut sums: HashMap<String, (f64, f64)> = HashMap::new();
    for (n, metrics) in items {
        if n == 0 {
            continue;
        }
        for (key, value) in metrics {
            if !value.is_finite() {
                continue;
            }
            let entry = sums.entry(key.clone()).or_insert((0.0, 0.0));
            entry.0 += n as f64 * value;
            entry.1 += n as f64;
        }
    }
    sums.into_iter()
        .map(|(key, (sum, weight))| (key, sum / weight))
        .collect()
}
