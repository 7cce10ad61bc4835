//! Per-round metric history.

use crate::core::{Hash256, Timestamp};
use crate::server::round::{RoundResult, RoundStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Compact record of one round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round_number: u64,
    pub status: RoundStatus,
    /// Clients sampled for fit
    pub selected: usize,
    /// Clients aggregated into the model
    pub participants: usize,
    /// Excluded calls across both phases
    pub failures: usize,
    pub eval_loss: Option<f64>,
    pub duration_ms: u64,
    /// Digest of the global model after the round
    pub model_digest: Hash256,
    pub finished_at: Timestamp,
}

/// Metric series indexed by round.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetricHistory {
    /// Weighted evaluation loss per round
    pub losses_distributed: Vec<(u64, f64)>,
    /// Weighted fit metrics per key
    pub metrics_distributed_fit: BTreeMap<String, Vec<(u64, f64)>>,
    /// Weighted evaluation metrics per key
    pub metrics_distributed: BTreeMap<String, Vec<(u64, f64)>>,
    /// One summary per attempted round
    pub rounds: Vec<RoundSummary>,
}

impl MetricHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a round. `model_digest` identifies the global model the round
    /// left behind, whether new or carried forward.
    pub fn record(&mut self, result: &RoundResult, model_digest: Hash256, finished_at: Timestamp) {
        let round = result.round_number;
        if let Some(loss) = result.eval_loss {
            self.losses_distributed.push((round, loss));
        }
        for (key, value) in sorted(&result.fit_metrics) {
            self.metrics_distributed_fit
                .entry(key)
                .or_default()
                .push((round, value));
        }
        for (key, value) in sorted(&result.eval_metrics) {
            self.metrics_distributed
                .entry(key)
                .or_default()
                .push((round, value));
        }
        self.rounds.push(RoundSummary {
            round_number: round,
            status: result.status,
            selected: result.fit_cohort.len(),
            participants: result.participating_clients.len(),
            failures: result.failures.len(),
            eval_loss: result.eval_loss,
            duration_ms: result.duration.as_millis() as u64,
            model_digest,
            finished_at,
        });
    }

    /// Latest weighted evaluation loss.
    pub fn latest_loss(&self) -> Option<f64> {
        self.losses_distributed.last().map(|(_, loss)| *loss)
    }

    /// Evaluation series for one metric key.
    pub fn eval_metric(&self, key: &str) -> &[(u64, f64)] {
        self.metrics_distributed
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Fit series for one metric key.
    pub fn fit_metric(&self, key: &str) -> &[(u64, f64)] {
        self.metrics_distributed_fit
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

fn sorted(metrics: &crate::core::Metrics) -> Vec<(String, f64)> {
    let mut entries: Vec<(String, f64)> = metrics.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}
