//! Client results as seen by the coordinator.

use crate::core::{ClientId, Metrics};
use crate::params::ParameterSet;
use serde::{Deserialize, Serialize};

/// Payload returned by a client's fit call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitRes {
    /// Locally updated parameters
    pub parameters: ParameterSet,
    /// Number of local training examples
    pub num_examples: u64,
    /// Training metrics (e.g. `train_loss`)
    pub metrics: Metrics,
}

/// Payload returned by a client's evaluate call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluateRes {
    /// Mean loss on the held-out partition
    pub loss: f64,
    /// Number of evaluation examples
    pub num_examples: u64,
    /// Evaluation metrics (e.g. `accuracy`, `r2_score`)
    pub metrics: Metrics,
}

/// A successful fit result attributed to its client.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientContribution {
    pub client_id: ClientId,
    pub parameters: ParameterSet,
    /// Aggregation weight
    pub num_examples: u64,
    pub metrics: Metrics,
}

impl ClientContribution {
    /// Attribute a fit result to a client.
    pub fn from_fit(client_id: ClientId, res: FitRes) -> Self {
        Self {
            client_id,
            parameters: res.parameters,
            num_examples: res.num_examples,
            metrics: res.metrics,
        }
    }

    /// Zero-sample contributions are discarded rather than weighted zero.
    pub fn is_eligible(&self) -> bool {
        self.num_examples > 0
    }
}

/// A successful evaluate result attributed to its client.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationContribution {
    pub client_id: ClientId,
    pub loss: f64,
    pub num_examples: u64,
    pub metrics: Metrics,
}

impl EvaluationContribution {
    /// Attribute an evaluate result to a client.
    pub fn from_evaluate(client_id: ClientId, res: EvaluateRes) -> Self {
        Self {
            client_id,
            loss: res.loss,
            num_examples: res.num_examples,
            metrics: res.metrics,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.num_examples > 0 && self.loss.is_finite()
    }
}
