//! Round outcome types.

use crate::client::Method;
use crate::core::{ClientId, Error, Metrics};
use crate::params::ParameterSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    /// Fit quorum met and a new global model produced
    Completed,
    /// Too few clients reachable to start
    InsufficientClients,
    /// Too few successful fit contributions; the global model carries forward
    AllClientsFailed,
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundStatus::Completed => write!(f, "completed"),
            RoundStatus::InsufficientClients => write!(f, "insufficient_clients"),
            RoundStatus::AllClientsFailed => write!(f, "all_clients_failed"),
        }
    }
}

/// Why a client's call was excluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// No reply within the call timeout
    Timeout,
    /// Transport failure or unknown client
    Unreachable,
    /// Reply could not be used (undecodable, empty, non-finite, wrong kind)
    Malformed,
    /// Well-formed reply reporting zero examples
    EmptyContribution,
    /// The client reported an error of its own
    ClientError,
}

impl FailureKind {
    /// Classify a per-client call error.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::ClientTimeout { .. } => FailureKind::Timeout,
            Error::ClientUnreachable(_) | Error::ClientNotFound(_) => FailureKind::Unreachable,
            Error::MalformedResponse(_)
            | Error::SerializationError(_)
            | Error::DeserializationError(_)
            | Error::DecompressionFailed(_) => FailureKind::Malformed,
            Error::EmptyContribution(_) => FailureKind::EmptyContribution,
            _ => FailureKind::ClientError,
        }
    }
}

/// One excluded client call.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientFailure {
    pub client_id: ClientId,
    pub phase: Method,
    pub kind: FailureKind,
    pub reason: String,
}

/// Everything a round produced.
#[derive(Clone, Debug)]
pub struct RoundResult {
    /// Round number
    pub round_number: u64,
    /// Final status; evaluation never changes it
    pub status: RoundStatus,
    /// New global model, present only when `status` is `Completed`
    pub aggregated_parameters: Option<ParameterSet>,
    /// Sample-weighted fit metrics
    pub fit_metrics: Metrics,
    /// Sample-weighted evaluation loss, when the evaluate quorum was met
    pub eval_loss: Option<f64>,
    /// Sample-weighted evaluation metrics
    pub eval_metrics: Metrics,
    /// Clients sampled for fit
    pub fit_cohort: Vec<ClientId>,
    /// Clients sampled for evaluate
    pub evaluate_cohort: Vec<ClientId>,
    /// Clients whose fit contribution was aggregated
    pub participating_clients: Vec<ClientId>,
    /// Clients whose evaluation was aggregated
    pub evaluated_clients: Vec<ClientId>,
    /// Clients with at least one excluded call
    pub failed_clients: Vec<ClientId>,
    /// Every excluded call with its cause
    pub failures: Vec<ClientFailure>,
    /// Wall-clock time of the round
    pub duration: Duration,
}

impl RoundResult {
    /// An empty result for `round_number` with the given status.
    pub fn new(round_number: u64, status: RoundStatus) -> Self {
        Self {
            round_number,
            status,
            aggregated_parameters: None,
            fit_metrics: Metrics::new(),
            eval_loss: None,
            eval_metrics: Metrics::new(),
            fit_cohort: Vec::new(),
            evaluate_cohort: Vec::new(),
            participating_clients: Vec::new(),
            evaluated_clients: Vec::new(),
            failed_clients: Vec::new(),
            failures: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RoundStatus::Completed
    }

    /// Failures recorded in one phase.
    pub fn failures_in(&self, phase: Method) -> impl Iterator<Item = &ClientFailure> {
        self.failures.iter().filter(move |f| f.phase == phase)
    }

    pub(crate) fn record_failure(
        &mut self,
        client_id: ClientId,
        phase: Method,
        kind: FailureKind,
        reason: String,
    ) {
        if !self.failed_clients.contains(&client_id) {
            self.failed_clients.push(client_id.clone());
        }
        self.failures.push(ClientFailure {
            client_id,
            phase,
            kind,
            reason,
        });
    }
}
