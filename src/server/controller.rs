//! Multi-round federation driver.
//!
//! The controller is the single writer of the global model. Each round reads
//! an immutable snapshot of it; only a `Completed` round replaces it.

use crate::core::{now, Result, Timestamp};
use crate::params::ParameterSet;
use crate::server::config::FederationConfig;
use crate::server::history::MetricHistory;
use crate::server::orchestrator::RoundOrchestrator;
use crate::server::round::{RoundResult, RoundStatus};
use tracing::{info, warn};
use uuid::Uuid;

/// The controller's authoritative state.
#[derive(Clone, Debug)]
pub struct GlobalModelState {
    /// Current global model
    pub parameters: ParameterSet,
    /// Last round attempted (0 before the first)
    pub round: u64,
    /// Running metric history
    pub history: MetricHistory,
}

impl GlobalModelState {
    pub fn new(parameters: ParameterSet) -> Self {
        Self {
            parameters,
            round: 0,
            history: MetricHistory::new(),
        }
    }

    /// Fold a finished round into the state.
    fn apply(&mut self, result: &RoundResult) -> bool {
        self.round = result.round_number;
        let replaced = match (&result.status, &result.aggregated_parameters) {
            (RoundStatus::Completed, Some(aggregated)) => {
                self.parameters = aggregated.clone();
                true
            }
            _ => false,
        };
        self.history
            .record(result, self.parameters.digest(), now());
        replaced
    }
}

/// Outcome of a whole federation run.
#[derive(Clone, Debug)]
pub struct FederationReport {
    pub run_id: Uuid,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Global model after the last round
    pub final_parameters: ParameterSet,
    pub history: MetricHistory,
    /// Every round's result, in order
    pub results: Vec<RoundResult>,
}

impl FederationReport {
    /// Rounds that produced a new global model.
    pub fn completed_rounds(&self) -> Vec<u64> {
        self.rounds_where(|status| status == RoundStatus::Completed)
    }

    /// Rounds that left the global model unchanged.
    pub fn stalled_rounds(&self) -> Vec<u64> {
        self.rounds_where(|status| status != RoundStatus::Completed)
    }

    /// Whether every attempted round completed.
    pub fn is_fully_trained(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.is_completed())
    }

    fn rounds_where(&self, keep: impl Fn(RoundStatus) -> bool) -> Vec<u64> {
        self.results
            .iter()
            .filter(|r| keep(r.status))
            .map(|r| r.round_number)
            .collect()
    }
}

/// Runs `num_rounds` sequential rounds.
pub struct FederationController {
    config: FederationConfig,
    orchestrator: RoundOrchestrator,
    state: GlobalModelState,
}

impl FederationController {
    /// Create a controller. The configuration is validated here.
    pub fn new(
        config: FederationConfig,
        orchestrator: RoundOrchestrator,
        initial_parameters: ParameterSet,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            orchestrator,
            state: GlobalModelState::new(initial_parameters),
        })
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn state(&self) -> &GlobalModelState {
        &self.state
    }

    /// Run every round and report.
    ///
    /// Always attempts exactly `num_rounds` rounds; a structural error ends
    /// the run early with that error.
    pub async fn run(mut self) -> Result<FederationReport> {
        let run_id = Uuid::new_v4();
        let started_at = now();
        info!(
            run = %run_id,
            rounds = self.config.num_rounds,
            model = %self.config.model.kind(),
            "federation started"
        );

        let mut results = Vec::with_capacity(self.config.num_rounds as usize);
        for round in 1..=self.config.num_rounds {
            let round_config = self.config.round_config(round);
            let available = self.orchestrator.transport().list_available().await;
            let snapshot = self.state.parameters.clone();

            let result = self
                .orchestrator
                .run_round(&snapshot, &round_config, &available)
                .await?;

            if !self.state.apply(&result) {
                warn!(
                    round,
                    status = %result.status,
                    model = %self.state.parameters.digest().short(),
                    "round stalled, keeping previous global model"
                );
            }
            results.push(result);
        }

        let report = FederationReport {
            run_id,
            started_at,
            finished_at: now(),
            final_parameters: self.state.parameters,
            history: self.state.history,
            results,
        };
        info!(
            run = %run_id,
            completed = report.completed_rounds().len(),
            stalled = report.stalled_rounds().len(),
            final_loss = ?report.history.latest_loss(),
            "federation finished"
        );
        Ok(report)
    }
}
