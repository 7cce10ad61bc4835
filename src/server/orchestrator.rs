//! Round orchestration.
//!
//! One round: sample a fit cohort, dispatch concurrently with a per-call
//! timeout, gate on the fit quorum, aggregate, then optionally run an
//! evaluation phase on the result.

use crate::client::{ClientRequest, ClientResponse, Method};
use crate::core::{ClientId, Error, Result};
use crate::federated::{
    AggregationStrategy, ClientContribution, EvaluateRes, EvaluationContribution, FedAvg, FitRes,
};
use crate::params::ParameterSet;
use crate::server::config::RoundConfig;
use crate::server::round::{FailureKind, RoundResult, RoundStatus};
use crate::server::sampler::ClientSampler;
use crate::transport::Transport;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Drives single rounds against a transport.
pub struct RoundOrchestrator {
    transport: Arc<dyn Transport>,
    strategy: Arc<dyn AggregationStrategy>,
}

impl RoundOrchestrator {
    /// Create an orchestrator using FedAvg.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            strategy: Arc::new(FedAvg),
        }
    }

    /// Use a different aggregation strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn AggregationStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run one round.
    ///
    /// Per-client failures are recorded in the result. Only structural
    /// errors, such as a contribution whose shape disagrees with `global`,
    /// are returned as `Err`.
    pub async fn run_round(
        &self,
        global: &ParameterSet,
        config: &RoundConfig,
        available: &BTreeSet<ClientId>,
    ) -> Result<RoundResult> {
        let started = Instant::now();
        let round = config.round_number;

        if available.len() < config.min_available_clients {
            let err = Error::InsufficientClients {
                available: available.len(),
                required: config.min_available_clients,
            };
            warn!(round, "{}", err);
            let mut result = RoundResult::new(round, RoundStatus::InsufficientClients);
            result.duration = started.elapsed();
            return Ok(result);
        }

        let mut sampler = ClientSampler::new(config.sampling_seed);
        let mut result = RoundResult::new(round, RoundStatus::AllClientsFailed);

        // Fit
        result.fit_cohort = sampler.sample(available, config.fraction_fit, config.min_fit_clients);
        info!(
            round,
            available = available.len(),
            selected = result.fit_cohort.len(),
            "fit phase started"
        );
        let request = ClientRequest::fit(global.clone(), config.hyperparameters.clone());
        let outcomes = self
            .dispatch(&result.fit_cohort, request, config.call_timeout)
            .await;

        let mut contributions = Vec::with_capacity(outcomes.len());
        for (client_id, outcome) in outcomes {
            match accept_fit(global, outcome) {
                Ok(res) => contributions.push(ClientContribution::from_fit(client_id, res)),
                Err(e) if e.is_fatal() => {
                    error!(round, client = %client_id, error = %e, "fatal fit contribution");
                    return Err(e);
                }
                Err(e) => {
                    let kind = FailureKind::from_error(&e);
                    warn!(round, client = %client_id, ?kind, error = %e, "fit excluded");
                    result.record_failure(client_id, Method::Fit, kind, e.to_string());
                }
            }
        }

        if contributions.len() < config.min_fit_clients {
            let err = Error::AggregationQuorumFailure {
                phase: Method::Fit.to_string(),
                succeeded: contributions.len(),
                required: config.min_fit_clients,
            };
            warn!(round, "{}", err);
        } else {
            let aggregated = self.strategy.aggregate_fit(&contributions)?;
            result.fit_metrics = self.strategy.aggregate_fit_metrics(&contributions);
            result.participating_clients = contributions.iter().map(|c| c.client_id.clone()).collect();
            result.participating_clients.sort();
            result.aggregated_parameters = Some(aggregated);
            result.status = RoundStatus::Completed;
        }

        // Evaluate
        if config.evaluation_enabled() {
            let target = result
                .aggregated_parameters
                .clone()
                .unwrap_or_else(|| global.clone());
            self.evaluate_phase(&target, config, available, &mut sampler, &mut result)
                .await;
        }

        result.duration = started.elapsed();
        info!(
            round,
            status = %result.status,
            succeeded = result.participating_clients.len(),
            failed = result.failed_clients.len(),
            eval_loss = ?result.eval_loss,
            "round finished"
        );
        Ok(result)
    }

    async fn evaluate_phase(
        &self,
        parameters: &ParameterSet,
        config: &RoundConfig,
        available: &BTreeSet<ClientId>,
        sampler: &mut ClientSampler,
        result: &mut RoundResult,
    ) {
        let round = config.round_number;
        result.evaluate_cohort = sampler.sample(
            available,
            config.fraction_evaluate,
            config.min_evaluate_clients,
        );
        debug!(round, selected = result.evaluate_cohort.len(), "evaluate phase started");

        let request = ClientRequest::evaluate(parameters.clone(), config.hyperparameters.clone());
        let outcomes = self
            .dispatch(&result.evaluate_cohort, request, config.call_timeout)
            .await;

        let mut contributions = Vec::with_capacity(outcomes.len());
        for (client_id, outcome) in outcomes {
            match accept_evaluate(outcome) {
                Ok(res) => contributions.push(EvaluationContribution::from_evaluate(client_id, res)),
                Err(e) => {
                    let kind = FailureKind::from_error(&e);
                    warn!(round, client = %client_id, ?kind, error = %e, "evaluation excluded");
                    result.record_failure(client_id, Method::Evaluate, kind, e.to_string());
                }
            }
        }

        if contributions.len() < config.min_evaluate_clients {
            let err = Error::AggregationQuorumFailure {
                phase: Method::Evaluate.to_string(),
                succeeded: contributions.len(),
                required: config.min_evaluate_clients,
            };
            warn!(round, "{}", err);
            return;
        }

        if let Some((loss, metrics)) = self.strategy.aggregate_evaluate(&contributions) {
            result.eval_loss = Some(loss);
            result.eval_metrics = metrics;
            result.evaluated_clients = contributions.iter().map(|c| c.client_id.clone()).collect();
            result.evaluated_clients.sort();
        }
    }

    /// Send `request` to every client in `cohort` concurrently and collect
    /// the outcomes in arrival order. Each call is bounded by `timeout`.
    async fn dispatch(
        &self,
        cohort: &[ClientId],
        request: ClientRequest,
        timeout: Duration,
    ) -> Vec<(ClientId, Result<ClientResponse>)> {
        let mut pending = FuturesUnordered::new();
        for client_id in cohort {
            let transport = Arc::clone(&self.transport);
            let request = request.clone();
            let id = client_id.clone();
            let handle = tokio::spawn(async move {
                match tokio::time::timeout(timeout, transport.call(&id, request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::ClientTimeout {
                        client_id: id.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                }
            });
            let id = client_id.clone();
            pending.push(async move {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(Error::ClientUnreachable(format!("{}: {}", id, e))),
                };
                (id, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(cohort.len());
        while let Some(outcome) = pending.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Unwrap a call outcome. Transport errors always stay with the client.
fn reply(outcome: Result<ClientResponse>) -> Result<ClientResponse> {
    match outcome {
        Ok(ClientResponse::Failure(reason)) => Err(Error::ClientFailed(reason)),
        Ok(response) => Ok(response),
        Err(e) if e.is_fatal() => Err(Error::ClientUnreachable(e.to_string())),
        Err(e) => Err(e),
    }
}

/// Vet a fit reply. Only a shape disagreement with `global` is fatal.
fn accept_fit(global: &ParameterSet, outcome: Result<ClientResponse>) -> Result<FitRes> {
    let res = match reply(outcome)? {
        ClientResponse::Fit(res) => res,
        other => {
            return Err(Error::MalformedResponse(format!(
                "expected fit reply, got {:?}",
                other.method()
            )))
        }
    };

    if !res.parameters.is_well_formed() {
        return Err(Error::MalformedResponse(
            "empty, inconsistent or non-finite parameters".to_string(),
        ));
    }
    res.parameters.check_shape(global)?;
    if res.num_examples == 0 {
        return Err(Error::EmptyContribution("zero training examples".to_string()));
    }
    Ok(res)
}

fn accept_evaluate(outcome: Result<ClientResponse>) -> Result<EvaluateRes> {
    let res = match reply(outcome)? {
        ClientResponse::Evaluate(res) => res,
        other => {
            return Err(Error::MalformedResponse(format!(
                "expected evaluate reply, got {:?}",
                other.method()
            )))
        }
    };

    if !res.loss.is_finite() {
        return Err(Error::MalformedResponse(format!("non-finite loss {}", res.loss)));
    }
    if res.num_examples == 0 {
        return Err(Error::EmptyContribution("zero evaluation examples".to_string()));
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Tensor;
    use crate::server::config::FederationConfig;
    use crate::server::testing::{params, transport_with, ScriptedClient};
    use crate::transport::{Fault, FaultPlan};

    fn round_config(min_fit: usize, min_eval: usize, min_available: usize) -> RoundConfig {
        FederationConfig::default()
            .with_min_clients(min_fit, min_eval, min_available)
            .with_fractions(1.0, 1.0)
            .with_timeout(Duration::from_millis(200))
            .with_sampling_seed(3)
            .round_config(1)
    }

    #[tokio::test]
    async fn test_insufficient_clients() {
        let transport = transport_with(vec![ScriptedClient::new("a", params(&[1.0]), 10)]).await;
        let orchestrator = RoundOrchestrator::new(transport.clone());
        let available = transport.list_available().await;

        let result = orchestrator
            .run_round(&params(&[0.0]), &round_config(2, 2, 2), &available)
            .await
            .unwrap();
        assert_eq!(result.status, RoundStatus::InsufficientClients);
        assert!(result.aggregated_parameters.is_none());
        assert!(result.fit_cohort.is_empty());
        assert_eq!(transport.codec().stats().frames, 0);
    }

    #[tokio::test]
    async fn test_all_clients_time_out() {
        let transport = transport_with(vec![
            ScriptedClient::new("a", params(&[1.0]), 10),
            ScriptedClient::new("b", params(&[2.0]), 10),
            ScriptedClient::new("c", params(&[3.0]), 10),
        ])
        .await;
        for id in transport.list_available().await {
            transport.inject(&id, FaultPlan::always(Fault::Hang)).await;
        }
        let orchestrator = RoundOrchestrator::new(transport.clone());
        let available = transport.list_available().await;
        let global = params(&[0.5]);

        let result = orchestrator
            .run_round(&global, &round_config(2, 2, 2), &available)
            .await
            .unwrap();
        assert_eq!(result.status, RoundStatus::AllClientsFailed);
        assert!(result.aggregated_parameters.is_none());
        assert_eq!(result.failed_clients.len(), 3);
        assert!(result
            .failures
            .iter()
            .all(|f| f.kind == FailureKind::Timeout));
        assert_eq!(global, params(&[0.5]));
    }

    #[tokio::test]
    async fn test_identical_clients_aggregate_exactly() {
        let p = params(&[0.1, -3.75, 1e-7, 42.0]);
        let clients = (0..4)
            .map(|i| ScriptedClient::new(&format!("c{}", i), p.clone(), 100))
            .collect();
        let transport = transport_with(clients).await;
        let orchestrator = RoundOrchestrator::new(transport.clone());
        let available = transport.list_available().await;

        let result = orchestrator
            .run_round(&params(&[0.0; 4]), &round_config(2, 2, 2), &available)
            .await
            .unwrap();
        assert_eq!(result.status, RoundStatus::Completed);
        assert_eq!(result.fit_cohort.len(), 4);
        assert_eq!(result.aggregated_parameters, Some(p));
    }

    #[tokio::test]
    async fn test_weighted_round() {
        let transport = transport_with(vec![
            ScriptedClient::new("a", params(&[1.0]), 100)
                .with_loss(1.0)
                .with_metric("accuracy", 0.5),
            ScriptedClient::new("b", params(&[3.0]), 300)
                .with_loss(2.0)
                .with_metric("accuracy", 0.9),
        ])
        .await;
        let orchestrator = RoundOrchestrator::new(transport.clone());
        let available = transport.list_available().await;

        let result = orchestrator
            .run_round(&params(&[0.0]), &round_config(2, 2, 2), &available)
            .await
            .unwrap();
        let aggregated = result.aggregated_parameters.unwrap();
        assert!((aggregated.tensors()[0].data()[0] - 2.5).abs() < 1e-6);
        assert!((result.eval_loss.unwrap() - 1.75).abs() < 1e-9);
        assert!((result.eval_metrics["accuracy"] - 0.8).abs() < 1e-9);
        assert!((result.fit_metrics["accuracy"] - 0.8).abs() < 1e-9);
        assert_eq!(result.evaluated_clients.len(), 2);
    }

    #[tokio::test]
    async fn test_bad_replies_are_tolerated() {
        let transport = transport_with(vec![
            ScriptedClient::new("good", params(&[4.0]), 10),
            ScriptedClient::new("nan", params(&[1.0]), 10),
            ScriptedClient::new("empty", params(&[1.0]), 10),
            ScriptedClient::new("corrupt", params(&[1.0]), 10),
            ScriptedClient::new("gone", params(&[1.0]), 10),
            ScriptedClient::new("zero", params(&[1.0]), 0),
        ])
        .await;
        let faults = [
            ("nan", Fault::NonFinite),
            ("empty", Fault::EmptyParameters),
            ("corrupt", Fault::CorruptParameters),
            ("gone", Fault::Disconnect),
        ];
        for (id, fault) in faults {
            transport
                .inject(&ClientId::new(id), FaultPlan::always(fault).on(Method::Fit))
                .await;
        }
        let orchestrator = RoundOrchestrator::new(transport.clone());
        let available = transport.list_available().await;

        let result = orchestrator
            .run_round(&params(&[0.0]), &round_config(1, 1, 1), &available)
            .await
            .unwrap();
        assert_eq!(result.status, RoundStatus::Completed);
        assert_eq!(result.participating_clients, vec![ClientId::new("good")]);
        assert_eq!(result.aggregated_parameters, Some(params(&[4.0])));

        let kind_of = |id: &str| {
            result
                .failures_in(Method::Fit)
                .find(|f| f.client_id.as_str() == id)
                .map(|f| f.kind)
        };
        assert_eq!(kind_of("nan"), Some(FailureKind::Malformed));
        assert_eq!(kind_of("empty"), Some(FailureKind::Malformed));
        assert_eq!(kind_of("corrupt"), Some(FailureKind::Malformed));
        assert_eq!(kind_of("gone"), Some(FailureKind::Unreachable));
        assert_eq!(kind_of("zero"), Some(FailureKind::EmptyContribution));
    }

    #[tokio::test]
    async fn test_overflowing_shape_is_malformed() {
        let frame = bincode::serialize(&(vec![usize::MAX, 2usize], vec![1.0f32])).unwrap();
        let hostile: Tensor = bincode::deserialize(&frame).unwrap();
        let transport = transport_with(vec![
            ScriptedClient::new("good", params(&[2.0]), 10),
            ScriptedClient::new("hostile", ParameterSet::new(vec![hostile]), 10),
        ])
        .await;
        let orchestrator = RoundOrchestrator::new(transport.clone());
        let available = transport.list_available().await;

        let result = orchestrator
            .run_round(&params(&[0.0]), &round_config(1, 1, 1), &available)
            .await
            .unwrap();
        assert_eq!(result.status, RoundStatus::Completed);
        assert_eq!(result.aggregated_parameters, Some(params(&[2.0])));
        let failure = result.failures_in(Method::Fit).next().unwrap();
        assert_eq!(failure.client_id, ClientId::new("hostile"));
        assert_eq!(failure.kind, FailureKind::Malformed);
    }

    #[tokio::test]
    async fn test_client_joining_mid_round_waits_for_next_round() {
        let transport = transport_with(vec![
            ScriptedClient::new("a", params(&[1.0]), 10),
            ScriptedClient::new("b", params(&[3.0]), 10),
        ])
        .await;
        for id in transport.list_available().await {
            transport
                .inject(
                    &id,
                    FaultPlan::always(Fault::Delay(Duration::from_millis(100))).on(Method::Fit),
                )
                .await;
        }
        let orchestrator = RoundOrchestrator::new(transport.clone());
        let config = round_config(2, 2, 2);
        let late = ClientId::new("late");

        let available = transport.list_available().await;
        let join = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            transport
                .register(Box::new(ScriptedClient::new("late", params(&[9.0]), 10)))
                .await
                .unwrap();
        };
        let initial = params(&[0.0]);
        let (result, ()) = tokio::join!(
            orchestrator.run_round(&initial, &config, &available),
            join
        );
        let result = result.unwrap();
        assert_eq!(result.status, RoundStatus::Completed);
        assert!(!result.fit_cohort.contains(&late));
        assert!(!result.evaluate_cohort.contains(&late));
        assert_eq!(result.aggregated_parameters, Some(params(&[2.0])));

        let available = transport.list_available().await;
        let next = orchestrator
            .run_round(&params(&[0.0]), &config, &available)
            .await
            .unwrap();
        assert!(next.fit_cohort.contains(&late));
        assert!(next.participating_clients.contains(&late));
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_fatal() {
        let transport = transport_with(vec![
            ScriptedClient::new("a", params(&[1.0]), 10),
            ScriptedClient::new("b", params(&[1.0, 2.0]), 10),
        ])
        .await;
        let orchestrator = RoundOrchestrator::new(transport.clone());
        let available = transport.list_available().await;

        let result = orchestrator
            .run_round(&params(&[0.0]), &round_config(1, 1, 1), &available)
            .await;
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }

    #[tokio::test]
    async fn test_evaluate_failure_keeps_fit_status() {
        let transport = transport_with(vec![
            ScriptedClient::new("a", params(&[1.0]), 10),
            ScriptedClient::new("b", params(&[3.0]), 10),
        ])
        .await;
        for id in transport.list_available().await {
            transport
                .inject(&id, FaultPlan::always(Fault::Disconnect).on(Method::Evaluate))
                .await;
        }
        let orchestrator = RoundOrchestrator::new(transport.clone());
        let available = transport.list_available().await;

        let result = orchestrator
            .run_round(&params(&[0.0]), &round_config(2, 2, 2), &available)
            .await
            .unwrap();
        assert_eq!(result.status, RoundStatus::Completed);
        assert!(result.eval_loss.is_none());
        assert_eq!(result.failures_in(Method::Evaluate).count(), 2);
        assert_eq!(result.failures_in(Method::Fit).count(), 0);
    }

    #[tokio::test]
    async fn test_evaluation_disabled() {
        let transport = transport_with(vec![
            ScriptedClient::new("a", params(&[1.0]), 10),
            ScriptedClient::new("b", params(&[3.0]), 10),
        ])
        .await;
        let orchestrator = RoundOrchestrator::new(transport.clone());
        let available = transport.list_available().await;
        let config = FederationConfig::default()
            .with_fractions(1.0, 0.0)
            .round_config(1);

        let result = orchestrator
            .run_round(&params(&[0.0]), &config, &available)
            .await
            .unwrap();
        assert!(result.is_completed());
        assert!(result.evaluate_cohort.is_empty());
        assert!(result.eval_loss.is_none());
    }

    #[tokio::test]
    async fn test_client_leaving_after_reply_still_counts() {
        let transport = transport_with(vec![
            ScriptedClient::new("a", params(&[1.0]), 10),
            ScriptedClient::new("b", params(&[3.0]), 10),
        ])
        .await;
        transport
            .inject(
                &ClientId::new("a"),
                FaultPlan::always(Fault::LeaveAfterReply).on(Method::Fit),
            )
            .await;
        let orchestrator = RoundOrchestrator::new(transport.clone());
        let available = transport.list_available().await;
        let config = FederationConfig::default()
            .with_fractions(1.0, 0.0)
            .round_config(1);

        let result = orchestrator
            .run_round(&params(&[0.0]), &config, &available)
            .await
            .unwrap();
        assert_eq!(result.participating_clients.len(), 2);
        assert_eq!(result.aggregated_parameters, Some(params(&[2.0])));
        assert_eq!(transport.list_available().await.len(), 1);
    }
}
