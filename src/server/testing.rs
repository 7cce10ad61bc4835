//! Scripted clients for round and federation tests.

use crate::client::FederatedClient;
use crate::core::{ClientId, Error, Hyperparameters, Metrics, Result};
use crate::federated::{EvaluateRes, FitRes};
use crate::models::ModelKind;
use crate::params::{ParameterSet, Tensor};
use crate::transport::{ClientRegistry, InProcessTransport};
use std::sync::Arc;

/// Replies with fixed parameters, counts and losses.
pub struct ScriptedClient {
    pub id: ClientId,
    pub parameters: ParameterSet,
    pub num_examples: u64,
    pub loss: f64,
    pub metrics: Metrics,
    /// Rounds in which fit and evaluate return an error
    pub fail_rounds: Vec<u64>,
    /// When set, fit returns the received parameters shifted by this amount
    pub echo_offset: Option<f32>,
}

impl ScriptedClient {
    pub fn new(id: &str, parameters: ParameterSet, num_examples: u64) -> Self {
        Self {
            id: ClientId::new(id),
            parameters,
            num_examples,
            loss: 1.0,
            metrics: Metrics::new(),
            fail_rounds: Vec::new(),
            echo_offset: None,
        }
    }

    pub fn failing_in(mut self, rounds: &[u64]) -> Self {
        self.fail_rounds = rounds.to_vec();
        self
    }

    pub fn echoing(mut self, offset: f32) -> Self {
        self.echo_offset = Some(offset);
        self
    }

    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    fn check_round(&self, config: &Hyperparameters) -> Result<()> {
        match config.get_u64("server_round") {
            Some(round) if self.fail_rounds.contains(&round) => {
                Err(Error::Training(format!("scripted failure in round {}", round)))
            }
            _ => Ok(()),
        }
    }
}

impl FederatedClient for ScriptedClient {
    fn client_id(&self) -> &ClientId {
        &self.id
    }

    fn model_kind(&self) -> ModelKind {
        ModelKind::Linear
    }

    fn get_parameters(&self) -> ParameterSet {
        self.parameters.clone()
    }

    fn fit(&mut self, parameters: &ParameterSet, config: &Hyperparameters) -> Result<FitRes> {
        self.check_round(config)?;
        let parameters = match self.echo_offset {
            Some(offset) => shifted(parameters, offset)?,
            None => self.parameters.clone(),
        };
        Ok(FitRes {
            parameters,
            num_examples: self.num_examples,
            metrics: self.metrics.clone(),
        })
    }

    fn evaluate(
        &mut self,
        _parameters: &ParameterSet,
        config: &Hyperparameters,
    ) -> Result<EvaluateRes> {
        self.check_round(config)?;
        Ok(EvaluateRes {
            loss: self.loss,
            num_examples: self.num_examples,
            metrics: self.metrics.clone(),
        })
    }
}

fn shifted(parameters: &ParameterSet, offset: f32) -> Result<ParameterSet> {
    let tensors = parameters
        .tensors()
        .iter()
        .map(|t| Tensor::new(t.shape().to_vec(), t.data().iter().map(|v| v + offset).collect()))
        .collect::<Result<Vec<_>>>()?;
    Ok(ParameterSet::new(tensors))
}

/// A one-tensor parameter set.
pub fn params(values: &[f32]) -> ParameterSet {
    ParameterSet::new(vec![Tensor::from_vec(values.to_vec())])
}

/// A transport serving the given clients.
pub async fn transport_with(clients: Vec<ScriptedClient>) -> Arc<InProcessTransport> {
    let transport = Arc::new(InProcessTransport::new(Arc::new(ClientRegistry::new())));
    for client in clients {
        transport
            .register(Box::new(client))
            .await
            .expect("unique client id");
    }
    transport
}
