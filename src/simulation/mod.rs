//! Simulation Module
//!
//! Runs a complete federation in one process:
//! - Builds one worker per partition over an explicit dataset provider
//! - Serves them through the in-process transport
//! - Seeds the global model from a fresh server-side model instance

use crate::client::{build_worker, DataSource};
use crate::core::{ClientId, Error, Result};
use crate::data::{ImagePartitioner, SyntheticRegression};
use crate::models::{ModelConfig, TrainConfig};
use crate::server::{FederationConfig, FederationController, FederationReport, RoundOrchestrator};
use crate::transport::{ClientRegistry, InProcessTransport};
use std::sync::Arc;
use tracing::info;

/// Data backing a simulation.
#[derive(Clone, Debug)]
pub enum SimulationData {
    Regression(SyntheticRegression),
    Images(ImagePartitioner),
}

impl SimulationData {
    fn source(&self) -> DataSource<'_> {
        match self {
            SimulationData::Regression(provider) => DataSource::Regression(provider),
            SimulationData::Images(provider) => DataSource::Images(provider),
        }
    }
}

/// A local federation of `num_clients` workers.
pub struct Simulation {
    config: FederationConfig,
    num_clients: usize,
    data: SimulationData,
    /// Seed of the server-side model that provides initial parameters
    init_seed: u64,
    /// Base seed for client-side shuffling; fresh entropy when absent
    client_seed: Option<u64>,
}

impl Simulation {
    pub fn new(config: FederationConfig, num_clients: usize, data: SimulationData) -> Self {
        Self {
            config,
            num_clients,
            data,
            init_seed: 0,
            client_seed: None,
        }
    }

    /// Synthetic regression matching the configured model's feature count.
    pub fn regression(
        config: FederationConfig,
        num_clients: usize,
        samples_per_client: usize,
    ) -> Result<Self> {
        let n_features = match &config.model {
            ModelConfig::Linear { n_features } => *n_features,
            other => {
                return Err(Error::UnsupportedCapability(format!(
                    "regression data needs a linear model, got {}",
                    other.kind()
                )))
            }
        };
        let provider = SyntheticRegression::new(samples_per_client, n_features);
        Ok(Self::new(config, num_clients, SimulationData::Regression(provider)))
    }

    pub fn with_init_seed(mut self, seed: u64) -> Self {
        self.init_seed = seed;
        self
    }

    pub fn with_client_seed(mut self, seed: u64) -> Self {
        self.client_seed = Some(seed);
        self
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Build the transport with every worker registered as `client-{i}`.
    pub async fn build_transport(&self) -> Result<Arc<InProcessTransport>> {
        if self.num_clients == 0 {
            return Err(Error::InvalidConfig("num_clients must be positive".to_string()));
        }
        let transport = Arc::new(InProcessTransport::new(Arc::new(ClientRegistry::new())));
        for partition_id in 0..self.num_clients {
            let defaults = TrainConfig {
                local_epochs: self.config.local_epochs(),
                learning_rate: self.config.learning_rate as f32,
                batch_size: self.config.batch_size,
                seed: self.client_seed.map(|s| s.wrapping_add(partition_id as u64)),
                ..TrainConfig::default()
            };
            let worker = build_worker(
                ClientId::new(&format!("client-{}", partition_id)),
                &self.config.model,
                self.data.source(),
                partition_id,
                self.num_clients,
                defaults,
            )?;
            transport.register(worker).await?;
        }
        Ok(transport)
    }

    /// Run the federation on a fresh transport.
    pub async fn run(&self) -> Result<FederationReport> {
        let transport = self.build_transport().await?;
        self.run_on(transport).await
    }

    /// Run the federation on a prepared transport, e.g. one with faults injected.
    pub async fn run_on(&self, transport: Arc<InProcessTransport>) -> Result<FederationReport> {
        self.config.validate()?;
        let initial = self.config.model.initial_parameters(self.init_seed)?;
        info!(
            clients = self.num_clients,
            model = %self.config.model.kind(),
            parameters = initial.num_elements(),
            "simulation starting"
        );
        let controller = FederationController::new(
            self.config.clone(),
            RoundOrchestrator::new(transport),
            initial,
        )?;
        controller.run().await
    }
}
