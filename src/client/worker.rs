//! Client workers: one local model plus one private partition.

use crate::client::messages::{ClientRequest, ClientResponse};
use crate::core::{ClientId, Error, Hyperparameters, Result};
use crate::data::{DatasetProvider, ImageData, Partition, RegressionData};
use crate::federated::{EvaluateRes, FitRes};
use crate::models::{ConvNet, LinearRegression, LocalTrainer, ModelConfig, ModelKind, TrainConfig};
use crate::params::ParameterSet;
use tracing::debug;

/// What the transport sees of a client.
///
/// Object safe so that workers of different model families can sit behind
/// one registry.
pub trait FederatedClient: Send {
    fn client_id(&self) -> &ClientId;

    fn model_kind(&self) -> ModelKind;

    /// Current local parameters.
    fn get_parameters(&self) -> ParameterSet;

    /// Load `parameters`, train locally, return the update.
    fn fit(&mut self, parameters: &ParameterSet, config: &Hyperparameters) -> Result<FitRes>;

    /// Load `parameters` and evaluate them on the held-out split.
    fn evaluate(
        &mut self,
        parameters: &ParameterSet,
        config: &Hyperparameters,
    ) -> Result<EvaluateRes>;

    /// Serve one request. Errors become `ClientResponse::Failure`.
    fn handle(&mut self, request: &ClientRequest) -> ClientResponse {
        let outcome = match request {
            ClientRequest::Fit { parameters, config } => {
                self.fit(parameters, config).map(ClientResponse::Fit)
            }
            ClientRequest::Evaluate { parameters, config } => {
                self.evaluate(parameters, config).map(ClientResponse::Evaluate)
            }
        };
        outcome.unwrap_or_else(|e| ClientResponse::Failure(e.to_string()))
    }
}

/// A `LocalTrainer` bound to its client's partition.
pub struct ClientWorker<T: LocalTrainer> {
    client_id: ClientId,
    trainer: T,
    partition: Partition<T::Data>,
    defaults: TrainConfig,
}

impl<T: LocalTrainer> ClientWorker<T> {
    /// Create a worker.
    pub fn new(client_id: ClientId, trainer: T, partition: Partition<T::Data>) -> Self {
        Self {
            client_id,
            trainer,
            partition,
            defaults: TrainConfig::default(),
        }
    }

    /// Set training defaults used where a request omits a key.
    pub fn with_defaults(mut self, defaults: TrainConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn partition(&self) -> &Partition<T::Data> {
        &self.partition
    }
}

impl<T: LocalTrainer> FederatedClient for ClientWorker<T> {
    fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    fn model_kind(&self) -> ModelKind {
        self.trainer.kind()
    }

    fn get_parameters(&self) -> ParameterSet {
        self.trainer.get_parameters()
    }

    fn fit(&mut self, parameters: &ParameterSet, config: &Hyperparameters) -> Result<FitRes> {
        let train_config = self.defaults.resolve(config)?;
        self.trainer.set_parameters(parameters)?;
        let result = self.trainer.fit(&self.partition.train, &train_config)?;
        debug!(
            client = %self.client_id,
            loss = result.loss,
            examples = result.num_examples,
            "local fit done"
        );
        Ok(FitRes {
            parameters: self.trainer.get_parameters(),
            num_examples: result.num_examples,
            metrics: result.metrics,
        })
    }

    fn evaluate(
        &mut self,
        parameters: &ParameterSet,
        _config: &Hyperparameters,
    ) -> Result<EvaluateRes> {
        self.trainer.set_parameters(parameters)?;
        let result = self.trainer.evaluate(&self.partition.test)?;
        Ok(EvaluateRes {
            loss: result.loss,
            num_examples: result.num_examples,
            metrics: result.metrics,
        })
    }
}

/// Where a worker's partition comes from.
#[derive(Clone, Copy)]
pub enum DataSource<'a> {
    Regression(&'a dyn DatasetProvider<Data = RegressionData>),
    Images(&'a dyn DatasetProvider<Data = ImageData>),
}

impl DataSource<'_> {
    fn kind(&self) -> &'static str {
        match self {
            DataSource::Regression(_) => "regression",
            DataSource::Images(_) => "images",
        }
    }
}

/// Build a worker for `model`, loading partition `partition_id` of
/// `num_partitions` from `source`.
pub fn build_worker(
    client_id: ClientId,
    model: &ModelConfig,
    source: DataSource<'_>,
    partition_id: usize,
    num_partitions: usize,
    defaults: TrainConfig,
) -> Result<Box<dyn FederatedClient>> {
    model.validate()?;
    match (model, source) {
        (ModelConfig::Linear { n_features }, DataSource::Regression(provider)) => {
            let partition = provider.load_partition(partition_id, num_partitions)?;
            let trainer = LinearRegression::new(*n_features);
            Ok(Box::new(
                ClientWorker::new(client_id, trainer, partition).with_defaults(defaults),
            ))
        }
        (ModelConfig::Cnn(config), DataSource::Images(provider)) => {
            let partition = provider.load_partition(partition_id, num_partitions)?;
            let trainer = ConvNet::with_seed(config.clone(), partition_id as u64)?;
            Ok(Box::new(
                ClientWorker::new(client_id, trainer, partition).with_defaults(defaults),
            ))
        }
        (model, source) => Err(Error::UnsupportedCapability(format!(
            "{} model cannot train on {} data",
            model.kind(),
            source.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SyntheticRegression;
    use crate::params::Tensor;

    fn linear_worker() -> Box<dyn FederatedClient> {
        let provider = SyntheticRegression::new(50, 3);
        build_worker(
            ClientId::new("client-0"),
            &ModelConfig::Linear { n_features: 3 },
            DataSource::Regression(&provider),
            0,
            2,
            TrainConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_fit_returns_update_and_count() {
        let mut worker = linear_worker();
        let global = worker.get_parameters();
        let config = Hyperparameters::new()
            .with("local_epochs", 5usize)
            .with("learning_rate", 0.05);

        let res = worker.fit(&global, &config).unwrap();
        assert_eq!(res.num_examples, 40);
        assert!(res.metrics.contains_key("train_loss"));
        assert_ne!(res.parameters, global);
        // the caller's snapshot is untouched
        assert!(global.tensors().iter().all(|t| t.data().iter().all(|v| *v == 0.0)));
    }

    #[test]
    fn test_evaluate_reports_r2() {
        let mut worker = linear_worker();
        let params = worker.get_parameters();
        let res = worker.evaluate(&params, &Hyperparameters::new()).unwrap();
        assert_eq!(res.num_examples, 10);
        assert!(res.metrics.contains_key("r2_score"));
        assert!(res.loss > 0.0);
    }

    #[test]
    fn test_handle_maps_errors_to_failure() {
        let mut worker = linear_worker();
        let wrong = ParameterSet::new(vec![Tensor::from_vec(vec![1.0])]);
        let response = worker.handle(&ClientRequest::fit(wrong, Hyperparameters::new()));
        assert!(matches!(response, ClientResponse::Failure(_)));
    }

    #[test]
    fn test_model_and_data_must_agree() {
        let provider = SyntheticRegression::new(10, 3);
        let result = build_worker(
            ClientId::new("c"),
            &ModelConfig::Cnn(Default::default()),
            DataSource::Regression(&provider),
            0,
            1,
            TrainConfig::default(),
        );
        assert!(matches!(result, Err(Error::UnsupportedCapability(_))));
    }
}
