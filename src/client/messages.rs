//! Request and response messages exchanged with clients.

use crate::core::Hyperparameters;
use crate::federated::{EvaluateRes, FitRes};
use crate::params::ParameterSet;
use serde::{Deserialize, Serialize};

/// Remote methods a client serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Fit,
    Evaluate,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Fit => write!(f, "fit"),
            Method::Evaluate => write!(f, "evaluate"),
        }
    }
}

/// A call sent from the coordinator to one client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Train locally starting from `parameters`
    Fit {
        parameters: ParameterSet,
        config: Hyperparameters,
    },
    /// Evaluate `parameters` on the held-out split
    Evaluate {
        parameters: ParameterSet,
        config: Hyperparameters,
    },
}

impl ClientRequest {
    pub fn fit(parameters: ParameterSet, config: Hyperparameters) -> Self {
        ClientRequest::Fit { parameters, config }
    }

    pub fn evaluate(parameters: ParameterSet, config: Hyperparameters) -> Self {
        ClientRequest::Evaluate { parameters, config }
    }

    pub fn method(&self) -> Method {
        match self {
            ClientRequest::Fit { .. } => Method::Fit,
            ClientRequest::Evaluate { .. } => Method::Evaluate,
        }
    }

    pub fn config(&self) -> &Hyperparameters {
        match self {
            ClientRequest::Fit { config, .. } | ClientRequest::Evaluate { config, .. } => config,
        }
    }

    /// Round number injected by the coordinator, if any.
    pub fn server_round(&self) -> Option<u64> {
        self.config().get_u64("server_round")
    }
}

/// A client's reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientResponse {
    Fit(FitRes),
    Evaluate(EvaluateRes),
    /// The client could not serve the request
    Failure(String),
}

impl ClientResponse {
    /// Method this response answers; `None` for failures.
    pub fn method(&self) -> Option<Method> {
        match self {
            ClientResponse::Fit(_) => Some(Method::Fit),
            ClientResponse::Evaluate(_) => Some(Method::Evaluate),
            ClientResponse::Failure(_) => None,
        }
    }
}
