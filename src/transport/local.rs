//! In-process transport with fault injection.
//!
//! Every call is encoded, handed to the worker on the blocking pool, and the
//! reply decoded again, so coordinator and client never share buffers.

use crate::client::{ClientRequest, ClientResponse, FederatedClient, Method};
use crate::core::{ClientId, Error, Result};
use crate::params::{ParameterSet, Tensor};
use crate::transport::codec::WireCodec;
use crate::transport::registry::ClientRegistry;
use crate::transport::Transport;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Misbehaviour injected into a client's calls.
#[derive(Clone, Debug, PartialEq)]
pub enum Fault {
    /// Never answer
    Hang,
    /// Answer after a delay
    Delay(Duration),
    /// Fail at the transport level
    Disconnect,
    /// Reply with an undecodable frame
    CorruptParameters,
    /// Reply with an empty parameter set
    EmptyParameters,
    /// Reply with NaN in the parameters
    NonFinite,
    /// Answer normally, then leave the registry
    LeaveAfterReply,
}

/// A fault and the calls it applies to.
#[derive(Clone, Debug, PartialEq)]
pub struct FaultPlan {
    pub fault: Fault,
    /// Rounds affected; every round when `None`
    pub rounds: Option<BTreeSet<u64>>,
    /// Method affected; both when `None`
    pub method: Option<Method>,
}

impl FaultPlan {
    /// Apply `fault` to every call.
    pub fn always(fault: Fault) -> Self {
        Self {
            fault,
            rounds: None,
            method: None,
        }
    }

    /// Limit the plan to the given rounds.
    pub fn in_rounds(mut self, rounds: impl IntoIterator<Item = u64>) -> Self {
        self.rounds = Some(rounds.into_iter().collect());
        self
    }

    /// Limit the plan to one method.
    pub fn on(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    fn applies_to(&self, request: &ClientRequest) -> bool {
        let round_ok = match (&self.rounds, request.server_round()) {
            (None, _) => true,
            (Some(rounds), Some(round)) => rounds.contains(&round),
            (Some(_), None) => false,
        };
        let method_ok = self.method.map_or(true, |m| m == request.method());
        round_ok && method_ok
    }
}

/// Transport delivering calls to workers in this process.
pub struct InProcessTransport {
    registry: Arc<ClientRegistry>,
    codec: Arc<WireCodec>,
    faults: RwLock<HashMap<ClientId, Vec<FaultPlan>>>,
}

impl InProcessTransport {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self {
            registry,
            codec: Arc::new(WireCodec::new()),
            faults: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    /// Register a worker.
    pub async fn register(&self, worker: Box<dyn FederatedClient>) -> Result<ClientId> {
        self.registry.register(worker).await
    }

    /// Add a fault plan for a client.
    pub async fn inject(&self, id: &ClientId, plan: FaultPlan) {
        self.faults
            .write()
            .await
            .entry(id.clone())
            .or_default()
            .push(plan);
    }

    /// Drop every fault plan for a client.
    pub async fn clear_faults(&self, id: &ClientId) {
        self.faults.write().await.remove(id);
    }

    async fn fault_for(&self, id: &ClientId, request: &ClientRequest) -> Option<Fault> {
        self.faults
            .read()
            .await
            .get(id)?
            .iter()
            .find(|plan| plan.applies_to(request))
            .map(|plan| plan.fault.clone())
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn list_available(&self) -> BTreeSet<ClientId> {
        self.registry.list_available().await
    }

    async fn call(&self, client_id: &ClientId, request: ClientRequest) -> Result<ClientResponse> {
        let entry = self
            .registry
            .get(client_id)
            .await
            .ok_or_else(|| Error::ClientNotFound(client_id.to_string()))?;
        let fault = self.fault_for(client_id, &request).await;

        match &fault {
            Some(Fault::Hang) => {
                debug!(client = %client_id, "injected hang");
                std::future::pending::<()>().await;
            }
            Some(Fault::Delay(delay)) => tokio::time::sleep(*delay).await,
            Some(Fault::Disconnect) => {
                return Err(Error::ClientUnreachable(format!(
                    "{} disconnected",
                    client_id
                )))
            }
            _ => {}
        }

        let frame = self.codec.encode(&request)?;
        let codec = Arc::clone(&self.codec);
        let worker = Arc::clone(&entry.worker);
        let reply_fault = fault.clone();
        let id = client_id.clone();

        let reply = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let request: ClientRequest = codec.decode(&frame)?;
            let response = {
                let mut worker = worker
                    .lock()
                    .map_err(|_| Error::ClientUnreachable(format!("{} crashed earlier", id)))?;
                worker.handle(&request)
            };
            let response = tamper(response, reply_fault.as_ref())?;
            let mut frame = codec.encode(&response)?;
            if reply_fault == Some(Fault::CorruptParameters) {
                frame.truncate(frame.len() / 2);
            }
            Ok(frame)
        })
        .await
        .map_err(|e| Error::ClientUnreachable(format!("{}: {}", client_id, e)))??;

        if fault == Some(Fault::LeaveAfterReply) {
            self.registry.deregister(client_id).await;
        }

        self.codec.decode(&reply)
    }
}

/// Rewrite a reply's parameters according to `fault`.
fn tamper(response: ClientResponse, fault: Option<&Fault>) -> Result<ClientResponse> {
    let mut res = match (response, fault) {
        (ClientResponse::Fit(res), Some(Fault::EmptyParameters | Fault::NonFinite)) => res,
        (response, _) => return Ok(response),
    };
    res.parameters = match fault {
        Some(Fault::NonFinite) => poison(&res.parameters)?,
        _ => ParameterSet::empty(),
    };
    Ok(ClientResponse::Fit(res))
}

fn poison(parameters: &ParameterSet) -> Result<ParameterSet> {
    let mut tensors = parameters.tensors().to_vec();
    if let Some(first) = tensors.first_mut() {
        let mut data = first.data().to_vec();
        if let Some(v) = data.first_mut() {
            *v = f32::NAN;
        }
        *first = Tensor::new(first.shape().to_vec(), data)?;
    }
    Ok(ParameterSet::new(tensors))
}
