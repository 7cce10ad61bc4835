//! Transport Module
//!
//! How the coordinator reaches clients:
//! - `Transport` trait (list reachable clients, call one)
//! - Client registry
//! - bincode + LZ4 wire codec
//! - In-process transport with fault injection

pub mod codec;
pub mod local;
pub mod registry;

pub use codec::{CodecStats, WireCodec};
pub use local::{Fault, FaultPlan, InProcessTransport};
pub use registry::{ClientRegistry, RegisteredClient};

use crate::client::{ClientRequest, ClientResponse};
use crate::core::{ClientId, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Reaches clients on behalf of the coordinator.
///
/// Calls may never return; callers bound them with a timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ids of clients currently reachable.
    async fn list_available(&self) -> BTreeSet<ClientId>;

    /// Deliver one request and wait for the reply.
    async fn call(&self, client_id: &ClientId, request: ClientRequest) -> Result<ClientResponse>;
}
