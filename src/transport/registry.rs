//! Registry of reachable client workers.

use crate::client::FederatedClient;
use crate::core::{now, ClientId, Error, Result, Timestamp};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::debug;

/// A worker handle. Calls lock it on the blocking pool, one at a time.
pub type SharedClient = Arc<Mutex<Box<dyn FederatedClient>>>;

/// Registered client entry.
#[derive(Clone)]
pub struct RegisteredClient {
    /// Worker handle
    pub worker: SharedClient,
    /// Registration time
    pub registered_at: Timestamp,
}

/// Tracks which clients are currently reachable.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<BTreeMap<ClientId, RegisteredClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under its own id.
    pub async fn register(&self, worker: Box<dyn FederatedClient>) -> Result<ClientId> {
        let id = worker.client_id().clone();
        let mut clients = self.clients.write().await;
        if clients.contains_key(&id) {
            return Err(Error::InvalidConfig(format!(
                "client {} is already registered",
                id
            )));
        }
        clients.insert(
            id.clone(),
            RegisteredClient {
                worker: Arc::new(Mutex::new(worker)),
                registered_at: now(),
            },
        );
        debug!(client = %id, "client registered");
        Ok(id)
    }

    /// Remove a client. Returns whether it was present.
    pub async fn deregister(&self, id: &ClientId) -> bool {
        let removed = self.clients.write().await.remove(id).is_some();
        if removed {
            debug!(client = %id, "client deregistered");
        }
        removed
    }

    /// Ids of every reachable client.
    pub async fn list_available(&self) -> BTreeSet<ClientId> {
        self.clients.read().await.keys().cloned().collect()
    }

    /// Look up a client.
    pub async fn get(&self, id: &ClientId) -> Option<RegisteredClient> {
        self.clients.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}
