//! Client Module
//!
//! Participant side of federation:
//! - Fit/Evaluate request and response messages
//! - Client workers owning a local model and a private partition

pub mod messages;
pub mod worker;

pub use messages::{ClientRequest, ClientResponse, Method};
pub use worker::{build_worker, ClientWorker, DataSource, FederatedClient};
