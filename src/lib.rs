//! # fedround - Federated Round Orchestration
//!
//! Trains one shared model across many data-holding clients without
//! centralizing their data:
//! - **Server**: round orchestration, client sampling, quorum gates, multi-round control
//! - **Federated**: sample-weighted aggregation of parameters and metrics (FedAvg)
//! - **Models**: local learners (linear regression, convolutional classifier)
//! - **Transport**: client registry, wire codec, in-process transport
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedround::models::ModelConfig;
//! use fedround::server::FederationConfig;
//! use fedround::simulation::Simulation;
//!
//! #[tokio::main]
//! async fn main() -> fedround::Result<()> {
//!     let config = FederationConfig::default()
//!         .with_model(ModelConfig::Linear { n_features: 10 })
//!         .with_local_training(10, 0.01);
//!     let report = Simulation::regression(config, 4, 100)?.run().await?;
//!     println!("completed rounds: {:?}", report.completed_rounds());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod core;
pub mod data;
pub mod federated;
pub mod models;
pub mod monitoring;
pub mod params;
pub mod server;
pub mod simulation;
pub mod transport;

pub use core::error::{Error, Result};
