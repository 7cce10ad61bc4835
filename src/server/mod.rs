//! Server Module
//!
//! Coordinator side of federation:
//! - Federation and round configuration
//! - Client sampling
//! - Round orchestration with timeouts and quorum gates
//! - Multi-round controller, metric history and final report

pub mod config;
pub mod controller;
pub mod history;
pub mod orchestrator;
pub mod round;
pub mod sampler;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{FederationConfig, RoundConfig};
pub use controller::{FederationController, FederationReport, GlobalModelState};
pub use history::{MetricHistory, RoundSummary};
pub use orchestrator::RoundOrchestrator;
pub use round::{ClientFailure, FailureKind, RoundResult, RoundStatus};
pub use sampler::{sample_size, ClientSampler};
