//! Federated Aggregation Module
//!
//! Provides the coordinator-side merge of client work:
//! - Client fit/evaluate payloads
//! - Sample-weighted parameter averaging (FedAvg)
//! - Weighted metric aggregation

pub mod aggregator;
pub mod contribution;

pub use aggregator::{
    weighted_average, weighted_loss, weighted_metrics, AggregationStrategy, FedAvg,
};
pub use contribution::{ClientContribution, EvaluateRes, EvaluationContribution, FitRes};
