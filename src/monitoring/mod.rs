//! Monitoring Module
//!
//! Provides observability for fedround:
//! - Structured logging via `tracing-subscriber`

pub mod logging;

pub use logging::{init_logging, LogFormat, LogLevel, LoggerConfig};
