//! Error types for fedround.

use thiserror::Error;

/// Result type alias for fedround operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a federation.
#[derive(Error, Debug)]
pub enum Error {
    // Participation errors (recovered per client)
    #[error("Client unreachable: {0}")]
    ClientUnreachable(String),

    #[error("Client {client_id} timed out after {timeout_ms} ms")]
    ClientTimeout { client_id: String, timeout_ms: u64 },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Client reported failure: {0}")]
    ClientFailed(String),

    #[error("Empty contribution: {0}")]
    EmptyContribution(String),

    // Round errors
    #[error("Insufficient clients: {available} available, {required} required")]
    InsufficientClients { available: usize, required: usize },

    #[error("Aggregation quorum not met in {phase}: {succeeded} succeeded, {required} required")]
    AggregationQuorumFailure {
        phase: String,
        succeeded: usize,
        required: usize,
    },

    // Structural errors (fatal for the federation)
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Nothing to aggregate")]
    EmptyAggregation,

    #[error("Unsupported model capability: {0}")]
    UnsupportedCapability(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Model and data errors
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    // Wire errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error must terminate the federation run.
    ///
    /// Everything else is a per-client failure the round absorbs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ShapeMismatch(_)
                | Error::EmptyAggregation
                | Error::UnsupportedCapability(_)
                | Error::InvalidConfig(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
