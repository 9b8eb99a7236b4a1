//! Error types for the AutoFarm transport layer.

use thiserror::Error;

/// Errors raised by a worker exchange or a tick stream.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Connect, send or receive failed on the underlying transport
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The peer does not know the requested simulation
    #[error("Simulation not found: {0}")]
    NotFound(String),

    /// Frame serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The peer closed the stream
    #[error("Stream closed: {0}")]
    Closed(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates a not-found error for a simulation id.
    pub fn not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(id.to_string())
    }

    /// Creates a serialization error.
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::SerializationError(err.to_string())
    }

    /// Creates a closed-stream error.
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }
}
