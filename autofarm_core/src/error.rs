//! Error taxonomy of the orchestrator core.

use autofarm_env::{EnvError, SimulationStatus};
use thiserror::Error;

/// Errors surfaced by the registry and the background loops.
///
/// `InvalidConfig`, `NotFound` and `InvalidTransition` are returned to the
/// caller of a lifecycle operation. `UpstreamUnavailable` and
/// `PersistenceFailure` only ever appear in logs.
#[derive(Debug, Error)]
pub enum FarmError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Simulation not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} simulation in status {status}")]
    InvalidTransition {
        action: &'static str,
        status: SimulationStatus,
    },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] EnvError),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

impl FarmError {
    /// Creates a not-found error for a simulation id.
    pub fn not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(id.to_string())
    }

    /// Creates a persistence error.
    pub fn persistence(msg: impl std::fmt::Display) -> Self {
        Self::PersistenceFailure(msg.to_string())
    }
}
