//! Streaming transport abstractions.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::EnvError;
use crate::types::{AggregatedTick, SimulationId, StepRequest, StepResponse};

/// Dials the worker that executes simulation steps.
///
/// Each tick loop calls `connect` once and keeps the exchange for its whole
/// lifetime; connections are never shared between simulations.
///
/// # Implementations
///
/// - **Production**: WebSocket client (autofarm_server)
/// - **In-process**: `InProcessConnector` (autofarm_core)
/// - **Simulation**: `LocalWorker` with fault injection (autofarm_sim)
#[async_trait]
pub trait WorkerConnector: Send + Sync + 'static {
    /// Opens a new duplex step exchange.
    async fn connect(&self) -> Result<Box<dyn WorkerExchange>, EnvError>;

    /// Address of the worker, for logging.
    fn address(&self) -> String;
}

/// One open duplex step exchange with a worker.
///
/// ```text
/// TickLoop                     Worker
///   |-- send(StepRequest #n) -->|
///   |<-- recv() StepResponse #n-|
///   |-- send(StepRequest #n+1)->|
/// ```
///
/// The caller never has more than one request in flight, so responses are
/// matched to requests purely by order.
#[async_trait]
pub trait WorkerExchange: Send {
    /// Sends one step request.
    async fn send(&mut self, request: StepRequest) -> Result<(), EnvError>;

    /// Waits for the response to the last request sent.
    async fn recv(&mut self) -> Result<StepResponse, EnvError>;
}

/// Opens result streams of aggregated ticks for one simulation.
#[async_trait]
pub trait TickSource: Send + Sync + 'static {
    /// Opens a stream.
    ///
    /// # Returns
    /// * `Err(EnvError::NotFound)` - the simulation id is unknown
    /// * `Err(EnvError::NetworkError)` - the source could not be reached
    async fn open(&self, simulation_id: SimulationId) -> Result<Box<dyn TickStream>, EnvError>;
}

/// An open result stream.
#[async_trait]
pub trait TickStream: Send {
    /// Waits for the next tick.
    ///
    /// Must be cancel-safe: the bridge races it against its probe timer and
    /// drops the future when the timer wins.
    ///
    /// # Returns
    /// * `Ok(Some(tick))` - the next tick, strictly newer than the previous one
    /// * `Ok(None)` - the source ended the stream
    /// * `Err(_)` - the stream broke
    async fn next_tick(&mut self) -> Result<Option<Arc<AggregatedTick>>, EnvError>;
}
