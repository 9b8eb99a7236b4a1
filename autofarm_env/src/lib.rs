//! AutoFarm Environment Abstraction Layer
//!
//! This crate holds everything the orchestrator, the worker node and the
//! gateway have to agree on, without committing to a runtime or a wire:
//! - Time (`now()`, `system_time()`) and the seed behind random initialization
//! - The wire types exchanged between processes
//! - The two streaming seams: the worker exchange and the tick result stream
//!
//! # Streaming seams
//!
//! ```text
//! Orchestrator                     Worker
//!   TickLoop --StepRequest------->  WorkerExchange
//!            <-------StepResponse-
//!
//! Gateway                          Orchestrator
//!   Bridge ----open(id)---------->  TickSource
//!          <-AggregatedTick* -----  TickStream
//! ```
//!
//! Production code plugs in WebSocket implementations, tests plug in
//! in-process ones, and the core logic never knows the difference.

mod context;
mod error;
mod tokio_impl;
mod transport;
mod types;

pub use context::FarmContext;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use transport::{TickSource, TickStream, WorkerConnector, WorkerExchange};
pub use types::{
    AggregatedTick, EntityState, EntityStatus, SimulationConfig, SimulationDescriptor,
    SimulationId, SimulationStatus, StepRequest, StepResponse,
};
