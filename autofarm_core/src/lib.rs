//! AutoFarm Core - Distributed Simulation Orchestration
//!
//! This library holds everything between a lifecycle call and an observer's
//! socket:
//! 1. **Registry**: the per-simulation state machine, safe under concurrent calls
//! 2. **Tick Loop**: one supervised task per running simulation, driving a
//!    strictly synchronous step exchange with a worker
//! 3. **Subscriber Hub**: bounded fan-out where a slow observer only hurts itself
//! 4. **Protocol Bridge**: relays a tick stream to an external connection with
//!    liveness probes and read/write deadlines
//!
//! The worker side (entity simulator and step handler) and best-effort
//! persistence live here too, so a whole farm can run in one process.
//!
//! # Example
//!
//! ```ignore
//! use autofarm_core::{InProcessConnector, MemoryStore, OrchestratorConfig, SimulationRegistry, WorkerNode};
//! use autofarm_env::{SimulationConfig, TokioContext};
//! use std::sync::Arc;
//!
//! let registry = SimulationRegistry::new(
//!     TokioContext::shared(),
//!     Arc::new(InProcessConnector::new(WorkerNode::shared(42))),
//!     Arc::new(MemoryStore::new()),
//!     OrchestratorConfig::default(),
//! );
//! let sim = registry.create(SimulationConfig::new("farm", 3, 100, "patrol"))?;
//! let mut ticks = registry.subscribe(sim.id)?;
//! registry.start(sim.id)?;
//! while let Some(tick) = ticks.recv().await {
//!     println!("tick {}: {} entities", tick.tick, tick.entities.len());
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod entity;
pub mod error;
pub mod hub;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod tick_loop;
pub mod worker;

// Re-export key types for convenience
pub use bridge::{BridgeExit, ObserverFrame, ProtocolBridge};
pub use config::{BridgeConfig, OrchestratorConfig, PersistPolicy};
pub use entity::EntitySimulator;
pub use error::FarmError;
pub use hub::{BroadcastReport, SubscriberHub, Subscription};
pub use registry::SimulationRegistry;
pub use store::{MemoryStore, Persistence, SimulationStore, SledStore, TickSummary};
pub use tick_loop::{LoopExit, TickLoop};
pub use worker::{InProcessConnector, WorkerNode};
