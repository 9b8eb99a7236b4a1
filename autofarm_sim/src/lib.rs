//! AutoFarm Simulation Harness
//!
//! This crate runs a whole farm inside one process so its lifecycle and
//! streaming guarantees can be exercised quickly and reproducibly.
//!
//! # Core Principle: Control the Collaborators
//!
//! - **Time**: descriptor and tick timestamps come from a virtual clock
//! - **Worker**: an in-process [`LocalWorker`] with latency, jitter,
//!   crash-after-N-steps and connection refusal
//! - **Randomness**: entity spawns and ids derive from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          SimFarm                            │
//! │  ┌──────────────────────┐        ┌──────────────────────┐   │
//! │  │  SimulationRegistry  │◄──────►│ LocalWorker (faults) │   │
//! │  │  + SimContext clock  │ steps  │  + WorkerNode        │   │
//! │  └──────────┬───────────┘        └──────────────────────┘   │
//! │             │ ticks                                         │
//! │  ┌──────────▼───────────┐        ┌──────────────────────┐   │
//! │  │    Subscriptions     │───────►│   checks (ordering,  │   │
//! │  │                      │        │   battery, entities) │   │
//! │  └──────────────────────┘        └──────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use autofarm_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Patrol).await;
//! assert!(result.passed);
//! ```

mod context;
mod farm;
mod runner;
mod worker;
pub mod checks;
pub mod scenarios;

pub use checks::{verify_subsequence, verify_ticks, TickStats};
pub use context::SimContext;
pub use farm::{collect_for, collect_n, drain_buffered, SimFarm, SimRegistry};
pub use runner::{ScenarioResult, ScenarioRunner};
pub use worker::{LocalWorker, LocalWorkerController};
