//! Wire types shared by the orchestrator, the worker node and the gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a simulation.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationId(pub Uuid);

impl SimulationId {
    /// Creates a new random SimulationId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic SimulationId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Builds a v4 SimulationId from caller-supplied random bytes.
    ///
    /// Lets a seeded generator produce valid, reproducible ids.
    pub fn from_random_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Raw bytes, used as a storage key prefix.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for SimulationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SimulationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SimulationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Immutable creation parameters of a simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Number of entities, ids are `1..=entity_count`
    #[serde(alias = "entities")]
    pub entity_count: u32,

    /// Tick period in milliseconds
    pub tick_rate_ms: u32,

    /// Scenario tag, opaque to the orchestrator
    #[serde(default, alias = "scenario")]
    pub scenario_type: String,
}

impl SimulationConfig {
    /// Creates a config with the given shape.
    pub fn new(name: impl Into<String>, entity_count: u32, tick_rate_ms: u32, scenario: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_count,
            tick_rate_ms,
            scenario_type: scenario.into(),
        }
    }

    /// Returns the tick period as a Duration.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms as u64)
    }
}

/// Lifecycle status of a simulation.
///
/// ```text
/// CREATED ──► RUNNING ◄──► PAUSED
///    │          │  ▲          │
///    │          ▼  │          │
///    │        FAILED          │
///    └──────────┴─────────────┴──► STOPPED
/// ```
///
/// `Completed` is reserved; nothing transitions into it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Completed,
    /// The tick loop lost its worker exchange
    Failed,
}

impl SimulationStatus {
    /// Returns the status name as exposed on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            SimulationStatus::Created => "CREATED",
            SimulationStatus::Running => "RUNNING",
            SimulationStatus::Paused => "PAUSED",
            SimulationStatus::Stopped => "STOPPED",
            SimulationStatus::Completed => "COMPLETED",
            SimulationStatus::Failed => "FAILED",
        }
    }

    /// Returns true if no further Start is accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SimulationStatus::Stopped | SimulationStatus::Completed)
    }
}

impl std::fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The durable record of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationDescriptor {
    pub id: SimulationId,
    pub config: SimulationConfig,
    pub status: SimulationStatus,

    /// Creation time (ms since Unix epoch)
    pub created_at_ms: u64,

    /// First transition to RUNNING, set once
    pub started_at_ms: Option<u64>,

    /// Transition to STOPPED, set once
    pub ended_at_ms: Option<u64>,
}

/// Derived status tag of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    LowBattery,
    Offline,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::LowBattery => "low_battery",
            EntityStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one entity after a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    #[serde(rename = "id")]
    pub entity_id: u64,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,

    /// Battery level in [0, 100]
    pub battery: f64,
    pub status: EntityStatus,
}

/// One step request sent by a tick loop to its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub simulation_id: SimulationId,
    pub tick: u64,
    pub entity_ids: Vec<u64>,

    /// Always 0 until partitioned execution exists
    pub partition_index: u32,

    /// Always 1 until partitioned execution exists
    pub partition_total: u32,
    pub config: SimulationConfig,
}

/// The worker's answer to exactly one [`StepRequest`], matched by stream order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub simulation_id: SimulationId,
    pub tick: u64,
    pub entities: Vec<EntityState>,

    /// Wall time the worker spent computing this step
    pub compute_ms: f64,
}

/// Orchestrator-level summary of one tick, persisted and broadcast as a unit.
///
/// This is also the JSON shape delivered to external observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedTick {
    pub simulation_id: SimulationId,
    pub tick: u64,
    pub entities: Vec<EntityState>,
    pub avg_compute_ms: f64,
    pub worker_count: u32,

    /// Completion time (ms since Unix epoch)
    pub completed_at_ms: u64,
}
