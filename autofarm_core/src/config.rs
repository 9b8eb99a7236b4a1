//! Tunables for the orchestrator and the observer bridge.

use std::time::Duration;

/// Default per-subscriber buffer, in ticks.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Default bound on a single persistence write.
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(2);

/// How the tick loop waits on tick-summary persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistPolicy {
    /// Await the write (bounded by the persist timeout) before broadcasting.
    Inline,

    /// Spawn the write and broadcast immediately.
    Detached,
}

impl PersistPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            PersistPolicy::Inline => "inline",
            PersistPolicy::Detached => "detached",
        }
    }
}

impl std::fmt::Display for PersistPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for PersistPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inline" | "blocking" => Ok(PersistPolicy::Inline),
            "detached" | "background" => Ok(PersistPolicy::Detached),
            _ => Err(format!("Unknown persist policy: {}", s)),
        }
    }
}

/// Configuration for the simulation registry.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Buffer size of every subscription (default: 64)
    pub subscriber_capacity: usize,

    /// Upper bound on one persistence write (default: 2s)
    pub persist_timeout: Duration,

    /// Tick-summary persistence policy (default: inline)
    pub persist_policy: PersistPolicy,

    /// Pending descriptor writes before new ones are dropped (default: 1024)
    pub descriptor_queue: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            persist_policy: PersistPolicy::Inline,
            descriptor_queue: 1024,
        }
    }
}

/// Configuration for the observer protocol bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Liveness probe period (default: 30s)
    pub probe_interval: Duration,

    /// Bound on one outbound write; a breach closes the connection (default: 10s)
    pub write_deadline: Duration,

    /// Inbound silence before the peer is considered dead (default: 60s)
    pub read_deadline: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            write_deadline: Duration::from_secs(10),
            read_deadline: Duration::from_secs(60),
        }
    }
}
