//! Lifecycle and streaming scenarios run against an in-process farm.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// FARM-001: 3 entities at 100ms, ticks 1, 2, 3... within 350ms
    Patrol,

    /// FARM-002: fast drain until every entity is parked offline
    Drain,

    /// FARM-003: pause goes quiet, resume restarts numbering
    PauseResume,

    /// FARM-004: a never-reading subscriber next to a reading one
    SlowObserver,

    /// FARM-005: the worker crashes mid-run, the simulation fails and restarts
    FlakyWorker,

    /// FARM-006: invalid configs, terminal states and unknown ids
    Lifecycle,

    /// FARM-007: rapid start/pause cycles never overlap worker exchanges
    Churn,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Patrol,
            ScenarioId::Drain,
            ScenarioId::PauseResume,
            ScenarioId::SlowObserver,
            ScenarioId::FlakyWorker,
            ScenarioId::Lifecycle,
            ScenarioId::Churn,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Patrol => "patrol",
            ScenarioId::Drain => "drain",
            ScenarioId::PauseResume => "pause_resume",
            ScenarioId::SlowObserver => "slow_observer",
            ScenarioId::FlakyWorker => "flaky_worker",
            ScenarioId::Lifecycle => "lifecycle",
            ScenarioId::Churn => "churn",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Patrol => "3 entities at 100ms, at least 3 ordered ticks within 350ms",
            ScenarioId::Drain => "Batteries drain to 0 and entities stay offline",
            ScenarioId::PauseResume => "No ticks while paused, numbering restarts at 1 on resume",
            ScenarioId::SlowObserver => "A stalled subscriber drops ticks without slowing a reader",
            ScenarioId::FlakyWorker => "Worker crash moves RUNNING to FAILED, restart recovers",
            ScenarioId::Lifecycle => "InvalidConfig, InvalidTransition and NotFound are reported",
            ScenarioId::Churn => "50 start/pause cycles keep at most one worker exchange open",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "patrol" | "farm-001" => Ok(ScenarioId::Patrol),
            "drain" | "farm-002" => Ok(ScenarioId::Drain),
            "pause_resume" | "pauseresume" | "farm-003" => Ok(ScenarioId::PauseResume),
            "slow_observer" | "slowobserver" | "farm-004" => Ok(ScenarioId::SlowObserver),
            "flaky_worker" | "flakyworker" | "farm-005" => Ok(ScenarioId::FlakyWorker),
            "lifecycle" | "farm-006" => Ok(ScenarioId::Lifecycle),
            "churn" | "farm-007" => Ok(ScenarioId::Churn),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
