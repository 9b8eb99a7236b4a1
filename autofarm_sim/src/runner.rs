//! Scenario runner - executes farm scenarios and grades them.

use crate::checks::{verify_subsequence, verify_ticks, TickStats};
use crate::farm::{collect_for, collect_n, drain_buffered, SimFarm};
use crate::scenarios::ScenarioId;

use autofarm_core::{EntitySimulator, FarmError, OrchestratorConfig};
use autofarm_core::config::DEFAULT_SUBSCRIBER_CAPACITY;
use autofarm_env::{SimulationConfig, SimulationId, SimulationStatus};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Ticks observed by the scenario's reading subscriber
    pub ticks_observed: usize,

    /// Ticks dropped for lagging subscribers
    pub dropped: u64,

    /// Lowest and highest battery seen
    pub battery_range: Option<(f64, f64)>,

    /// Failure message if any
    pub failure_reason: Option<String>,
}

/// What a passing scenario reports.
#[derive(Debug, Default)]
struct Outcome {
    stats: TickStats,
    dropped: u64,
}

impl From<TickStats> for Outcome {
    fn from(stats: TickStats) -> Self {
        Self { stats, dropped: 0 }
    }
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message())
    }
}

/// Runs farm scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Observation window of the patrol scenario
    window: Duration,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            window: Duration::from_millis(350),
        }
    }

    /// Sets the patrol observation window (never shorter than 350ms).
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window.max(Duration::from_millis(350));
        self
    }

    /// Runs a scenario and returns the result. Must be called within a
    /// Tokio runtime.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let outcome = match scenario {
            ScenarioId::Patrol => self.run_patrol().await,
            ScenarioId::Drain => self.run_drain().await,
            ScenarioId::PauseResume => self.run_pause_resume().await,
            ScenarioId::SlowObserver => self.run_slow_observer().await,
            ScenarioId::FlakyWorker => self.run_flaky_worker().await,
            ScenarioId::Lifecycle => self.run_lifecycle().await,
            ScenarioId::Churn => self.run_churn().await,
        };

        match outcome {
            Ok(outcome) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: true,
                ticks_observed: outcome.stats.ticks,
                dropped: outcome.dropped,
                battery_range: outcome.stats.min_battery.zip(outcome.stats.max_battery),
                failure_reason: None,
            },
            Err(reason) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: false,
                ticks_observed: 0,
                dropped: 0,
                battery_range: None,
                failure_reason: Some(reason),
            },
        }
    }

    async fn run_patrol(&self) -> Result<Outcome, String> {
        let farm = SimFarm::new(self.seed);
        let id = create(&farm, SimulationConfig::new("patrol", 3, 100, "patrol"))?;
        let mut ticks = farm.registry.subscribe(id).map_err(|e| e.to_string())?;

        let started = farm.registry.start(id).map_err(|e| e.to_string())?;
        ensure(started.status == SimulationStatus::Running, || {
            format!("start left status {}", started.status)
        })?;

        let early = collect_for(&mut ticks, Duration::from_millis(350)).await;
        ensure(early.len() >= 3, || format!("only {} ticks within 350ms", early.len()))?;

        let mut observed = early;
        observed.extend(collect_for(&mut ticks, self.window - Duration::from_millis(350)).await);
        let stats = verify_ticks(&observed, 3)?;

        farm.context.advance_time(self.window);
        let stopped = farm.registry.stop(id).map_err(|e| e.to_string())?;
        ensure(stopped.ended_at_ms >= stopped.started_at_ms, || {
            "ended before it started".to_string()
        })?;
        debug!("patrol observed {} ticks", stats.ticks);
        Ok(stats.into())
    }

    async fn run_drain(&self) -> Result<Outcome, String> {
        let farm = SimFarm::with_parts(
            self.seed,
            EntitySimulator::new().with_drain(10.0),
            OrchestratorConfig::default(),
        );
        let id = create(&farm, SimulationConfig::new("drain", 2, 5, "drain"))?;
        let mut ticks = farm.registry.subscribe(id).map_err(|e| e.to_string())?;
        farm.registry.start(id).map_err(|e| e.to_string())?;

        // 100 / 10 = 10 ticks to empty, a few more to watch them stay parked
        let observed = collect_n(&mut ticks, 15, Duration::from_secs(2)).await;
        farm.registry.stop(id).map_err(|e| e.to_string())?;

        ensure(observed.len() == 15, || format!("only {} ticks observed", observed.len()))?;
        let stats = verify_ticks(&observed, 2)?;
        ensure(stats.offline == 2, || format!("{} of 2 entities offline", stats.offline))?;
        ensure(stats.min_battery == Some(0.0), || "battery never reached 0".to_string())?;
        Ok(stats.into())
    }

    async fn run_pause_resume(&self) -> Result<Outcome, String> {
        let farm = SimFarm::new(self.seed);
        let period = Duration::from_millis(10);
        let id = create(&farm, SimulationConfig::new("pause", 2, 10, "patrol"))?;
        let mut ticks = farm.registry.subscribe(id).map_err(|e| e.to_string())?;

        farm.registry.start(id).map_err(|e| e.to_string())?;
        let mut before = collect_n(&mut ticks, 5, Duration::from_secs(1)).await;
        ensure(before.len() == 5, || format!("only {} ticks before pause", before.len()))?;

        let paused = farm.registry.pause(id).map_err(|e| e.to_string())?;
        ensure(paused.status == SimulationStatus::Paused, || {
            format!("pause left status {}", paused.status)
        })?;

        // At most one in-flight tick may still land.
        tokio::time::sleep(period * 2).await;
        before.extend(drain_buffered(&mut ticks));
        let stats = verify_ticks(&before, 2)?;

        tokio::time::sleep(period * 5).await;
        let leaked = drain_buffered(&mut ticks);
        ensure(leaked.is_empty(), || format!("{} ticks while paused", leaked.len()))?;

        farm.registry.start(id).map_err(|e| e.to_string())?;
        let after = collect_n(&mut ticks, 3, Duration::from_secs(1)).await;
        farm.registry.stop(id).map_err(|e| e.to_string())?;

        verify_ticks(&after, 2)?;
        let last_battery = before
            .last()
            .map(|t| t.entities[0].battery)
            .unwrap_or_default();
        let resumed_battery = after
            .first()
            .map(|t| t.entities[0].battery)
            .ok_or_else(|| "no ticks after resume".to_string())?;
        ensure(resumed_battery < last_battery, || {
            format!("battery went from {} to {} across resume", last_battery, resumed_battery)
        })?;
        Ok(stats.into())
    }

    async fn run_slow_observer(&self) -> Result<Outcome, String> {
        let farm = SimFarm::new(self.seed);
        let id = create(&farm, SimulationConfig::new("slow", 1, 1, "patrol"))?;
        let mut stalled = farm.registry.subscribe(id).map_err(|e| e.to_string())?;
        let mut reader = farm.registry.subscribe(id).map_err(|e| e.to_string())?;
        farm.registry.start(id).map_err(|e| e.to_string())?;

        let wanted = DEFAULT_SUBSCRIBER_CAPACITY + 30;
        let read = collect_n(&mut reader, wanted, Duration::from_secs(5)).await;
        farm.registry.stop(id).map_err(|e| e.to_string())?;

        ensure(read.len() == wanted, || format!("reader saw only {} ticks", read.len()))?;
        let stats = verify_ticks(&read, 1)?;
        ensure(reader.dropped() == 0, || format!("reader dropped {}", reader.dropped()))?;

        let lagged = drain_buffered(&mut stalled);
        verify_subsequence(&lagged, 1)?;
        ensure(stalled.dropped() > 0, || "stalled subscriber never dropped".to_string())?;

        let dropped = farm.registry.dropped_ticks(id).map_err(|e| e.to_string())?;
        Ok(Outcome { stats, dropped })
    }

    async fn run_flaky_worker(&self) -> Result<Outcome, String> {
        let farm = SimFarm::new(self.seed);
        let id = create(&farm, SimulationConfig::new("flaky", 2, 5, "patrol"))?;
        let mut ticks = farm.registry.subscribe(id).map_err(|e| e.to_string())?;

        farm.worker.fail_after_steps(5);
        farm.registry.start(id).map_err(|e| e.to_string())?;
        ensure(
            farm.wait_for_status(id, SimulationStatus::Failed, Duration::from_secs(2)).await,
            || "simulation never marked FAILED".to_string(),
        )?;
        ensure(!farm.registry.loop_active(id).map_err(|e| e.to_string())?, || {
            "failed loop still recorded".to_string()
        })?;
        let before = drain_buffered(&mut ticks);
        ensure(before.len() == 5, || format!("{} ticks before the crash", before.len()))?;

        farm.worker.heal();
        farm.registry.start(id).map_err(|e| e.to_string())?;
        let after = collect_n(&mut ticks, 3, Duration::from_secs(1)).await;
        farm.registry.stop(id).map_err(|e| e.to_string())?;

        ensure(after.len() == 3, || format!("only {} ticks after restart", after.len()))?;
        let stats = verify_ticks(&after, 2)?;
        Ok(stats.into())
    }

    async fn run_lifecycle(&self) -> Result<Outcome, String> {
        let farm = SimFarm::new(self.seed);
        let registry = &farm.registry;

        for bad in [
            SimulationConfig::new("none", 0, 100, "patrol"),
            SimulationConfig::new("frozen", 3, 0, "patrol"),
        ] {
            ensure(matches!(registry.create(bad), Err(FarmError::InvalidConfig(_))), || {
                "invalid config accepted".to_string()
            })?;
        }

        let mut ids = HashSet::new();
        for _ in 0..100 {
            ids.insert(create(&farm, SimulationConfig::new("many", 1, 100, "patrol"))?);
        }
        ensure(ids.len() == 100, || format!("{} unique ids out of 100", ids.len()))?;

        let id = create(&farm, SimulationConfig::new("one", 1, 100, "patrol"))?;
        ensure(
            matches!(registry.pause(id), Err(FarmError::InvalidTransition { .. })),
            || "pause accepted on CREATED".to_string(),
        )?;

        farm.context.advance_time(Duration::from_secs(1));
        let stopped = registry.stop(id).map_err(|e| e.to_string())?;
        ensure(stopped.status == SimulationStatus::Stopped, || "stop failed".to_string())?;
        ensure(stopped.ended_at_ms.unwrap_or(0) >= stopped.created_at_ms, || {
            "ended before created".to_string()
        })?;
        ensure(registry.stop(id).map_err(|e| e.to_string())? == stopped, || {
            "second stop changed the descriptor".to_string()
        })?;
        ensure(
            matches!(
                registry.start(id),
                Err(FarmError::InvalidTransition { status: SimulationStatus::Stopped, .. })
            ),
            || "start accepted on STOPPED".to_string(),
        )?;

        let unknown = SimulationId::new();
        ensure(
            matches!(registry.get(unknown), Err(FarmError::NotFound(_)))
                && matches!(registry.start(unknown), Err(FarmError::NotFound(_)))
                && matches!(registry.pause(unknown), Err(FarmError::NotFound(_)))
                && matches!(registry.stop(unknown), Err(FarmError::NotFound(_))),
            || "unknown id not reported as NotFound".to_string(),
        )?;

        Ok(Outcome::default())
    }

    async fn run_churn(&self) -> Result<Outcome, String> {
        let farm = SimFarm::new(self.seed);
        let id = create(&farm, SimulationConfig::new("churn", 2, 1, "patrol"))?;
        let mut ticks = farm.registry.subscribe(id).map_err(|e| e.to_string())?;

        for _ in 0..50 {
            farm.registry.start(id).map_err(|e| e.to_string())?;
            farm.registry.start(id).map_err(|e| e.to_string())?;
            tokio::task::yield_now().await;
            farm.registry.pause(id).map_err(|e| e.to_string())?;
        }
        farm.registry.start(id).map_err(|e| e.to_string())?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        farm.registry.stop(id).map_err(|e| e.to_string())?;
        farm.shutdown().await;

        ensure(farm.worker.max_open_exchanges() == 1, || {
            format!("{} exchanges open at once", farm.worker.max_open_exchanges())
        })?;
        ensure(farm.worker.open_exchanges() == 0, || "exchange leaked".to_string())?;

        // Each loop numbers from 1, so only the per-loop runs are contiguous.
        let observed = drain_buffered(&mut ticks);
        let stats = TickStats {
            ticks: observed.len(),
            ..TickStats::default()
        };
        Ok(stats.into())
    }
}

fn create(farm: &SimFarm, config: SimulationConfig) -> Result<SimulationId, String> {
    farm.registry
        .create(config)
        .map(|descriptor| descriptor.id)
        .map_err(|e| e.to_string())
}
