//! Write-through persistence of descriptors and tick summaries.
//!
//! Storage is a collaborator, not a dependency: every write is bounded by a
//! timeout, failures are logged and counted, nothing is retried, and no
//! lifecycle operation or tick ever fails because of the store.

use crate::config::PersistPolicy;
use crate::error::FarmError;

use async_trait::async_trait;
use autofarm_env::{AggregatedTick, SimulationDescriptor, SimulationId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One persisted row per aggregated tick, keyed by (simulation id, tick).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub simulation_id: SimulationId,
    pub tick: u64,
    pub entity_count: u32,
    pub avg_compute_ms: f64,
    pub worker_count: u32,
    pub completed_at_ms: u64,
}

impl TickSummary {
    pub fn from_tick(tick: &AggregatedTick) -> Self {
        Self {
            simulation_id: tick.simulation_id,
            tick: tick.tick,
            entity_count: tick.entities.len() as u32,
            avg_compute_ms: tick.avg_compute_ms,
            worker_count: tick.worker_count,
            completed_at_ms: tick.completed_at_ms,
        }
    }
}

/// Storage backend for simulations and tick summaries.
///
/// Implementations must be thread-safe.
#[async_trait]
pub trait SimulationStore: Send + Sync + 'static {
    /// Inserts or replaces the descriptor row for `descriptor.id`.
    async fn upsert_simulation(&self, descriptor: &SimulationDescriptor) -> Result<(), FarmError>;

    /// Writes the summary row for one tick.
    async fn insert_tick_summary(&self, summary: &TickSummary) -> Result<(), FarmError>;
}

/// Sled-based persistent store.
///
/// Descriptors live in the `simulations` tree keyed by id; summaries live in
/// `tick_summaries` keyed by `id ++ tick (big endian)` so a prefix scan
/// returns one simulation's ticks in order. A restarted loop reuses tick
/// numbers, so its rows replace the earlier ones.
#[derive(Clone)]
pub struct SledStore {
    simulations: sled::Tree,
    ticks: sled::Tree,
}

impl SledStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FarmError> {
        let db = sled::open(path)
            .map_err(|e| FarmError::persistence(format!("Failed to open sled DB: {}", e)))?;
        Self::from_db(db)
    }

    /// Create a temporary store (for testing)
    pub fn open_temp() -> Result<Self, FarmError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| FarmError::persistence(format!("Failed to open temp DB: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, FarmError> {
        let simulations = db
            .open_tree("simulations")
            .map_err(|e| FarmError::persistence(format!("Failed to open tree: {}", e)))?;
        let ticks = db
            .open_tree("tick_summaries")
            .map_err(|e| FarmError::persistence(format!("Failed to open tree: {}", e)))?;
        Ok(Self { simulations, ticks })
    }

    /// Loads a descriptor row.
    pub fn load_simulation(&self, id: SimulationId) -> Result<Option<SimulationDescriptor>, FarmError> {
        let bytes = self
            .simulations
            .get(id.as_bytes())
            .map_err(|e| FarmError::persistence(format!("Read failed: {}", e)))?;
        bytes
            .map(|b| serde_json::from_slice(&b).map_err(FarmError::persistence))
            .transpose()
    }

    /// Loads every summary row of one simulation, ordered by tick.
    pub fn tick_summaries(&self, id: SimulationId) -> Result<Vec<TickSummary>, FarmError> {
        let mut rows = Vec::new();
        for result in self.ticks.scan_prefix(id.as_bytes()) {
            let (_, value) =
                result.map_err(|e| FarmError::persistence(format!("Iteration failed: {}", e)))?;
            rows.push(serde_json::from_slice(&value).map_err(FarmError::persistence)?);
        }
        Ok(rows)
    }

    fn tick_key(id: SimulationId, tick: u64) -> [u8; 24] {
        let mut key = [0u8; 24];
        key[..16].copy_from_slice(id.as_bytes());
        key[16..].copy_from_slice(&tick.to_be_bytes());
        key
    }
}

#[async_trait]
impl SimulationStore for SledStore {
    async fn upsert_simulation(&self, descriptor: &SimulationDescriptor) -> Result<(), FarmError> {
        let value = serde_json::to_vec(descriptor).map_err(FarmError::persistence)?;
        let key = *descriptor.id.as_bytes();
        let tree = self.simulations.clone();
        tokio::task::spawn_blocking(move || {
            tree.insert(key, value)
                .map_err(|e| FarmError::persistence(format!("Insert failed: {}", e)))?;
            tree.flush()
                .map_err(|e| FarmError::persistence(format!("Flush failed: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(FarmError::persistence)?
    }

    async fn insert_tick_summary(&self, summary: &TickSummary) -> Result<(), FarmError> {
        let value = serde_json::to_vec(summary).map_err(FarmError::persistence)?;
        let key = Self::tick_key(summary.simulation_id, summary.tick);
        let tree = self.ticks.clone();
        tokio::task::spawn_blocking(move || {
            tree.insert(key, value)
                .map(|_| ())
                .map_err(|e| FarmError::persistence(format!("Insert failed: {}", e)))
        })
        .await
        .map_err(FarmError::persistence)?
    }
}

/// In-memory store for tests and in-process runs.
#[derive(Default)]
pub struct MemoryStore {
    simulations: Mutex<HashMap<SimulationId, SimulationDescriptor>>,
    ticks: Mutex<BTreeMap<(SimulationId, u64), TickSummary>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn simulation(&self, id: SimulationId) -> Option<SimulationDescriptor> {
        self.simulations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn tick_summaries(&self, id: SimulationId) -> Vec<TickSummary> {
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .range((id, 0)..=(id, u64::MAX))
            .map(|(_, row)| row.clone())
            .collect()
    }
}

#[async_trait]
impl SimulationStore for MemoryStore {
    async fn upsert_simulation(&self, descriptor: &SimulationDescriptor) -> Result<(), FarmError> {
        self.simulations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor.id, descriptor.clone());
        Ok(())
    }

    async fn insert_tick_summary(&self, summary: &TickSummary) -> Result<(), FarmError> {
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((summary.simulation_id, summary.tick), summary.clone());
        Ok(())
    }
}

/// Best-effort front end to a [`SimulationStore`].
///
/// Descriptor writes go through one background writer so they land in the
/// order the registry produced them. Tick writes follow the configured
/// [`PersistPolicy`]. Either way, every write is bounded by `timeout`,
/// which is independent of any tick loop's cancellation.
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn SimulationStore>,
    timeout: Duration,
    policy: PersistPolicy,
    descriptors: mpsc::Sender<SimulationDescriptor>,
    failures: Arc<AtomicU64>,
}

impl Persistence {
    /// Starts the descriptor writer. Must be called within a Tokio runtime.
    pub fn spawn(
        store: Arc<dyn SimulationStore>,
        timeout: Duration,
        policy: PersistPolicy,
        descriptor_queue: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<SimulationDescriptor>(descriptor_queue.max(1));
        let failures = Arc::new(AtomicU64::new(0));

        let writer_store = Arc::clone(&store);
        let writer_failures = Arc::clone(&failures);
        tokio::spawn(async move {
            while let Some(descriptor) = rx.recv().await {
                let result =
                    tokio::time::timeout(timeout, writer_store.upsert_simulation(&descriptor)).await;
                report("descriptor", descriptor.id, result, timeout, &writer_failures);
            }
        });

        Self {
            store,
            timeout,
            policy,
            descriptors: tx,
            failures,
        }
    }

    /// Queues a descriptor upsert without waiting.
    pub fn record_descriptor(&self, descriptor: SimulationDescriptor) {
        if let Err(e) = self.descriptors.try_send(descriptor) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!("Dropping descriptor write: {}", e);
        }
    }

    /// Persists one tick summary according to the policy.
    pub async fn record_tick(&self, tick: &AggregatedTick) {
        let summary = TickSummary::from_tick(tick);
        match self.policy {
            PersistPolicy::Inline => self.write_summary(summary).await,
            PersistPolicy::Detached => {
                let this = self.clone();
                tokio::spawn(async move { this.write_summary(summary).await });
            }
        }
    }

    async fn write_summary(&self, summary: TickSummary) {
        let result = tokio::time::timeout(self.timeout, self.store.insert_tick_summary(&summary)).await;
        report("tick summary", summary.simulation_id, result, self.timeout, &self.failures);
    }

    /// Returns the policy in use.
    pub fn policy(&self) -> PersistPolicy {
        self.policy
    }

    /// Number of writes that failed, timed out or were dropped.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

fn report(
    what: &str,
    id: SimulationId,
    result: Result<Result<(), FarmError>, tokio::time::error::Elapsed>,
    timeout: Duration,
    failures: &AtomicU64,
) {
    match result {
        Ok(Ok(())) => debug!("simulation {}: persisted {}", id, what),
        Ok(Err(e)) => {
            failures.fetch_add(1, Ordering::Relaxed);
            warn!("simulation {}: failed to persist {}: {}", id, what, e);
        }
        Err(_) => {
            failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                "simulation {}: persisting {} timed out after {}ms",
                id,
                what,
                timeout.as_millis()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autofarm_env::{SimulationConfig, SimulationStatus};
    use std::time::Instant;

    fn descriptor(seed: u64, status: SimulationStatus) -> SimulationDescriptor {
        SimulationDescriptor {
            id: SimulationId::from_seed(seed),
            config: SimulationConfig::new("store", 2, 50, "patrol"),
            status,
            created_at_ms: 1,
            started_at_ms: None,
            ended_at_ms: None,
        }
    }

    fn tick(seed: u64, tick: u64) -> AggregatedTick {
        AggregatedTick {
            simulation_id: SimulationId::from_seed(seed),
            tick,
            entities: Vec::new(),
            avg_compute_ms: 0.5,
            worker_count: 1,
            completed_at_ms: 1000 + tick,
        }
    }

    /// Store that sleeps, then fails.
    struct SlowFailingStore {
        delay: Duration,
    }

    #[async_trait]
    impl SimulationStore for SlowFailingStore {
        async fn upsert_simulation(&self, _: &SimulationDescriptor) -> Result<(), FarmError> {
            tokio::time::sleep(self.delay).await;
            Err(FarmError::persistence("disk on fire"))
        }

        async fn insert_tick_summary(&self, _: &TickSummary) -> Result<(), FarmError> {
            tokio::time::sleep(self.delay).await;
            Err(FarmError::persistence("disk on fire"))
        }
    }

    #[tokio::test]
    async fn test_sled_store_roundtrip() {
        let store = SledStore::open_temp().unwrap();
        let mut d = descriptor(1, SimulationStatus::Created);
        store.upsert_simulation(&d).await.unwrap();
        d.status = SimulationStatus::Running;
        store.upsert_simulation(&d).await.unwrap();

        assert_eq!(store.load_simulation(d.id).unwrap(), Some(d.clone()));
        assert_eq!(store.load_simulation(SimulationId::from_seed(99)).unwrap(), None);

        for t in [3, 1, 2] {
            store.insert_tick_summary(&TickSummary::from_tick(&tick(1, t))).await.unwrap();
        }
        store.insert_tick_summary(&TickSummary::from_tick(&tick(2, 1))).await.unwrap();

        let ticks: Vec<u64> = store.tick_summaries(d.id).unwrap().iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_memory_store_orders_ticks() {
        let store = MemoryStore::new();
        for t in [2, 1] {
            store.insert_tick_summary(&TickSummary::from_tick(&tick(5, t))).await.unwrap();
        }
        let ticks: Vec<u64> = store
            .tick_summaries(SimulationId::from_seed(5))
            .iter()
            .map(|s| s.tick)
            .collect();
        assert_eq!(ticks, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_descriptor_writes_land_in_order() {
        let store = Arc::new(MemoryStore::new());
        let persistence = Persistence::spawn(store.clone(), Duration::from_secs(1), PersistPolicy::Inline, 16);

        persistence.record_descriptor(descriptor(1, SimulationStatus::Created));
        persistence.record_descriptor(descriptor(1, SimulationStatus::Running));
        persistence.record_descriptor(descriptor(1, SimulationStatus::Stopped));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stored = store.simulation(SimulationId::from_seed(1)).unwrap();
        assert_eq!(stored.status, SimulationStatus::Stopped);
        assert_eq!(persistence.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_inline_policy_is_bounded_by_timeout() {
        let store = Arc::new(SlowFailingStore { delay: Duration::from_secs(5) });
        let persistence = Persistence::spawn(store, Duration::from_millis(50), PersistPolicy::Inline, 4);

        let start = Instant::now();
        persistence.record_tick(&tick(1, 1)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(persistence.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_detached_policy_returns_immediately() {
        let store = Arc::new(SlowFailingStore { delay: Duration::from_millis(20) });
        let persistence = Persistence::spawn(store, Duration::from_secs(1), PersistPolicy::Detached, 4);

        let start = Instant::now();
        persistence.record_tick(&tick(1, 1)).await;
        assert!(start.elapsed() < Duration::from_millis(15));
        assert_eq!(persistence.failure_count(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(persistence.failure_count(), 1);
    }
}
