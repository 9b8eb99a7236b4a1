//! The simulation registry: lifecycle state machine plus loop supervision.
//!
//! # Locking
//!
//! One reader/writer lock guards `id -> (descriptor, runtime)`. Every
//! lifecycle operation is synchronous and holds the lock only for map
//! and state updates; nothing awaits under it. Each runtime's subscriber
//! set has its own lock inside [`SubscriberHub`], always taken innermost
//! (the hub is cloned out before subscribing).
//!
//! # State machine
//!
//! ```text
//! Start:  CREATED | PAUSED | FAILED -> RUNNING   (RUNNING: no-op)
//! Pause:  RUNNING -> PAUSED
//! Stop:   CREATED | RUNNING | PAUSED | FAILED -> STOPPED   (terminal: no-op)
//! loop failure: RUNNING -> FAILED
//! ```
//!
//! [`SubscriberHub`]: crate::hub::SubscriberHub

use crate::config::OrchestratorConfig;
use crate::error::FarmError;
use crate::hub::Subscription;
use crate::runtime::{LoopHandle, SimulationRuntime};
use crate::store::{Persistence, SimulationStore};
use crate::tick_loop::{LoopExit, TickLoop};

use async_trait::async_trait;
use autofarm_env::{
    EnvError, FarmContext, SimulationConfig, SimulationDescriptor, SimulationId,
    SimulationStatus, TickSource, TickStream, WorkerConnector,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

struct SimulationEntry {
    descriptor: SimulationDescriptor,
    runtime: SimulationRuntime,
}

struct Shared<C: FarmContext, W: WorkerConnector> {
    context: Arc<C>,
    connector: Arc<W>,
    config: OrchestratorConfig,
    persistence: Persistence,
    /// Seeded id generator; `None` draws ids from the OS
    ids: Option<Mutex<ChaCha8Rng>>,
    simulations: RwLock<HashMap<SimulationId, SimulationEntry>>,
}

/// Concurrency-safe registry of simulations.
///
/// Cheap to clone; every clone is the same registry. Generic over the clock
/// and the worker transport so the same code runs against a real node or an
/// in-process one.
pub struct SimulationRegistry<C: FarmContext, W: WorkerConnector> {
    shared: Arc<Shared<C, W>>,
}

impl<C: FarmContext, W: WorkerConnector> Clone for SimulationRegistry<C, W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: FarmContext, W: WorkerConnector> SimulationRegistry<C, W> {
    /// Creates an empty registry. Must be called within a Tokio runtime.
    ///
    /// A non-zero `context.seed()` seeds the id generator, so a seeded run
    /// reproduces its ids. Seed 0 means random v4 ids.
    pub fn new(
        context: Arc<C>,
        connector: Arc<W>,
        store: Arc<dyn SimulationStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let persistence = Persistence::spawn(
            store,
            config.persist_timeout,
            config.persist_policy,
            config.descriptor_queue,
        );
        let ids = match context.seed() {
            0 => None,
            seed => Some(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        };

        Self {
            shared: Arc::new(Shared {
                context,
                connector,
                config,
                persistence,
                ids,
                simulations: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers a new simulation in CREATED. No loop starts.
    pub fn create(&self, config: SimulationConfig) -> Result<SimulationDescriptor, FarmError> {
        if config.entity_count == 0 {
            return Err(FarmError::InvalidConfig(
                "entity count must be greater than 0".to_string(),
            ));
        }
        if config.tick_rate_ms == 0 {
            return Err(FarmError::InvalidConfig(
                "tick rate must be greater than 0".to_string(),
            ));
        }

        let mut simulations = self.shared.write();
        let id = loop {
            let id = self.shared.next_id();
            if !simulations.contains_key(&id) {
                break id;
            }
        };

        let descriptor = SimulationDescriptor {
            id,
            config,
            status: SimulationStatus::Created,
            created_at_ms: self.shared.context.timestamp_ms(),
            started_at_ms: None,
            ended_at_ms: None,
        };
        simulations.insert(
            id,
            SimulationEntry {
                descriptor: descriptor.clone(),
                runtime: SimulationRuntime::new(id, self.shared.config.subscriber_capacity),
            },
        );
        self.shared.persistence.record_descriptor(descriptor.clone());
        drop(simulations);

        info!(
            "simulation {}: created '{}' ({} entities, {}ms, scenario '{}')",
            id,
            descriptor.config.name,
            descriptor.config.entity_count,
            descriptor.config.tick_rate_ms,
            descriptor.config.scenario_type
        );
        Ok(descriptor)
    }

    /// Moves a simulation to RUNNING and launches its loop if none is active.
    pub fn start(&self, id: SimulationId) -> Result<SimulationDescriptor, FarmError> {
        let mut simulations = self.shared.write();
        let entry = simulations.get_mut(&id).ok_or_else(|| FarmError::not_found(id))?;

        match entry.descriptor.status {
            SimulationStatus::Running => return Ok(entry.descriptor.clone()),
            status if status.is_terminal() => {
                return Err(FarmError::InvalidTransition {
                    action: "start",
                    status,
                })
            }
            _ => {}
        }

        let now = self.shared.context.timestamp_ms();
        let descriptor = &mut entry.descriptor;
        descriptor.status = SimulationStatus::Running;
        if descriptor.started_at_ms.is_none() {
            descriptor.started_at_ms = Some(now.max(descriptor.created_at_ms));
        }

        if !entry.runtime.has_loop() {
            self.launch(id, entry);
        }

        let snapshot = entry.descriptor.clone();
        self.shared.persistence.record_descriptor(snapshot.clone());
        info!("simulation {}: running", id);
        Ok(snapshot)
    }

    /// Spawns the supervised loop task and records its handle.
    ///
    /// Called with the write lock held; the task cannot observe the entry
    /// until the lock is released.
    fn launch(&self, id: SimulationId, entry: &mut SimulationEntry) {
        let generation = entry.runtime.next_generation();
        let previous = entry.runtime.take_retiring();
        let tick_loop = TickLoop::new(
            id,
            entry.descriptor.config.clone(),
            entry.runtime.entity_ids(entry.descriptor.config.entity_count),
            Arc::clone(&self.shared.context),
            Arc::clone(&self.shared.connector),
            Arc::clone(entry.runtime.hub()),
            self.shared.persistence.clone(),
        );
        let (cancel, cancelled) = oneshot::channel();
        let registry = Arc::downgrade(&self.shared);

        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                debug!("simulation {}: waiting for previous loop to exit", id);
                let _ = previous.await;
            }
            let exit = tick_loop.run(cancelled).await;
            Shared::on_loop_exit(&registry, id, generation, exit);
        });

        entry.runtime.install(LoopHandle {
            generation,
            cancel,
            task,
        });
    }

    /// RUNNING -> PAUSED; cancels the loop. Resumable with [`start`](Self::start).
    pub fn pause(&self, id: SimulationId) -> Result<SimulationDescriptor, FarmError> {
        let mut simulations = self.shared.write();
        let entry = simulations.get_mut(&id).ok_or_else(|| FarmError::not_found(id))?;

        if entry.descriptor.status != SimulationStatus::Running {
            return Err(FarmError::InvalidTransition {
                action: "pause",
                status: entry.descriptor.status,
            });
        }

        entry.descriptor.status = SimulationStatus::Paused;
        entry.runtime.cancel();

        let snapshot = entry.descriptor.clone();
        self.shared.persistence.record_descriptor(snapshot.clone());
        info!("simulation {}: paused", id);
        Ok(snapshot)
    }

    /// Moves any non-terminal simulation to STOPPED; cancels an active loop.
    pub fn stop(&self, id: SimulationId) -> Result<SimulationDescriptor, FarmError> {
        let mut simulations = self.shared.write();
        let entry = simulations.get_mut(&id).ok_or_else(|| FarmError::not_found(id))?;

        if entry.descriptor.status.is_terminal() {
            return Ok(entry.descriptor.clone());
        }

        let now = self.shared.context.timestamp_ms();
        let descriptor = &mut entry.descriptor;
        let floor = descriptor.started_at_ms.unwrap_or(descriptor.created_at_ms);
        descriptor.status = SimulationStatus::Stopped;
        descriptor.ended_at_ms = Some(now.max(floor));
        entry.runtime.cancel();

        let snapshot = entry.descriptor.clone();
        self.shared.persistence.record_descriptor(snapshot.clone());
        info!("simulation {}: stopped", id);
        Ok(snapshot)
    }

    /// Returns a snapshot of one descriptor.
    pub fn get(&self, id: SimulationId) -> Result<SimulationDescriptor, FarmError> {
        self.shared
            .read()
            .get(&id)
            .map(|entry| entry.descriptor.clone())
            .ok_or_else(|| FarmError::not_found(id))
    }

    /// Returns every descriptor, oldest first.
    pub fn list(&self) -> Vec<SimulationDescriptor> {
        let mut all: Vec<SimulationDescriptor> = self
            .shared
            .read()
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect();
        all.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then(a.id.cmp(&b.id)));
        all
    }

    /// Attaches a subscriber to a simulation's tick stream.
    ///
    /// Works in any status; a simulation that is not running simply
    /// delivers nothing until it runs.
    pub fn subscribe(&self, id: SimulationId) -> Result<Subscription, FarmError> {
        let hub = self
            .shared
            .read()
            .get(&id)
            .map(|entry| Arc::clone(entry.runtime.hub()))
            .ok_or_else(|| FarmError::not_found(id))?;
        Ok(hub.subscribe())
    }

    /// True while a loop handle is recorded for the simulation.
    pub fn loop_active(&self, id: SimulationId) -> Result<bool, FarmError> {
        self.shared
            .read()
            .get(&id)
            .map(|entry| entry.runtime.has_loop())
            .ok_or_else(|| FarmError::not_found(id))
    }

    /// Ticks dropped across all subscribers of one simulation.
    pub fn dropped_ticks(&self, id: SimulationId) -> Result<u64, FarmError> {
        self.shared
            .read()
            .get(&id)
            .map(|entry| entry.runtime.hub().dropped_total())
            .ok_or_else(|| FarmError::not_found(id))
    }

    /// Persistence writes that failed, timed out or were dropped.
    pub fn persistence_failures(&self) -> u64 {
        self.shared.persistence.failure_count()
    }

    /// Number of registered simulations.
    pub fn len(&self) -> usize {
        self.shared.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every loop and waits for all of them to exit.
    ///
    /// Statuses are left as they are; this is for process shutdown.
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = self
            .shared
            .write()
            .values_mut()
            .flat_map(|entry| entry.runtime.drain_tasks())
            .collect();

        info!("Shutting down registry ({} loops)", tasks.len());
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl<C: FarmContext, W: WorkerConnector> Shared<C, W> {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<SimulationId, SimulationEntry>> {
        self.simulations.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SimulationId, SimulationEntry>> {
        self.simulations.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> SimulationId {
        match &self.ids {
            Some(ids) => {
                let mut rng = ids.lock().unwrap_or_else(PoisonError::into_inner);
                SimulationId::from_random_bytes(rng.gen())
            }
            None => SimulationId::new(),
        }
    }

    /// Bookkeeping when a loop task finishes on its own or after cancel.
    ///
    /// Only the loop that still owns the handle may change the entry, so a
    /// late exit of a replaced loop is ignored.
    fn on_loop_exit(this: &Weak<Self>, id: SimulationId, generation: u64, exit: LoopExit) {
        let Some(shared) = this.upgrade() else {
            return;
        };
        let mut simulations = shared.write();
        let Some(entry) = simulations.get_mut(&id) else {
            return;
        };
        if !entry.runtime.clear_if_current(generation) {
            return;
        }

        if let LoopExit::Failed(e) = exit {
            if entry.descriptor.status == SimulationStatus::Running {
                entry.descriptor.status = SimulationStatus::Failed;
                shared.persistence.record_descriptor(entry.descriptor.clone());
                warn!("simulation {}: marked FAILED: {}", id, e);
            }
        }
    }
}

#[async_trait]
impl<C: FarmContext, W: WorkerConnector> TickSource for SimulationRegistry<C, W> {
    async fn open(&self, simulation_id: SimulationId) -> Result<Box<dyn TickStream>, EnvError> {
        match self.subscribe(simulation_id) {
            Ok(subscription) => Ok(Box::new(subscription)),
            Err(FarmError::NotFound(_)) => Err(EnvError::not_found(simulation_id)),
            Err(e) => Err(EnvError::network(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::worker::{InProcessConnector, WorkerNode};
    use autofarm_env::{EntityStatus, TokioContext, WorkerExchange};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Registry = SimulationRegistry<TokioContext, CountingConnector>;

    /// In-process worker that tracks how many exchanges are open at once.
    struct CountingConnector {
        inner: InProcessConnector,
        open: Arc<AtomicUsize>,
        max_open: Arc<AtomicUsize>,
        refuse: bool,
    }

    impl CountingConnector {
        fn new(refuse: bool) -> Self {
            Self {
                inner: InProcessConnector::new(WorkerNode::shared(7)),
                open: Arc::new(AtomicUsize::new(0)),
                max_open: Arc::new(AtomicUsize::new(0)),
                refuse,
            }
        }
    }

    struct CountingExchange {
        inner: Box<dyn WorkerExchange>,
        open: Arc<AtomicUsize>,
    }

    impl Drop for CountingExchange {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl WorkerConnector for CountingConnector {
        async fn connect(&self) -> Result<Box<dyn WorkerExchange>, EnvError> {
            if self.refuse {
                return Err(EnvError::network("connection refused"));
            }
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(CountingExchange {
                inner: self.inner.connect().await?,
                open: Arc::clone(&self.open),
            }))
        }

        fn address(&self) -> String {
            "counting".to_string()
        }
    }

    #[async_trait]
    impl WorkerExchange for CountingExchange {
        async fn send(&mut self, request: autofarm_env::StepRequest) -> Result<(), EnvError> {
            self.inner.send(request).await
        }

        async fn recv(&mut self) -> Result<autofarm_env::StepResponse, EnvError> {
            self.inner.recv().await
        }
    }

    fn registry_with(connector: CountingConnector, store: Arc<MemoryStore>) -> Registry {
        SimulationRegistry::new(
            TokioContext::shared(),
            Arc::new(connector),
            store,
            OrchestratorConfig::default(),
        )
    }

    fn registry() -> Registry {
        registry_with(CountingConnector::new(false), Arc::new(MemoryStore::new()))
    }

    fn config(entities: u32, tick_rate_ms: u32) -> SimulationConfig {
        SimulationConfig::new("test", entities, tick_rate_ms, "patrol")
    }

    async fn wait_for_status(registry: &Registry, id: SimulationId, status: SimulationStatus) {
        for _ in 0..100 {
            if registry.get(id).unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("simulation never reached {}", status);
    }

    #[tokio::test]
    async fn test_create_validates_config() {
        let registry = registry();
        assert!(matches!(registry.create(config(0, 100)), Err(FarmError::InvalidConfig(_))));
        assert!(matches!(registry.create(config(3, 0)), Err(FarmError::InvalidConfig(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_create_assigns_unique_ids() {
        let registry = registry();
        let mut ids = HashSet::new();
        for _ in 0..200 {
            let d = registry.create(config(1, 100)).unwrap();
            assert_eq!(d.status, SimulationStatus::Created);
            assert!(d.started_at_ms.is_none());
            assert!(ids.insert(d.id));
            assert!(!registry.loop_active(d.id).unwrap());
        }
        assert_eq!(registry.list().len(), 200);
    }

    #[tokio::test]
    async fn test_seeded_registries_reproduce_ids() {
        let a = SimulationRegistry::new(
            Arc::new(TokioContext::with_seed(5)),
            Arc::new(CountingConnector::new(false)),
            Arc::new(MemoryStore::new()),
            OrchestratorConfig::default(),
        );
        let b = SimulationRegistry::new(
            Arc::new(TokioContext::with_seed(5)),
            Arc::new(CountingConnector::new(false)),
            Arc::new(MemoryStore::new()),
            OrchestratorConfig::default(),
        );
        assert_eq!(a.create(config(1, 10)).unwrap().id, b.create(config(1, 10)).unwrap().id);
    }

    #[tokio::test]
    async fn test_start_streams_ticks_from_one() {
        let registry = registry();
        let id = registry.create(config(3, 10)).unwrap().id;
        let mut sub = registry.subscribe(id).unwrap();

        let d = registry.start(id).unwrap();
        assert_eq!(d.status, SimulationStatus::Running);
        assert!(d.started_at_ms.unwrap() >= d.created_at_ms);
        assert!(registry.loop_active(id).unwrap());

        for expected in 1..=5 {
            let tick = sub.recv().await.unwrap();
            assert_eq!(tick.tick, expected);
            assert_eq!(tick.simulation_id, id);
            assert_eq!(tick.entities.len(), 3);
        }
        registry.stop(id).unwrap();
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let connector = CountingConnector::new(false);
        let max_open = Arc::clone(&connector.max_open);
        let registry = registry_with(connector, Arc::new(MemoryStore::new()));
        let id = registry.create(config(2, 5)).unwrap().id;

        let first = registry.start(id).unwrap();
        for _ in 0..10 {
            let again = registry.start(id).unwrap();
            assert_eq!(again, first);
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(max_open.load(Ordering::SeqCst), 1);
        registry.stop(id).unwrap();
    }

    #[tokio::test]
    async fn test_rapid_pause_start_never_overlaps_exchanges() {
        let connector = CountingConnector::new(false);
        let max_open = Arc::clone(&connector.max_open);
        let open = Arc::clone(&connector.open);
        let registry = registry_with(connector, Arc::new(MemoryStore::new()));
        let id = registry.create(config(2, 1)).unwrap().id;

        for _ in 0..50 {
            registry.start(id).unwrap();
            tokio::task::yield_now().await;
            registry.pause(id).unwrap();
        }
        registry.start(id).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(max_open.load(Ordering::SeqCst), 1);
        registry.shutdown().await;
        assert_eq!(open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pause_stops_broadcasts() {
        let registry = registry();
        let id = registry.create(config(1, 10)).unwrap().id;
        let mut sub = registry.subscribe(id).unwrap();
        registry.start(id).unwrap();
        sub.recv().await.unwrap();

        let d = registry.pause(id).unwrap();
        assert_eq!(d.status, SimulationStatus::Paused);
        assert!(!registry.loop_active(id).unwrap());

        // Allow one in-flight tick, then silence.
        tokio::time::sleep(Duration::from_millis(15)).await;
        while sub.try_recv().is_some() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_resume_restarts_tick_numbering_and_keeps_batteries() {
        let registry = registry();
        let id = registry.create(config(1, 5)).unwrap().id;
        let mut sub = registry.subscribe(id).unwrap();

        registry.start(id).unwrap();
        let mut last = None;
        for _ in 0..3 {
            last = sub.recv().await;
        }
        registry.pause(id).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        while let Some(t) = sub.try_recv() {
            last = Some(t);
        }
        let battery_before = last.unwrap().entities[0].battery;

        registry.start(id).unwrap();
        let resumed = sub.recv().await.unwrap();
        assert_eq!(resumed.tick, 1);
        assert!(resumed.entities[0].battery < battery_before);
        registry.stop(id).unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let registry = registry();
        let id = registry.create(config(1, 10)).unwrap().id;
        registry.start(id).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let stopped = registry.stop(id).unwrap();
        assert_eq!(stopped.status, SimulationStatus::Stopped);
        assert!(stopped.ended_at_ms.unwrap() >= stopped.started_at_ms.unwrap());
        assert!(!registry.loop_active(id).unwrap());

        assert_eq!(registry.stop(id).unwrap(), stopped);
        assert!(matches!(
            registry.start(id),
            Err(FarmError::InvalidTransition { status: SimulationStatus::Stopped, .. })
        ));
        assert!(matches!(
            registry.pause(id),
            Err(FarmError::InvalidTransition { status: SimulationStatus::Stopped, .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_from_created_and_paused() {
        let registry = registry();
        let created = registry.create(config(1, 10)).unwrap().id;
        let d = registry.stop(created).unwrap();
        assert_eq!(d.status, SimulationStatus::Stopped);
        assert!(d.ended_at_ms.unwrap() >= d.created_at_ms);

        let paused = registry.create(config(1, 10)).unwrap().id;
        registry.start(paused).unwrap();
        registry.pause(paused).unwrap();
        assert_eq!(registry.stop(paused).unwrap().status, SimulationStatus::Stopped);
    }

    #[tokio::test]
    async fn test_pause_requires_running() {
        let registry = registry();
        let id = registry.create(config(1, 10)).unwrap().id;
        let err = registry.pause(id).unwrap_err();
        assert_eq!(err.to_string(), "Cannot pause simulation in status CREATED");
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let registry = registry();
        let id = SimulationId::new();
        assert!(matches!(registry.get(id), Err(FarmError::NotFound(_))));
        assert!(matches!(registry.start(id), Err(FarmError::NotFound(_))));
        assert!(matches!(registry.pause(id), Err(FarmError::NotFound(_))));
        assert!(matches!(registry.stop(id), Err(FarmError::NotFound(_))));
        assert!(matches!(registry.subscribe(id), Err(FarmError::NotFound(_))));
        assert!(matches!(registry.open(id).await, Err(EnvError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_worker_failure_marks_failed_and_allows_restart() {
        let registry = registry_with(CountingConnector::new(true), Arc::new(MemoryStore::new()));
        let id = registry.create(config(1, 10)).unwrap().id;

        registry.start(id).unwrap();
        wait_for_status(&registry, id, SimulationStatus::Failed).await;
        assert!(!registry.loop_active(id).unwrap());
        assert!(matches!(registry.pause(id), Err(FarmError::InvalidTransition { .. })));

        assert_eq!(registry.start(id).unwrap().status, SimulationStatus::Running);
        wait_for_status(&registry, id, SimulationStatus::Failed).await;
        assert_eq!(registry.stop(id).unwrap().status, SimulationStatus::Stopped);
    }

    #[tokio::test]
    async fn test_lifecycle_is_persisted() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(CountingConnector::new(false), store.clone());
        let id = registry.create(config(2, 5)).unwrap().id;
        let mut sub = registry.subscribe(id).unwrap();
        registry.start(id).unwrap();
        sub.recv().await.unwrap();
        sub.recv().await.unwrap();
        registry.stop(id).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.simulation(id).unwrap().status, SimulationStatus::Stopped);
        let summaries = store.tick_summaries(id);
        assert!(summaries.len() >= 2);
        assert_eq!(summaries[0].entity_count, 2);
        assert_eq!(registry.persistence_failures(), 0);
    }

    #[tokio::test]
    async fn test_never_reading_subscriber_does_not_stall_reader() {
        let registry = registry();
        let id = registry.create(config(1, 1)).unwrap().id;
        let _stalled = registry.subscribe(id).unwrap();
        let mut reader = registry.subscribe(id).unwrap();
        registry.start(id).unwrap();

        let mut previous = 0;
        for _ in 0..(crate::config::DEFAULT_SUBSCRIBER_CAPACITY + 20) {
            let tick = reader.recv().await.unwrap();
            assert_eq!(tick.tick, previous + 1);
            previous = tick.tick;
            assert_eq!(tick.entities[0].status, EntityStatus::Active);
        }
        assert!(registry.dropped_ticks(id).unwrap() > 0);
        assert_eq!(reader.dropped(), 0);
        registry.stop(id).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_loops() {
        let connector = CountingConnector::new(false);
        let open = Arc::clone(&connector.open);
        let registry = registry_with(connector, Arc::new(MemoryStore::new()));
        for _ in 0..3 {
            let id = registry.create(config(1, 5)).unwrap().id;
            registry.start(id).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.shutdown().await;
        assert_eq!(open.load(Ordering::SeqCst), 0);
    }
}
