//! A complete farm in one process: registry, local worker, memory store.

use crate::context::SimContext;
use crate::worker::{LocalWorker, LocalWorkerController};

use autofarm_core::{
    EntitySimulator, MemoryStore, OrchestratorConfig, SimulationRegistry, Subscription, WorkerNode,
};
use autofarm_env::{AggregatedTick, SimulationId, SimulationStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Registry type used by the harness.
pub type SimRegistry = SimulationRegistry<SimContext, LocalWorker>;

/// Everything a scenario needs, wired together.
pub struct SimFarm {
    pub context: Arc<SimContext>,
    pub store: Arc<MemoryStore>,
    pub worker: LocalWorkerController,
    pub registry: SimRegistry,
}

impl SimFarm {
    /// Builds a farm with the default entity simulator. Must be called
    /// within a Tokio runtime.
    pub fn new(seed: u64) -> Self {
        Self::with_parts(seed, EntitySimulator::new(), OrchestratorConfig::default())
    }

    /// Builds a farm with a custom simulator and registry config.
    pub fn with_parts(seed: u64, simulator: EntitySimulator, config: OrchestratorConfig) -> Self {
        let context = SimContext::shared(seed);
        let node = Arc::new(WorkerNode::with_simulator(seed, simulator));
        let (worker, controller) = LocalWorker::new(node);
        let store = Arc::new(MemoryStore::new());
        let registry = SimulationRegistry::new(
            Arc::clone(&context),
            Arc::new(worker),
            store.clone(),
            config,
        );

        Self {
            context,
            store,
            worker: controller,
            registry,
        }
    }

    /// Polls until the simulation reaches `status` or `limit` passes.
    pub async fn wait_for_status(
        &self,
        id: SimulationId,
        status: SimulationStatus,
        limit: Duration,
    ) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            match self.registry.get(id) {
                Ok(descriptor) if descriptor.status == status => return true,
                Ok(_) => tokio::time::sleep(Duration::from_millis(5)).await,
                Err(_) => return false,
            }
        }
        false
    }

    /// Cancels every loop and waits for them.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

/// Collects every tick that arrives within `window`.
pub async fn collect_for(subscription: &mut Subscription, window: Duration) -> Vec<Arc<AggregatedTick>> {
    let deadline = Instant::now() + window;
    let mut ticks = Vec::new();
    while let Ok(Some(tick)) = tokio::time::timeout_at(deadline, subscription.recv()).await {
        ticks.push(tick);
    }
    ticks
}

/// Collects `count` ticks, giving up after `limit`.
pub async fn collect_n(
    subscription: &mut Subscription,
    count: usize,
    limit: Duration,
) -> Vec<Arc<AggregatedTick>> {
    let deadline = Instant::now() + limit;
    let mut ticks = Vec::with_capacity(count);
    while ticks.len() < count {
        match tokio::time::timeout_at(deadline, subscription.recv()).await {
            Ok(Some(tick)) => ticks.push(tick),
            _ => break,
        }
    }
    ticks
}

/// Takes whatever is already buffered.
pub fn drain_buffered(subscription: &mut Subscription) -> Vec<Arc<AggregatedTick>> {
    std::iter::from_fn(|| subscription.try_recv()).collect()
}
