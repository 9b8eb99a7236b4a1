//! Mutable per-simulation state that never leaves the registry.

use crate::hub::SubscriberHub;

use autofarm_env::SimulationId;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handle on the tick loop currently executing for a simulation.
pub(crate) struct LoopHandle {
    /// Distinguishes this loop from earlier ones of the same simulation
    pub generation: u64,

    /// Fires (or drops) to cancel the loop between ticks
    pub cancel: oneshot::Sender<()>,

    /// The supervising task
    pub task: JoinHandle<()>,
}

/// Runtime half of a registry entry.
///
/// At most one [`LoopHandle`] is active. A cancelled loop is kept as
/// `retiring` until the next loop takes it over and waits for it, so two
/// loops never exchange with a worker for the same simulation at once.
pub struct SimulationRuntime {
    /// `1..=entity_count`, assigned on first start
    entity_ids: Option<Arc<Vec<u64>>>,

    hub: Arc<SubscriberHub>,
    active: Option<LoopHandle>,
    retiring: Option<JoinHandle<()>>,
    generations: u64,
}

impl SimulationRuntime {
    pub fn new(simulation_id: SimulationId, subscriber_capacity: usize) -> Self {
        Self {
            entity_ids: None,
            hub: SubscriberHub::new(simulation_id, subscriber_capacity),
            active: None,
            retiring: None,
            generations: 0,
        }
    }

    /// Returns the entity id list, assigning `1..=entity_count` on first use.
    pub fn entity_ids(&mut self, entity_count: u32) -> Arc<Vec<u64>> {
        Arc::clone(
            self.entity_ids
                .get_or_insert_with(|| Arc::new((1..=entity_count as u64).collect())),
        )
    }

    /// Entity ids, if the simulation ever ran.
    pub fn assigned_entity_ids(&self) -> Option<&[u64]> {
        self.entity_ids.as_deref().map(Vec::as_slice)
    }

    pub fn hub(&self) -> &Arc<SubscriberHub> {
        &self.hub
    }

    /// True while a loop handle is recorded.
    pub fn has_loop(&self) -> bool {
        self.active.is_some()
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.generations += 1;
        self.generations
    }

    pub(crate) fn install(&mut self, handle: LoopHandle) {
        debug_assert!(self.active.is_none());
        self.active = Some(handle);
    }

    /// Hands the previously cancelled loop to whoever starts the next one.
    pub(crate) fn take_retiring(&mut self) -> Option<JoinHandle<()>> {
        self.retiring.take()
    }

    /// Signals the active loop to stop and clears the handle.
    ///
    /// Returns false if no loop was active.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(handle) => {
                // The loop may already be on its way out; a closed receiver is fine.
                let _ = handle.cancel.send(());
                self.retiring = Some(handle.task);
                true
            }
            None => false,
        }
    }

    /// Clears the handle if it still belongs to `generation`.
    pub(crate) fn clear_if_current(&mut self, generation: u64) -> bool {
        match &self.active {
            Some(handle) if handle.generation == generation => {
                self.active = None;
                true
            }
            _ => false,
        }
    }

    /// Cancels the active loop and returns every task still to be awaited.
    pub(crate) fn drain_tasks(&mut self) -> Vec<JoinHandle<()>> {
        self.cancel();
        self.retiring.take().into_iter().collect()
    }
}
