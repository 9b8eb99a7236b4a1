//! Worker-side step execution.
//!
//! [`WorkerNode`] owns the entity state of every simulation it has seen and
//! answers one [`StepRequest`] at a time. The node process serves it over a
//! socket; [`InProcessConnector`] serves it to a tick loop in the same process.

use crate::entity::EntitySimulator;

use async_trait::async_trait;
use autofarm_env::{
    EntityState, EnvError, SimulationId, StepRequest, StepResponse, WorkerConnector,
    WorkerExchange,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Entity state holder for all simulations served by one worker.
pub struct WorkerNode {
    /// Master seed for entity initialization
    seed: u64,

    /// Update rule
    simulator: EntitySimulator,

    /// simulation id -> entity id -> latest state
    states: Mutex<HashMap<SimulationId, HashMap<u64, EntityState>>>,
}

impl WorkerNode {
    /// Creates a worker with the default simulator.
    pub fn new(seed: u64) -> Self {
        Self::with_simulator(seed, EntitySimulator::new())
    }

    /// Creates a worker with a custom simulator.
    pub fn with_simulator(seed: u64, simulator: EntitySimulator) -> Self {
        Self {
            seed,
            simulator,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an Arc-wrapped worker for sharing across connections.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Returns the worker's seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Advances every requested entity by one step.
    ///
    /// Entities seen for the first time are spawned from a seed derived from
    /// (worker seed, simulation id, entity id), so a replay with the same
    /// seed reproduces the same trajectories.
    pub fn step(&self, request: &StepRequest) -> StepResponse {
        let start = Instant::now();

        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let simulation = states.entry(request.simulation_id).or_default();

        let mut updated = Vec::with_capacity(request.entity_ids.len());
        for &entity_id in &request.entity_ids {
            let current = simulation.entry(entity_id).or_insert_with(|| {
                let mut rng = ChaCha8Rng::seed_from_u64(entity_seed(
                    self.seed,
                    request.simulation_id,
                    entity_id,
                ));
                self.simulator.spawn(entity_id, &mut rng)
            });
            *current = self.simulator.advance(current);
            updated.push(current.clone());
        }
        drop(states);

        StepResponse {
            simulation_id: request.simulation_id,
            tick: request.tick,
            entities: updated,
            compute_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Returns the number of entities tracked for a simulation.
    pub fn entity_count(&self, simulation_id: SimulationId) -> usize {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.get(&simulation_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Returns the number of simulations this worker holds state for.
    pub fn simulation_count(&self) -> usize {
        self.states.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn entity_seed(seed: u64, simulation_id: SimulationId, entity_id: u64) -> u64 {
    let uuid = simulation_id.as_uuid().as_u128();
    let folded = (uuid as u64) ^ ((uuid >> 64) as u64);
    seed.wrapping_mul(0x9e3779b97f4a7c15) ^ folded ^ entity_id.wrapping_mul(0x517cc1b727220a95)
}

/// Connects tick loops to a [`WorkerNode`] in the same process.
pub struct InProcessConnector {
    node: Arc<WorkerNode>,
}

impl InProcessConnector {
    pub fn new(node: Arc<WorkerNode>) -> Self {
        Self { node }
    }

    /// Returns the node behind this connector.
    pub fn node(&self) -> &Arc<WorkerNode> {
        &self.node
    }
}

#[async_trait]
impl WorkerConnector for InProcessConnector {
    async fn connect(&self) -> Result<Box<dyn WorkerExchange>, EnvError> {
        Ok(Box::new(InProcessExchange {
            node: Arc::clone(&self.node),
            pending: VecDeque::new(),
        }))
    }

    fn address(&self) -> String {
        "in-process".to_string()
    }
}

struct InProcessExchange {
    node: Arc<WorkerNode>,
    pending: VecDeque<StepResponse>,
}

#[async_trait]
impl WorkerExchange for InProcessExchange {
    async fn send(&mut self, request: StepRequest) -> Result<(), EnvError> {
        let response = self.node.step(&request);
        self.pending.push_back(response);
        Ok(())
    }

    async fn recv(&mut self) -> Result<StepResponse, EnvError> {
        self.pending
            .pop_front()
            .ok_or_else(|| EnvError::closed("no request in flight"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autofarm_env::SimulationConfig;

    fn request(simulation_id: SimulationId, tick: u64, count: u64) -> StepRequest {
        StepRequest {
            simulation_id,
            tick,
            entity_ids: (1..=count).collect(),
            partition_index: 0,
            partition_total: 1,
            config: SimulationConfig::new("test", count as u32, 100, "patrol"),
        }
    }

    #[test]
    fn test_step_echoes_tick_and_entities() {
        let node = WorkerNode::new(42);
        let id = SimulationId::from_seed(1);
        let response = node.step(&request(id, 7, 3));

        assert_eq!(response.simulation_id, id);
        assert_eq!(response.tick, 7);
        let ids: Vec<u64> = response.entities.iter().map(|e| e.entity_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(response.compute_ms >= 0.0);
        assert_eq!(node.entity_count(id), 3);
    }

    #[test]
    fn test_state_carries_across_steps() {
        let node = WorkerNode::new(42);
        let id = SimulationId::from_seed(1);
        let first = node.step(&request(id, 1, 2));
        let second = node.step(&request(id, 2, 2));

        for (a, b) in first.entities.iter().zip(second.entities.iter()) {
            assert!(b.battery < a.battery);
        }
    }

    #[test]
    fn test_same_seed_same_trajectory() {
        let id = SimulationId::from_seed(3);
        let a = WorkerNode::new(9).step(&request(id, 1, 4));
        let b = WorkerNode::new(9).step(&request(id, 1, 4));
        let c = WorkerNode::new(10).step(&request(id, 1, 4));

        assert_eq!(a.entities, b.entities);
        assert_ne!(a.entities, c.entities);
    }

    #[test]
    fn test_simulations_are_isolated() {
        let node = WorkerNode::new(1);
        node.step(&request(SimulationId::from_seed(1), 1, 2));
        node.step(&request(SimulationId::from_seed(2), 1, 5));
        assert_eq!(node.simulation_count(), 2);
        assert_eq!(node.entity_count(SimulationId::from_seed(2)), 5);
    }

    #[tokio::test]
    async fn test_in_process_exchange_matches_by_order() {
        let connector = InProcessConnector::new(WorkerNode::shared(5));
        let mut exchange = connector.connect().await.unwrap();
        let id = SimulationId::from_seed(4);

        assert!(exchange.recv().await.is_err());

        exchange.send(request(id, 1, 1)).await.unwrap();
        assert_eq!(exchange.recv().await.unwrap().tick, 1);
        exchange.send(request(id, 2, 1)).await.unwrap();
        assert_eq!(exchange.recv().await.unwrap().tick, 2);
    }
}
