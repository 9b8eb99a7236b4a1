//! The per-simulation loop that drives a worker exchange.
//!
//! # Protocol
//!
//! ```text
//! every tick_rate_ms:
//!   tick += 1
//!   send StepRequest { tick, entity_ids, partition 0/1 }
//!   recv StepResponse for that tick       (one request in flight, ever)
//!   persist TickSummary                   (bounded, never fatal)
//!   broadcast AggregatedTick to the hub   (never blocks)
//! ```
//!
//! The counter starts at 1 for every loop instance, so a resumed simulation
//! numbers its ticks from 1 again. Any exchange error ends the loop; there
//! is no reconnect. Cancellation is checked between ticks only, so a step
//! already sent is received, persisted and broadcast before the loop exits.

use crate::error::FarmError;
use crate::hub::SubscriberHub;
use crate::store::Persistence;

use autofarm_env::{
    AggregatedTick, EnvError, FarmContext, SimulationConfig, SimulationId, StepRequest,
    WorkerConnector, WorkerExchange,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Why a loop returned.
#[derive(Debug)]
pub enum LoopExit {
    /// The registry cancelled it (Pause, Stop or shutdown)
    Cancelled,

    /// The worker exchange failed
    Failed(FarmError),
}

/// One running simulation's driver.
pub struct TickLoop<C: FarmContext, W: WorkerConnector> {
    simulation_id: SimulationId,
    config: SimulationConfig,
    entity_ids: Arc<Vec<u64>>,
    context: Arc<C>,
    connector: Arc<W>,
    hub: Arc<SubscriberHub>,
    persistence: Persistence,
}

impl<C: FarmContext, W: WorkerConnector> TickLoop<C, W> {
    pub fn new(
        simulation_id: SimulationId,
        config: SimulationConfig,
        entity_ids: Arc<Vec<u64>>,
        context: Arc<C>,
        connector: Arc<W>,
        hub: Arc<SubscriberHub>,
        persistence: Persistence,
    ) -> Self {
        Self {
            simulation_id,
            config,
            entity_ids,
            context,
            connector,
            hub,
            persistence,
        }
    }

    /// Runs until `cancel` fires (or its sender is dropped) or the exchange fails.
    pub async fn run(self, mut cancel: oneshot::Receiver<()>) -> LoopExit {
        let id = self.simulation_id;
        info!(
            "simulation {}: tick loop starting ({} entities every {}ms, worker {})",
            id,
            self.entity_ids.len(),
            self.config.tick_rate_ms,
            self.connector.address()
        );

        let mut exchange = tokio::select! {
            biased;
            _ = &mut cancel => {
                info!("simulation {}: tick loop cancelled before connecting", id);
                return LoopExit::Cancelled;
            }
            connected = self.connector.connect() => match connected {
                Ok(exchange) => exchange,
                Err(e) => {
                    warn!("simulation {}: worker unavailable: {}", id, e);
                    return LoopExit::Failed(e.into());
                }
            },
        };

        let mut interval = tokio::time::interval(self.config.tick_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => {
                    info!("simulation {}: tick loop cancelled after {} ticks", id, tick);
                    return LoopExit::Cancelled;
                }
                _ = interval.tick() => {}
            }

            // Cancel is only observed above; an exchange in flight completes.
            tick += 1;
            let aggregated = match self.step(exchange.as_mut(), tick).await {
                Ok(aggregated) => aggregated,
                Err(e) => {
                    warn!("simulation {}: tick {} failed, loop terminating: {}", id, tick, e);
                    return LoopExit::Failed(e);
                }
            };

            self.persistence.record_tick(&aggregated).await;
            let report = self.hub.broadcast(Arc::new(aggregated));
            debug!(
                "simulation {}: tick {} delivered to {} subscribers ({} full)",
                id, tick, report.delivered, report.dropped
            );
        }
    }

    async fn step(
        &self,
        exchange: &mut dyn WorkerExchange,
        tick: u64,
    ) -> Result<AggregatedTick, FarmError> {
        let request = StepRequest {
            simulation_id: self.simulation_id,
            tick,
            entity_ids: self.entity_ids.as_ref().clone(),
            partition_index: 0,
            partition_total: 1,
            config: self.config.clone(),
        };
        exchange.send(request).await?;
        let response = exchange.recv().await?;

        if response.simulation_id != self.simulation_id || response.tick != tick {
            return Err(EnvError::network(format!(
                "expected response for tick {} of {}, got tick {} of {}",
                tick, self.simulation_id, response.tick, response.simulation_id
            ))
            .into());
        }

        Ok(AggregatedTick {
            simulation_id: self.simulation_id,
            tick,
            entities: response.entities,
            avg_compute_ms: response.compute_ms,
            worker_count: 1,
            completed_at_ms: self.context.timestamp_ms(),
        })
    }
}
