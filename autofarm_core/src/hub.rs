//! Per-simulation fan-out of aggregated ticks.
//!
//! # Drop policy
//!
//! Every subscriber owns a bounded buffer of `capacity` ticks. Broadcast
//! never waits: when a subscriber's buffer is full the *newest* tick is
//! dropped for that subscriber only and its drop counter is bumped. A
//! subscriber that keeps up therefore sees every tick in order, and one that
//! falls behind sees an ordered subsequence with gaps, never a duplicate.
//!
//! The subscriber set has its own lock, independent of the registry lock,
//! and is always the innermost lock taken.

use autofarm_env::{AggregatedTick, EnvError, SimulationId, TickStream};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

struct SubscriberSlot {
    tx: mpsc::Sender<Arc<AggregatedTick>>,
    dropped: Arc<AtomicU64>,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that got the tick
    pub delivered: usize,

    /// Subscribers whose buffer was full
    pub dropped: usize,

    /// Subscribers found closed and removed
    pub closed: usize,
}

/// Bounded multi-consumer broadcast for one simulation.
pub struct SubscriberHub {
    simulation_id: SimulationId,
    capacity: usize,
    subscribers: Mutex<HashMap<u64, SubscriberSlot>>,
    next_id: AtomicU64,
    dropped_total: AtomicU64,
}

impl SubscriberHub {
    /// Creates a hub whose subscriptions buffer `capacity` ticks each.
    pub fn new(simulation_id: SimulationId, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            simulation_id,
            capacity: capacity.max(1),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
        })
    }

    /// Attaches a new subscriber.
    ///
    /// The subscription detaches itself when dropped.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        self.lock().insert(
            id,
            SubscriberSlot {
                tx,
                dropped: Arc::clone(&dropped),
            },
        );
        debug!("simulation {}: subscriber {} attached", self.simulation_id, id);

        Subscription {
            id,
            simulation_id: self.simulation_id,
            rx,
            dropped,
            hub: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        if self.lock().remove(&id).is_some() {
            debug!("simulation {}: subscriber {} detached", self.simulation_id, id);
        }
    }

    /// Offers a tick to every subscriber without blocking.
    pub fn broadcast(&self, tick: Arc<AggregatedTick>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut subscribers = self.lock();

        subscribers.retain(|id, slot| match slot.tx.try_send(Arc::clone(&tick)) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                report.dropped += 1;
                let dropped = slot.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "simulation {}: subscriber {} full, dropped tick {} ({} dropped so far)",
                    self.simulation_id, id, tick.tick, dropped
                );
                true
            }
            Err(TrySendError::Closed(_)) => {
                report.closed += 1;
                false
            }
        });
        drop(subscribers);

        if report.dropped > 0 {
            self.dropped_total
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
        }
        report
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Ticks dropped across all subscribers since creation.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Per-subscription buffer size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, SubscriberSlot>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving end of one subscriber.
pub struct Subscription {
    id: u64,
    simulation_id: SimulationId,
    rx: mpsc::Receiver<Arc<AggregatedTick>>,
    dropped: Arc<AtomicU64>,
    hub: Weak<SubscriberHub>,
}

impl Subscription {
    /// Waits for the next tick; `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Arc<AggregatedTick>> {
        self.rx.recv().await
    }

    /// Returns a buffered tick if one is ready.
    pub fn try_recv(&mut self) -> Option<Arc<AggregatedTick>> {
        self.rx.try_recv().ok()
    }

    /// Ticks dropped for this subscriber because its buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn simulation_id(&self) -> SimulationId {
        self.simulation_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

#[async_trait]
impl TickStream for Subscription {
    async fn next_tick(&mut self) -> Result<Option<Arc<AggregatedTick>>, EnvError> {
        Ok(self.recv().await)
    }
}
