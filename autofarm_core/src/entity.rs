//! Per-entity kinematics and battery model run by the worker.
//!
//! The simulator is a pure function of one entity's state: the same input
//! always yields the same next state. Randomness only enters through
//! [`EntitySimulator::spawn`].

use autofarm_env::{EntityState, EntityStatus};
use rand::Rng;

/// Side length of the square arena entities move in.
pub const ARENA_SIZE: f64 = 100.0;

/// Battery level of a freshly spawned entity.
pub const FULL_BATTERY: f64 = 100.0;

/// Battery drained per tick by default.
pub const DEFAULT_DRAIN_PER_TICK: f64 = 0.1;

/// Below this level an entity reports `low_battery`.
pub const LOW_BATTERY_THRESHOLD: f64 = 20.0;

/// Stateless entity update rule.
#[derive(Debug, Clone)]
pub struct EntitySimulator {
    /// Battery units drained per tick
    drain_per_tick: f64,

    /// Arena side length
    arena_size: f64,
}

impl EntitySimulator {
    /// Creates a simulator with the default drain rate.
    pub fn new() -> Self {
        Self {
            drain_per_tick: DEFAULT_DRAIN_PER_TICK,
            arena_size: ARENA_SIZE,
        }
    }

    /// Overrides the drain rate (useful to reach depletion quickly).
    pub fn with_drain(mut self, drain_per_tick: f64) -> Self {
        self.drain_per_tick = drain_per_tick.max(0.0);
        self
    }

    /// Returns the drain rate.
    pub fn drain_per_tick(&self) -> f64 {
        self.drain_per_tick
    }

    /// Spawns an entity at a random position with a random heading.
    pub fn spawn<R: Rng + ?Sized>(&self, entity_id: u64, rng: &mut R) -> EntityState {
        EntityState {
            entity_id,
            x: rng.gen_range(0.0..self.arena_size),
            y: rng.gen_range(0.0..self.arena_size),
            vx: rng.gen_range(-1.0..1.0),
            vy: rng.gen_range(-1.0..1.0),
            battery: FULL_BATTERY,
            status: EntityStatus::Active,
        }
    }

    /// Computes the next state of one entity.
    ///
    /// A depleted entity is parked: it no longer moves and stays at 0.
    pub fn advance(&self, state: &EntityState) -> EntityState {
        if state.battery <= 0.0 {
            return EntityState {
                battery: 0.0,
                status: EntityStatus::Offline,
                ..state.clone()
            };
        }

        let (x, vx) = bounce(state.x + state.vx, state.vx, self.arena_size);
        let (y, vy) = bounce(state.y + state.vy, state.vy, self.arena_size);
        let battery = (state.battery - self.drain_per_tick).max(0.0);

        EntityState {
            entity_id: state.entity_id,
            x,
            y,
            vx,
            vy,
            battery,
            status: status_for(battery),
        }
    }
}

impl Default for EntitySimulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives the status tag from a battery level.
pub fn status_for(battery: f64) -> EntityStatus {
    if battery <= 0.0 {
        EntityStatus::Offline
    } else if battery < LOW_BATTERY_THRESHOLD {
        EntityStatus::LowBattery
    } else {
        EntityStatus::Active
    }
}

/// Reflects a coordinate that left `[0, size]` and flips its velocity.
fn bounce(position: f64, velocity: f64, size: f64) -> (f64, f64) {
    if position < 0.0 {
        (-position, -velocity)
    } else if position > size {
        (2.0 * size - position, -velocity)
    } else {
        (position, velocity)
    }
}
