//! Assertions over observed tick sequences.

use autofarm_env::{AggregatedTick, EntityStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Summary of a verified tick sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickStats {
    pub ticks: usize,
    pub first_tick: Option<u64>,
    pub last_tick: Option<u64>,
    pub min_battery: Option<f64>,
    pub max_battery: Option<f64>,

    /// Entities offline in the last tick
    pub offline: usize,
}

/// Verifies a sequence seen by a subscriber that kept up from the start.
///
/// Tick numbers must be `1, 2, 3, ...`; everything [`verify_subsequence`]
/// checks must hold as well.
pub fn verify_ticks(ticks: &[Arc<AggregatedTick>], entity_count: usize) -> Result<TickStats, String> {
    if let Some(first) = ticks.first() {
        if first.tick != 1 {
            return Err(format!("first tick is {}, expected 1", first.tick));
        }
    }
    for pair in ticks.windows(2) {
        if pair[1].tick != pair[0].tick + 1 {
            return Err(format!("tick {} followed by {}", pair[0].tick, pair[1].tick));
        }
    }
    verify_subsequence(ticks, entity_count)
}

/// Verifies a sequence that may contain gaps (a lagging subscriber).
///
/// - tick numbers strictly increase
/// - every tick carries exactly the entities `1..=entity_count`
/// - battery stays in [0, 100] and never increases per entity
/// - battery 0 always comes with status `offline`
pub fn verify_subsequence(ticks: &[Arc<AggregatedTick>], entity_count: usize) -> Result<TickStats, String> {
    let mut stats = TickStats::default();
    let mut batteries: HashMap<u64, f64> = HashMap::new();
    let mut previous: Option<u64> = None;

    for tick in ticks {
        if let Some(previous) = previous {
            if tick.tick <= previous {
                return Err(format!("tick {} arrived after tick {}", tick.tick, previous));
            }
        }
        previous = Some(tick.tick);

        if tick.entities.len() != entity_count {
            return Err(format!(
                "tick {} has {} entities, expected {}",
                tick.tick,
                tick.entities.len(),
                entity_count
            ));
        }

        let mut ids: Vec<u64> = tick.entities.iter().map(|e| e.entity_id).collect();
        ids.sort_unstable();
        if ids != (1..=entity_count as u64).collect::<Vec<_>>() {
            return Err(format!("tick {} has entity ids {:?}", tick.tick, ids));
        }

        for entity in &tick.entities {
            if !(0.0..=100.0).contains(&entity.battery) {
                return Err(format!(
                    "entity {} battery {} out of range at tick {}",
                    entity.entity_id, entity.battery, tick.tick
                ));
            }
            if entity.battery == 0.0 && entity.status != EntityStatus::Offline {
                return Err(format!(
                    "entity {} has no battery but is {} at tick {}",
                    entity.entity_id, entity.status, tick.tick
                ));
            }
            if let Some(&last) = batteries.get(&entity.entity_id) {
                if entity.battery > last {
                    return Err(format!(
                        "entity {} battery rose from {} to {} at tick {}",
                        entity.entity_id, last, entity.battery, tick.tick
                    ));
                }
            }
            batteries.insert(entity.entity_id, entity.battery);

            stats.min_battery = Some(stats.min_battery.map_or(entity.battery, |b| b.min(entity.battery)));
            stats.max_battery = Some(stats.max_battery.map_or(entity.battery, |b| b.max(entity.battery)));
        }
    }

    stats.ticks = ticks.len();
    stats.first_tick = ticks.first().map(|t| t.tick);
    stats.last_tick = ticks.last().map(|t| t.tick);
    stats.offline = ticks
        .last()
        .map(|t| t.entities.iter().filter(|e| e.status == EntityStatus::Offline).count())
        .unwrap_or(0);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autofarm_core::entity::status_for;
    use autofarm_env::{EntityState, SimulationId};
    use proptest::prelude::*;

    fn tick(n: u64, batteries: &[f64]) -> Arc<AggregatedTick> {
        Arc::new(AggregatedTick {
            simulation_id: SimulationId::from_seed(1),
            tick: n,
            entities: batteries
                .iter()
                .enumerate()
                .map(|(i, &battery)| EntityState {
                    entity_id: i as u64 + 1,
                    x: 0.0,
                    y: 0.0,
                    vx: 0.0,
                    vy: 0.0,
                    battery,
                    status: status_for(battery),
                })
                .collect(),
            avg_compute_ms: 0.0,
            worker_count: 1,
            completed_at_ms: n,
        })
    }

    #[test]
    fn test_accepts_contiguous_draining_sequence() {
        let ticks = vec![tick(1, &[10.0, 0.1]), tick(2, &[9.9, 0.0]), tick(3, &[9.8, 0.0])];
        let stats = verify_ticks(&ticks, 2).unwrap();
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.last_tick, Some(3));
        assert_eq!(stats.min_battery, Some(0.0));
        assert_eq!(stats.offline, 1);
    }

    #[test]
    fn test_rejects_gap_and_wrong_start() {
        assert!(verify_ticks(&[tick(2, &[5.0])], 1).is_err());
        assert!(verify_ticks(&[tick(1, &[5.0]), tick(3, &[4.0])], 1).is_err());
        assert!(verify_subsequence(&[tick(1, &[5.0]), tick(3, &[4.0])], 1).is_ok());
    }

    #[test]
    fn test_rejects_rising_battery_and_wrong_count() {
        assert!(verify_ticks(&[tick(1, &[5.0]), tick(2, &[6.0])], 1).is_err());
        assert!(verify_ticks(&[tick(1, &[5.0, 5.0])], 1).is_err());
    }

    #[test]
    fn test_rejects_depleted_entity_not_offline() {
        let mut bad = (*tick(1, &[0.0])).clone();
        bad.entities[0].status = EntityStatus::Active;
        assert!(verify_ticks(&[Arc::new(bad)], 1).is_err());
    }

    proptest! {
        #[test]
        fn prop_reordered_sequences_are_rejected(len in 2usize..20, swap in 0usize..19) {
            let swap = swap % (len - 1);
            let mut ticks: Vec<_> = (1..=len as u64).map(|n| tick(n, &[50.0])).collect();
            ticks.swap(swap, swap + 1);
            prop_assert!(verify_subsequence(&ticks, 1).is_err());
        }
    }
}
