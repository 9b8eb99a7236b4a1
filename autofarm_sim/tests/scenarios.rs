//! Every scenario, plus cross-simulation properties of the farm.

use autofarm_sim::scenarios::ScenarioId;
use autofarm_sim::{collect_n, verify_ticks, ScenarioRunner, SimFarm};
use autofarm_env::{SimulationConfig, SimulationStatus};
use std::time::Duration;

async fn assert_passes(scenario: ScenarioId) {
    let result = ScenarioRunner::new(7).run(scenario).await;
    assert!(
        result.passed,
        "{} failed: {}",
        scenario,
        result.failure_reason.unwrap_or_default()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_patrol() {
    assert_passes(ScenarioId::Patrol).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drain() {
    assert_passes(ScenarioId::Drain).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_resume() {
    assert_passes(ScenarioId::PauseResume).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_observer() {
    assert_passes(ScenarioId::SlowObserver).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flaky_worker() {
    assert_passes(ScenarioId::FlakyWorker).await;
}

#[tokio::test]
async fn test_lifecycle() {
    assert_passes(ScenarioId::Lifecycle).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_churn() {
    assert_passes(ScenarioId::Churn).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_simulations_run_independently() {
    let farm = SimFarm::new(11);
    let a = farm.registry.create(SimulationConfig::new("a", 2, 5, "patrol")).unwrap().id;
    let b = farm.registry.create(SimulationConfig::new("b", 4, 5, "patrol")).unwrap().id;
    let mut ticks_a = farm.registry.subscribe(a).unwrap();
    let mut ticks_b = farm.registry.subscribe(b).unwrap();

    farm.registry.start(a).unwrap();
    farm.registry.start(b).unwrap();
    let seen_a = collect_n(&mut ticks_a, 5, Duration::from_secs(1)).await;
    farm.registry.pause(a).unwrap();
    let seen_b = collect_n(&mut ticks_b, 10, Duration::from_secs(1)).await;

    verify_ticks(&seen_a, 2).unwrap();
    verify_ticks(&seen_b, 4).unwrap();
    assert!(seen_a.iter().all(|t| t.simulation_id == a));
    assert!(seen_b.iter().all(|t| t.simulation_id == b));
    assert_eq!(farm.registry.get(a).unwrap().status, SimulationStatus::Paused);
    assert_eq!(farm.registry.get(b).unwrap().status, SimulationStatus::Running);

    farm.shutdown().await;
    assert_eq!(farm.worker.open_exchanges(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_same_seed_reproduces_ids_and_first_tick() {
    let mut firsts = Vec::new();
    for _ in 0..2 {
        let farm = SimFarm::new(99);
        let id = farm.registry.create(SimulationConfig::new("seeded", 3, 5, "patrol")).unwrap().id;
        let mut ticks = farm.registry.subscribe(id).unwrap();
        farm.registry.start(id).unwrap();
        let first = collect_n(&mut ticks, 1, Duration::from_secs(1)).await;
        farm.shutdown().await;
        firsts.push((id, first[0].entities.clone()));
    }
    assert_eq!(firsts[0], firsts[1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_descriptors_are_persisted() {
    let farm = SimFarm::new(3);
    let id = farm.registry.create(SimulationConfig::new("kept", 1, 5, "patrol")).unwrap().id;
    let mut ticks = farm.registry.subscribe(id).unwrap();
    farm.registry.start(id).unwrap();
    collect_n(&mut ticks, 3, Duration::from_secs(1)).await;
    farm.context.advance_time(Duration::from_secs(2));
    let stopped = farm.registry.stop(id).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(farm.store.simulation(id), Some(stopped.clone()));
    assert_eq!(stopped.ended_at_ms, Some(1_704_067_202_000));
    assert!(farm.store.tick_summaries(id).len() >= 3);
}
