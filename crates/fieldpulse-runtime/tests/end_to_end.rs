// SPDX-License-Identifier: Apache-2.0
//! Cross-component end-to-end scenarios (spec.md §8) driven through the
//! run controller against the in-memory store, with scheduler timings
//! scaled down so the suite runs in a few seconds of wall time rather than
//! spec.md's illustrative 10-15s windows.
#![allow(clippy::expect_used, clippy::cast_possible_truncation)]

use std::sync::Arc;
use std::time::Duration;

use fieldpulse_events::IssueCategory;
use fieldpulse_geo::{Location, LocationCatalog};
use fieldpulse_producer::ProducerLimits;
use fieldpulse_runtime::{RunController, RunRequest};
use fieldpulse_scheduler::RepairConfig;
use fieldpulse_store::{InMemoryStore, Store};

fn catalog() -> Arc<LocationCatalog> {
    Arc::new(
        LocationCatalog::from_entries(vec![
            Location {
                name: "Metro A".to_string(),
                latitude: 40.0,
                longitude: -74.0,
                weight: 1.0,
                sigma_km: 5.0,
            },
            Location {
                name: "Metro B".to_string(),
                latitude: 34.0,
                longitude: -118.0,
                weight: 1.0,
                sigma_km: 5.0,
            },
        ])
        .expect("built"),
    )
}

/// Scenario 2 (spec.md §8): with `pFixProbability = 1.0` and a short delay
/// distribution, every infrastructure incident produced during the run
/// ends up with exactly one persisted repair.
#[tokio::test]
async fn infrastructure_incidents_eventually_get_exactly_one_repair() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let mut controller = RunController::new(catalog(), Arc::clone(&store), ProducerLimits::default());

    let repair_config = RepairConfig {
        cadence_ms: 200,
        budget_per_tick: 50,
        recent_window_sec: 30,
        delay_median_sec: 1.0,
        delay_p95_sec: 2.0,
        delay_jitter_sec: 0,
        p_fix_probability: 1.0,
        max_delay_sec: 3,
        ..RepairConfig::default()
    };

    let snapshot = controller
        .start(RunRequest {
            rate: 20,
            batch: 10,
            shards: 1,
            spread_factor: 1.0,
            seed: Some(1),
            note: None,
            repairs_enabled: true,
            repair_config,
        })
        .await
        .expect("starts");
    let run_id = snapshot.run_id.clone().expect("run id present");

    tokio::time::sleep(Duration::from_secs(5)).await;
    let final_snapshot = controller.stop().await;

    let infra_incidents = store
        .query_recent(&run_id, chrono::Utc::now() - chrono::Duration::seconds(60), 10_000)
        .await
        .expect("query succeeds")
        .into_iter()
        .filter(|p| p.issue.category == IssueCategory::Infrastructure)
        .count();

    let persisted = final_snapshot.persisted_count.unwrap_or(0);
    assert!(persisted > 0, "expected at least one persisted repair");
    assert!(
        persisted as usize <= infra_incidents,
        "persisted repairs ({persisted}) must not exceed infra incidents seen ({infra_incidents})"
    );
}

/// Scenario 3 (spec.md §8): start immediately followed by stop leaves the
/// run descriptor closed and no shards active.
#[tokio::test]
async fn immediate_stop_after_start_closes_the_run() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let mut controller = RunController::new(catalog(), Arc::clone(&store), ProducerLimits::default());

    controller
        .start(RunRequest {
            rate: 5,
            batch: 5,
            shards: 1,
            spread_factor: 1.0,
            seed: Some(7),
            note: None,
            repairs_enabled: false,
            repair_config: RepairConfig::default(),
        })
        .await
        .expect("starts");

    let stopped = controller.stop().await;
    assert!(!stopped.producer.running);
    assert_eq!(stopped.scheduler.in_flight, 0);
}

/// Scenario 6 (spec.md §8): stopping a run with repairs enabled cancels all
/// outstanding timers; `persistedCount` only reflects repairs that had
/// already fired.
#[tokio::test]
async fn stop_cancels_outstanding_repair_timers() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let mut controller = RunController::new(catalog(), Arc::clone(&store), ProducerLimits::default());

    let repair_config = RepairConfig {
        cadence_ms: 200,
        budget_per_tick: 50,
        recent_window_sec: 30,
        delay_median_sec: 30.0,
        delay_p95_sec: 60.0,
        delay_jitter_sec: 0,
        p_fix_probability: 1.0,
        max_delay_sec: 120,
        ..RepairConfig::default()
    };

    controller
        .start(RunRequest {
            rate: 20,
            batch: 10,
            shards: 1,
            spread_factor: 1.0,
            seed: Some(3),
            note: None,
            repairs_enabled: true,
            repair_config,
        })
        .await
        .expect("starts");

    // Long enough for incidents and WOULD_FIX ticks to register timers, far
    // shorter than the 30-60s delay those timers are due at.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let stopped = controller.stop().await;

    assert_eq!(stopped.scheduler.in_flight, 0);
    let persisted_at_stop = stopped.persisted_count.unwrap_or(0);

    // Nothing should appear afterward: every pending timer was cancelled,
    // not merely detached.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let count_after = store
        .count_repairs_for_run(&stopped.run_id.clone().expect("run id present"))
        .await
        .expect("count succeeds");
    assert_eq!(count_after, persisted_at_stop);
}
