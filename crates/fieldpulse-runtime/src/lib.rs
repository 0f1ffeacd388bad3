// SPDX-License-Identifier: Apache-2.0
//! The Run Controller (§2): the union of the producer pool's and the
//! repair scheduler's public operations, behind one run identity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldpulse_events::RunId;
use fieldpulse_geo::LocationCatalog;
use fieldpulse_producer::{ProducerLimits, ProducerPool, ProducerSnapshot, StartParams};
use fieldpulse_rng::DeterministicRng;
use fieldpulse_scheduler::{RepairConfig, RepairScheduler, SchedulerSnapshot};
use fieldpulse_store::{RepairStore, RunDescriptor, RunStore, Store};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info};

/// Errors a `start` call on the run controller can fail with.
#[derive(Debug, Error, Clone)]
pub enum StartError {
    /// A producer parameter was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The catalog or store was unusable at start time.
    #[error("resource error: {0}")]
    Resource(String),
}

impl From<fieldpulse_producer::StartError> for StartError {
    fn from(err: fieldpulse_producer::StartError) -> Self {
        match err {
            fieldpulse_producer::StartError::InvalidArgument(msg) => {
                StartError::InvalidArgument(msg)
            }
            fieldpulse_producer::StartError::Resource(msg) => StartError::Resource(msg),
        }
    }
}

/// Caller-supplied inputs to [`RunController::start`], mirroring the
/// `/start` request body (§6).
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Aggregate target rate, records/sec.
    pub rate: u32,
    /// Maximum batch size per insert call.
    pub batch: u32,
    /// Number of producer shards.
    pub shards: u32,
    /// Gaussian jitter spread multiplier.
    pub spread_factor: f64,
    /// Explicit seed; `None` derives one from entropy and records it.
    pub seed: Option<u32>,
    /// Free-text operator note, carried on the run descriptor.
    pub note: Option<String>,
    /// Whether to also start the repair scheduler.
    pub repairs_enabled: bool,
    /// Repair scheduler configuration, used only when `repairs_enabled`.
    pub repair_config: RepairConfig,
}

/// Combined status snapshot, the shape `/status` and `/start`/`/stop`
/// return (§6).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    /// Always `true`; present so the JSON shape matches `/status`'s
    /// success case uniformly (errors are reported out-of-band by the
    /// HTTP layer as `{ok:false,error}`).
    pub ok: bool,
    /// Current run identifier, if a run is active or was just stopped.
    pub run_id: Option<RunId>,
    /// Producer pool status.
    pub producer: ProducerSnapshot,
    /// Repair scheduler status.
    pub scheduler: SchedulerSnapshot,
    /// Count of persisted repair records for the current run, or `None`
    /// when no run is active or the count query failed.
    pub persisted_count: Option<u64>,
}

/// Owns one run's identity, RNG, producer pool and repair scheduler.
pub struct RunController {
    catalog: Arc<LocationCatalog>,
    store: Arc<dyn Store>,
    limits: ProducerLimits,
    producer: ProducerPool,
    scheduler: RepairScheduler,
    current_run: Option<RunId>,
}

impl RunController {
    /// Build a controller bound to a catalog and store. No run is active
    /// until `start`.
    #[must_use]
    pub fn new(catalog: Arc<LocationCatalog>, store: Arc<dyn Store>, limits: ProducerLimits) -> Self {
        let incident_store: Arc<dyn fieldpulse_store::IncidentStore> = Arc::clone(&store);
        let producer = ProducerPool::new(
            limits,
            Arc::clone(&catalog),
            incident_store,
            Arc::new(AsyncMutex::new(DeterministicRng::new(None))),
        );
        let scheduler = RepairScheduler::new(Arc::clone(&store));
        Self {
            catalog,
            store,
            limits,
            producer,
            scheduler,
            current_run: None,
        }
    }

    /// Start a new run: validate parameters, derive a run identity, seed the
    /// RNG, persist the run descriptor, then start the producer pool and, if
    /// requested, the repair scheduler. Idempotent if a run is already
    /// active.
    ///
    /// Validation (§7 "Validation errors … Do not alter state") runs before
    /// the run descriptor is ever persisted: a rejected `start` must leave no
    /// trace in the store, so the producer's own range/`rate >= shards`
    /// checks are applied here first rather than being discovered only once
    /// `ProducerPool::start` is reached.
    pub async fn start(&mut self, request: RunRequest) -> Result<RunSnapshot, StartError> {
        if let Some(run_id) = self.current_run.clone() {
            return Ok(self.snapshot(Some(run_id)).await);
        }

        let params = StartParams {
            rate: request.rate,
            batch: request.batch,
            shards: request.shards,
            spread_factor: request.spread_factor,
        };
        params.validate(&self.limits)?;

        let seed = request.seed.unwrap_or_else(derive_entropy_seed);
        let run_id = format!("run-{}-{seed:08x}", Utc::now().timestamp_millis());

        let descriptor = RunDescriptor {
            run_id: run_id.clone(),
            started_at: Utc::now(),
            ended_at: None,
            rate: request.rate,
            batch: request.batch,
            shards: request.shards,
            spread_factor: request.spread_factor,
            seed: Some(seed),
            catalog_size: self.catalog.len(),
            note: request.note.clone(),
        };
        if let Err(err) = self.store.insert_run(descriptor).await {
            error!(run_id = %run_id, error = %err, "failed to persist run descriptor, aborting start");
            return Err(StartError::Resource(err.to_string()));
        }

        // Rebuild the producer around a freshly seeded shared RNG for this
        // run; producer shards and the scheduler draw from independent
        // streams by design (§9 open question), each reseeded from the
        // same effective seed for reproducibility of either in isolation.
        let rng = Arc::new(AsyncMutex::new(DeterministicRng::new(Some(seed))));
        let incident_store: Arc<dyn fieldpulse_store::IncidentStore> = Arc::clone(&self.store);
        self.producer = ProducerPool::new(self.limits, Arc::clone(&self.catalog), incident_store, rng);

        self.producer.start(run_id.clone(), params, 10).await?;

        if request.repairs_enabled {
            if let Err(err) = self
                .scheduler
                .start(run_id.clone(), Some(seed), request.repair_config)
                .await
            {
                error!(run_id = %run_id, error = %err, "repair scheduler failed to start alongside producer");
            }
        }

        info!(run_id = %run_id, "run started");
        self.current_run = Some(run_id.clone());
        Ok(self.snapshot(Some(run_id)).await)
    }

    /// Stop the scheduler (first) and the producer, finalize the run
    /// descriptor best-effort, then clear run state. Idempotent.
    pub async fn stop(&mut self) -> RunSnapshot {
        let Some(run_id) = self.current_run.take() else {
            return self.snapshot(None).await;
        };

        self.scheduler.stop().await;
        self.producer.stop().await;

        if let Err(err) = self.store.close_run(&run_id, Utc::now()).await {
            error!(run_id = %run_id, error = %err, "failed to close run descriptor on stop");
        }

        info!(run_id = %run_id, "run stopped");
        self.snapshot(Some(run_id)).await
    }

    /// Non-blocking-ish status snapshot (the persisted-repair count still
    /// requires one store read, matching `/status`'s documented shape).
    pub async fn status(&self) -> RunSnapshot {
        self.snapshot(self.current_run.clone()).await
    }

    async fn snapshot(&self, run_id: Option<RunId>) -> RunSnapshot {
        let persisted_count = match &run_id {
            Some(id) => self.store.count_repairs_for_run(id).await.ok(),
            None => None,
        };
        RunSnapshot {
            ok: true,
            run_id,
            producer: self.producer.status(),
            scheduler: self.scheduler.status(),
            persisted_count,
        }
    }
}

/// Derive a recordable seed from a non-reproducible entropy source, used
/// when a `start` call doesn't supply one. The derived value is persisted
/// on the run descriptor so the run can still be replayed.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn derive_entropy_seed() -> u32 {
    let mut entropy = DeterministicRng::new(None);
    (entropy.uniform() * f64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    use super::*;
    use fieldpulse_geo::Location;
    use fieldpulse_store::InMemoryStore;

    fn catalog() -> Arc<LocationCatalog> {
        Arc::new(
            LocationCatalog::from_entries(vec![Location {
                name: "Metro A".to_string(),
                latitude: 40.0,
                longitude: -74.0,
                weight: 1.0,
                sigma_km: 5.0,
            }])
            .expect("built"),
        )
    }

    #[tokio::test]
    async fn start_then_stop_closes_the_descriptor() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut controller = RunController::new(catalog(), Arc::clone(&store), ProducerLimits::default());

        let snapshot = controller
            .start(RunRequest {
                rate: 10,
                batch: 5,
                shards: 2,
                spread_factor: 1.0,
                seed: Some(1),
                note: None,
                repairs_enabled: false,
                repair_config: RepairConfig::default(),
            })
            .await
            .expect("starts");
        assert!(snapshot.run_id.is_some());

        let stopped = controller.stop().await;
        assert!(stopped.run_id.is_some());
        assert!(!stopped.producer.running);
    }

    #[tokio::test]
    async fn start_twice_is_idempotent() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut controller = RunController::new(catalog(), store, ProducerLimits::default());
        let request = RunRequest {
            rate: 10,
            batch: 5,
            shards: 2,
            spread_factor: 1.0,
            seed: Some(1),
            note: None,
            repairs_enabled: false,
            repair_config: RepairConfig::default(),
        };

        let first = controller.start(request.clone()).await.expect("starts");
        let second = controller.start(request).await.expect("starts");
        assert_eq!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut controller = RunController::new(catalog(), store, ProducerLimits::default());
        let snapshot = controller.stop().await;
        assert!(snapshot.run_id.is_none());
    }

    /// Scenario 4 (spec.md §8): a validation failure must not alter state
    /// (§7) — no run descriptor may be persisted and no run becomes current.
    #[tokio::test]
    async fn rejected_start_leaves_no_run_descriptor_behind() {
        let in_memory = Arc::new(InMemoryStore::new());
        let store: Arc<dyn Store> = in_memory.clone();
        let mut controller = RunController::new(catalog(), store, ProducerLimits::default());

        let err = controller
            .start(RunRequest {
                rate: 3,
                batch: 1,
                shards: 5,
                spread_factor: 1.0,
                seed: Some(1),
                note: None,
                repairs_enabled: false,
                repair_config: RepairConfig::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StartError::InvalidArgument(_)));

        assert_eq!(in_memory.run_count().await, 0);
        let status = controller.status().await;
        assert!(status.run_id.is_none());
    }
}
