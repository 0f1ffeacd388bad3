// SPDX-License-Identifier: Apache-2.0
//! The sharded producer pool (§4.D): rate-governed tick loops that sample
//! incidents from a shared RNG and catalog, batch them and drive them
//! through the store's insert path with best-effort accounting.

mod limits;
mod shard;

pub use limits::ProducerLimits;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fieldpulse_events::RunId;
use fieldpulse_geo::LocationCatalog;
use fieldpulse_rng::DeterministicRng;
use fieldpulse_store::IncidentStore;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Errors a `start` call can fail with (§7 validation / resource errors).
#[derive(Debug, Error, Clone)]
pub enum StartError {
    /// A parameter was out of its allowed range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The catalog or store was unusable at start time.
    #[error("resource error: {0}")]
    Resource(String),
}

/// Validated inputs to [`ProducerPool::start`].
#[derive(Debug, Clone)]
pub struct StartParams {
    /// Aggregate target rate, records/sec.
    pub rate: u32,
    /// Maximum batch size per insert call.
    pub batch: u32,
    /// Number of shards.
    pub shards: u32,
    /// Gaussian jitter spread multiplier.
    pub spread_factor: f64,
}

impl StartParams {
    /// Validate `rate`/`batch`/`shards`/`spread_factor` against `limits`
    /// (§5 Resource caps, §4.D.2). Exposed so callers that must validate
    /// before taking any side effect of their own — the run controller
    /// persists a run descriptor only after this succeeds — can do so
    /// without going through [`ProducerPool::start`] first.
    pub fn validate(&self, limits: &ProducerLimits) -> Result<(), StartError> {
        if self.rate == 0 || self.rate > limits.max_rate {
            return Err(StartError::InvalidArgument(format!(
                "rate must be in 1..={}",
                limits.max_rate
            )));
        }
        if self.batch == 0 || self.batch > limits.max_batch {
            return Err(StartError::InvalidArgument(format!(
                "batch must be in 1..={}",
                limits.max_batch
            )));
        }
        if self.shards == 0 || self.shards > limits.max_shards {
            return Err(StartError::InvalidArgument(format!(
                "shards must be in 1..={}",
                limits.max_shards
            )));
        }
        if self.shards > self.rate {
            return Err(StartError::InvalidArgument(
                "rate must be >= shards".to_string(),
            ));
        }
        if !(0.2..=5.0).contains(&self.spread_factor) {
            return Err(StartError::InvalidArgument(
                "spread must be in 0.2..=5.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Split an aggregate rate across `shards` shards: `⌊R/K⌋` each, with the
/// first `R mod K` shards receiving one additional unit (§4.D.3).
#[must_use]
pub fn split_rate(rate: u32, shards: u32) -> Vec<u32> {
    let base = rate / shards;
    let remainder = rate % shards;
    (0..shards)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Point-in-time view of the producer pool, returned by `start`/`stop`/`status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSnapshot {
    /// Whether shards are currently active.
    pub running: bool,
    /// The run this snapshot belongs to, if any.
    pub run_id: Option<RunId>,
    /// When the run started.
    pub started_at: Option<DateTime<Utc>>,
    /// Effective aggregate rate.
    pub rate: u32,
    /// Effective batch size.
    pub batch: u32,
    /// Effective shard count.
    pub shards: u32,
    /// Effective spread factor.
    pub spread_factor: f64,
    /// Size of the loaded location catalog.
    pub catalog_size: usize,
    /// Moving-average window, seconds.
    pub window_secs: u32,
    /// Integer moving average of recent per-tick aggregate insert counts.
    pub moving_average: u32,
    /// Count of batches whose insert call returned an error (still counted
    /// as attempted in `moving_average`, per §4.D.6/§9's accounting note).
    pub dropped_batches: u64,
}

impl ProducerSnapshot {
    fn idle() -> Self {
        Self {
            running: false,
            run_id: None,
            started_at: None,
            rate: 0,
            batch: 0,
            shards: 0,
            spread_factor: 0.0,
            catalog_size: 0,
            window_secs: 0,
            moving_average: 0,
            dropped_batches: 0,
        }
    }
}

struct Shared {
    running: AtomicBool,
    shard_counters: Vec<AtomicU64>,
    dropped_batches: AtomicU64,
    history: std::sync::Mutex<VecDeque<u32>>,
    window_secs: u32,
}

const HISTORY_CAP: usize = 300;

impl Shared {
    fn moving_average(&self) -> u32 {
        let history = self
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if history.is_empty() {
            return 0;
        }
        let window = (self.window_secs as usize).max(1);
        let take = window.min(history.len());
        let sum: u64 = history.iter().rev().take(take).map(|&v| u64::from(v)).sum();
        let take_u64 = u64::try_from(take).unwrap_or(u64::MAX);
        // Rounded mean, not floor division (§8 "Moving-average boundary").
        u32::try_from((sum + take_u64 / 2) / take_u64).unwrap_or(u32::MAX)
    }
}

/// A run's sharded producer pool. One instance owns zero or one active run.
pub struct ProducerPool {
    limits: ProducerLimits,
    catalog: Arc<LocationCatalog>,
    store: Arc<dyn IncidentStore>,
    rng: Arc<AsyncMutex<DeterministicRng>>,
    running: Option<RunningPool>,
}

struct RunningPool {
    run_id: RunId,
    started_at: DateTime<Utc>,
    params: StartParams,
    shared: Arc<Shared>,
    cancel: Arc<AtomicBool>,
    aggregator: JoinHandle<()>,
    shards: Vec<JoinHandle<()>>,
}

impl ProducerPool {
    /// Build a pool bound to a catalog, store and shared RNG stream. The RNG
    /// and catalog are expected to be owned by the run controller and handed
    /// in here, so every shard of every run draws from the same stream —
    /// the funnel resolution of the single-RNG-under-parallelism open
    /// question (spec.md §9).
    #[must_use]
    pub fn new(
        limits: ProducerLimits,
        catalog: Arc<LocationCatalog>,
        store: Arc<dyn IncidentStore>,
        rng: Arc<AsyncMutex<DeterministicRng>>,
    ) -> Self {
        Self {
            limits,
            catalog,
            store,
            rng,
            running: None,
        }
    }

    /// Start a new run, or return the current status unchanged if a run is
    /// already active (idempotent no-op per §4.D.2).
    pub async fn start(
        &mut self,
        run_id: RunId,
        params: StartParams,
        window_secs: u32,
    ) -> Result<ProducerSnapshot, StartError> {
        if self.running.is_some() {
            return Ok(self.status());
        }
        params.validate(&self.limits)?;
        if self.catalog.is_empty() {
            return Err(StartError::Resource("catalog is empty".to_string()));
        }

        let shard_rates = split_rate(params.rate, params.shards);
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            shard_counters: (0..params.shards).map(|_| AtomicU64::new(0)).collect(),
            dropped_batches: AtomicU64::new(0),
            history: std::sync::Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
            window_secs,
        });
        let cancel = Arc::new(AtomicBool::new(false));
        let started_at = Utc::now();

        let mut shards = Vec::with_capacity(params.shards as usize);
        for (shard_id, &shard_rate) in shard_rates.iter().enumerate() {
            let handle = tokio::spawn(shard::run(shard::ShardArgs {
                shard_id,
                target_rate: shard_rate,
                batch_size: params.batch,
                spread_factor: params.spread_factor,
                catalog: Arc::clone(&self.catalog),
                rng: Arc::clone(&self.rng),
                store: Arc::clone(&self.store),
                run_id: run_id.clone(),
                shared: Arc::clone(&shared),
                cancel: Arc::clone(&cancel),
            }));
            shards.push(handle);
        }

        let aggregator = tokio::spawn(run_aggregator(Arc::clone(&shared)));

        info!(run_id = %run_id, rate = params.rate, shards = params.shards, "producer pool started");
        self.running = Some(RunningPool {
            run_id,
            started_at,
            params,
            shared,
            cancel,
            aggregator,
            shards,
        });
        Ok(self.status())
    }

    /// Signal all shards and the aggregator to stop, wait up to a bounded
    /// guard interval for them to drain, then clear run state. Idempotent.
    pub async fn stop(&mut self) -> ProducerSnapshot {
        let Some(running) = self.running.take() else {
            return ProducerSnapshot::idle();
        };
        running.shared.running.store(false, Ordering::SeqCst);
        running.cancel.store(true, Ordering::SeqCst);

        let drain = async {
            for handle in running.shards {
                if let Err(err) = handle.await {
                    warn!(error = %err, "producer shard task panicked during stop");
                }
            }
            running.aggregator.abort();
        };
        if tokio::time::timeout(Duration::from_secs(2), drain)
            .await
            .is_err()
        {
            warn!(run_id = %running.run_id, "producer shards did not drain within the stop guard interval");
        }

        info!(run_id = %running.run_id, "producer pool stopped");
        ProducerSnapshot {
            running: false,
            run_id: Some(running.run_id),
            started_at: Some(running.started_at),
            rate: running.params.rate,
            batch: running.params.batch,
            shards: running.params.shards,
            spread_factor: running.params.spread_factor,
            catalog_size: self.catalog.len(),
            window_secs: running.shared.window_secs,
            moving_average: running.shared.moving_average(),
            dropped_batches: running.shared.dropped_batches.load(Ordering::Relaxed),
        }
    }

    /// Non-blocking status snapshot.
    #[must_use]
    pub fn status(&self) -> ProducerSnapshot {
        let Some(running) = &self.running else {
            return ProducerSnapshot::idle();
        };
        ProducerSnapshot {
            running: running.shared.running.load(Ordering::Relaxed),
            run_id: Some(running.run_id.clone()),
            started_at: Some(running.started_at),
            rate: running.params.rate,
            batch: running.params.batch,
            shards: running.params.shards,
            spread_factor: running.params.spread_factor,
            catalog_size: self.catalog.len(),
            window_secs: running.shared.window_secs,
            moving_average: running.shared.moving_average(),
            dropped_batches: running.shared.dropped_batches.load(Ordering::Relaxed),
        }
    }
}

/// Samples all shard counters once per second, pushes their sum onto the
/// rolling history and resets them — the per-tick aggregate the moving
/// average is computed over (§4.D.5). Independent shard tick timers mean
/// there is no single global "tick boundary" to hook; a fixed 1 Hz sampler
/// is the practical approximation the spec's tolerance for drift allows.
async fn run_aggregator(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        if !shared.running.load(Ordering::Relaxed) {
            return;
        }
        let total: u64 = shared
            .shard_counters
            .iter()
            .map(|c| c.swap(0, Ordering::Relaxed))
            .sum();
        let mut history = shared
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if history.len() == HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(u32::try_from(total).unwrap_or(u32::MAX));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    use super::*;

    #[test]
    fn rate_split_matches_scenario_4() {
        assert_eq!(split_rate(10, 3), vec![4, 3, 3]);
    }

    #[test]
    fn rate_split_sums_to_rate() {
        for (rate, shards) in [(1000, 7), (1, 1), (128, 128), (999, 4)] {
            let split = split_rate(rate, shards);
            assert_eq!(split.iter().sum::<u32>(), rate);
            assert_eq!(split.len(), shards as usize);
        }
    }

    #[test]
    fn start_params_reject_shards_greater_than_rate() {
        let limits = ProducerLimits::default();
        let params = StartParams {
            rate: 3,
            batch: 1,
            shards: 5,
            spread_factor: 1.0,
        };
        let err = params.validate(&limits).unwrap_err();
        assert!(matches!(err, StartError::InvalidArgument(_)));
    }

    #[test]
    fn moving_average_is_zero_with_no_history() {
        let shared = Shared {
            running: AtomicBool::new(true),
            shard_counters: vec![],
            dropped_batches: AtomicU64::new(0),
            history: std::sync::Mutex::new(VecDeque::new()),
            window_secs: 10,
        };
        assert_eq!(shared.moving_average(), 0);
    }

    #[test]
    fn moving_average_equals_single_tick_value() {
        let shared = Shared {
            running: AtomicBool::new(true),
            shard_counters: vec![],
            dropped_batches: AtomicU64::new(0),
            history: std::sync::Mutex::new(VecDeque::from(vec![42])),
            window_secs: 10,
        };
        assert_eq!(shared.moving_average(), 42);
    }

    #[test]
    fn moving_average_is_rounded_mean_of_window() {
        let shared = Shared {
            running: AtomicBool::new(true),
            shard_counters: vec![],
            dropped_batches: AtomicU64::new(0),
            history: std::sync::Mutex::new(VecDeque::from(vec![10, 20, 30])),
            window_secs: 3,
        };
        assert_eq!(shared.moving_average(), 20);
    }

    #[test]
    fn moving_average_rounds_up_on_an_unevenly_divisible_window() {
        let shared = Shared {
            running: AtomicBool::new(true),
            shard_counters: vec![],
            dropped_batches: AtomicU64::new(0),
            history: std::sync::Mutex::new(VecDeque::from(vec![1, 2])),
            window_secs: 2,
        };
        assert_eq!(shared.moving_average(), 2);
    }
}
