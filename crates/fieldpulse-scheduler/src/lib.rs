// SPDX-License-Identifier: Apache-2.0
//! The repair scheduler (§4.E): policy-filtered sampling of recent
//! incidents, log-normal delayed repair emission, de-duplicated
//! persistence, and an in-flight timer registry with O(1) cancel-all.

mod config;
mod tick;

pub use config::RepairConfig;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use fieldpulse_events::RunId;
use fieldpulse_rng::DeterministicRng;
use fieldpulse_store::Store;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Fixed fallback seed used when a run carries no seed of its own (§4.E.2).
const FALLBACK_SEED: u32 = 0x5EED_0001;

/// Errors a scheduler `start` call can fail with.
#[derive(Debug, Error, Clone)]
pub enum SchedulerError {
    /// `start` was called without a run identity.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// The scheduler's own state machine (§4.E.2), independent of the producer
/// pool's running flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No run bound.
    Idle,
    /// Ticking on `cadence_ms`.
    Running,
    /// Draining: cancelling the in-flight tick and all pending timers.
    Stopping,
}

/// Point-in-time scheduler counters, returned by `start`/`stop`/`status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    /// Current state-machine state.
    pub state: SchedulerState,
    /// Bound run, if any.
    pub run_id: Option<RunId>,
    /// Repairs registered as one-shot timers this run.
    pub scheduled: u64,
    /// Repairs whose timer fired and persisted successfully.
    pub persisted: u64,
    /// Repairs whose timer fired but hit the unique-constraint conflict.
    pub duplicates_ignored: u64,
    /// Candidates gated out by `pFixProbability`.
    pub dropped: u64,
    /// Timers currently registered and not yet fired.
    pub in_flight: usize,
}

struct Counters {
    scheduled: AtomicU64,
    persisted: AtomicU64,
    duplicates_ignored: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            scheduled: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            duplicates_ignored: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }
}

/// One in-flight repair timer: the task driving it, plus when it's due.
struct PendingTimer {
    handle: JoinHandle<()>,
}

type TimerTable = Arc<std::sync::Mutex<HashMap<String, PendingTimer>>>;

struct RunningScheduler {
    run_id: RunId,
    counters: Arc<Counters>,
    timers: TimerTable,
    in_tick: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    tick_task: JoinHandle<()>,
}

/// The repair scheduler for at most one active run at a time.
pub struct RepairScheduler {
    store: Arc<dyn Store>,
    running: Option<RunningScheduler>,
}

impl RepairScheduler {
    /// Build a scheduler bound to a store. No run is active until `start`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            running: None,
        }
    }

    /// `idle -> running`. A no-op returning current status if already
    /// running the same `run_id`; fails with `InvalidArgument` if `run_id`
    /// is empty.
    pub async fn start(
        &mut self,
        run_id: RunId,
        seed: Option<u32>,
        config: RepairConfig,
    ) -> Result<SchedulerSnapshot, SchedulerError> {
        if run_id.trim().is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "runId is required to start the repair scheduler".to_string(),
            ));
        }
        if let Some(running) = &self.running {
            if running.run_id == run_id {
                return Ok(self.status());
            }
        }

        let rng = Arc::new(AsyncMutex::new(DeterministicRng::new(Some(
            seed.unwrap_or(FALLBACK_SEED),
        ))));
        let counters = Arc::new(Counters::new());
        let timers: TimerTable = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let in_tick = Arc::new(AtomicBool::new(false));
        let running_flag = Arc::new(AtomicBool::new(true));

        let tick_task = tokio::spawn(tick::run_loop(tick::TickLoopArgs {
            run_id: run_id.clone(),
            store: Arc::clone(&self.store),
            rng,
            config,
            counters: Arc::clone(&counters),
            timers: Arc::clone(&timers),
            in_tick: Arc::clone(&in_tick),
            running: Arc::clone(&running_flag),
        }));

        info!(run_id = %run_id, "repair scheduler started");
        self.running = Some(RunningScheduler {
            run_id,
            counters,
            timers,
            in_tick,
            running: running_flag,
            tick_task,
        });
        Ok(self.status())
    }

    /// `running -> stopping -> idle`. Cancels the periodic tick and every
    /// outstanding timer with O(1) work per timer (each is just a task
    /// abort). Idempotent.
    pub async fn stop(&mut self) -> SchedulerSnapshot {
        let Some(running) = self.running.take() else {
            return SchedulerSnapshot {
                state: SchedulerState::Idle,
                run_id: None,
                scheduled: 0,
                persisted: 0,
                duplicates_ignored: 0,
                dropped: 0,
                in_flight: 0,
            };
        };

        running.running.store(false, Ordering::SeqCst);
        if tokio::time::timeout(std::time::Duration::from_secs(1), async {
            running.tick_task.abort();
            let _ = running.tick_task.await;
        })
        .await
        .is_err()
        {
            warn!(run_id = %running.run_id, "scheduler tick task did not stop within the guard interval");
        }

        let mut timers = running
            .timers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for (_, pending) in timers.drain() {
            pending.handle.abort();
        }
        drop(timers);

        info!(run_id = %running.run_id, "repair scheduler stopped, outstanding timers cancelled");
        SchedulerSnapshot {
            state: SchedulerState::Idle,
            run_id: Some(running.run_id),
            scheduled: running.counters.scheduled.load(Ordering::Relaxed),
            persisted: running.counters.persisted.load(Ordering::Relaxed),
            duplicates_ignored: running.counters.duplicates_ignored.load(Ordering::Relaxed),
            dropped: running.counters.dropped.load(Ordering::Relaxed),
            in_flight: 0,
        }
    }

    /// Non-blocking status snapshot.
    #[must_use]
    pub fn status(&self) -> SchedulerSnapshot {
        let Some(running) = &self.running else {
            return SchedulerSnapshot {
                state: SchedulerState::Idle,
                run_id: None,
                scheduled: 0,
                persisted: 0,
                duplicates_ignored: 0,
                dropped: 0,
                in_flight: 0,
            };
        };
        let in_flight = running
            .timers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len();
        let state = if running.running.load(Ordering::Relaxed) {
            SchedulerState::Running
        } else {
            SchedulerState::Stopping
        };
        SchedulerSnapshot {
            state,
            run_id: Some(running.run_id.clone()),
            scheduled: running.counters.scheduled.load(Ordering::Relaxed),
            persisted: running.counters.persisted.load(Ordering::Relaxed),
            duplicates_ignored: running.counters.duplicates_ignored.load(Ordering::Relaxed),
            dropped: running.counters.dropped.load(Ordering::Relaxed),
            in_flight,
        }
    }
}
