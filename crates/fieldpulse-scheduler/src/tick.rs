// SPDX-License-Identifier: Apache-2.0
//! The scheduler's periodic tick (§4.E.4) and timer-fire handler (§4.E.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use fieldpulse_events::{Issue, IssueCategory, RepairEvent, RunId};
use fieldpulse_rng::DeterministicRng;
use fieldpulse_store::{IncidentProjection, RepairInsertOutcome, Store};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{Counters, PendingTimer, RepairConfig, TimerTable};

pub(crate) struct TickLoopArgs {
    pub run_id: RunId,
    pub store: Arc<dyn Store>,
    pub rng: Arc<AsyncMutex<DeterministicRng>>,
    pub config: RepairConfig,
    pub counters: Arc<Counters>,
    pub timers: TimerTable,
    pub in_tick: Arc<AtomicBool>,
    pub running: Arc<AtomicBool>,
}

/// Drives the periodic cadence and drops overlapping ticks via `in_tick`.
pub(crate) async fn run_loop(args: TickLoopArgs) {
    let TickLoopArgs {
        run_id,
        store,
        rng,
        config,
        counters,
        timers,
        in_tick,
        running,
    } = args;
    let mut interval = tokio::time::interval(Duration::from_millis(config.cadence_ms));
    loop {
        interval.tick().await;
        if !running.load(Ordering::Relaxed) {
            return;
        }
        if in_tick
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            continue;
        }
        run_one_tick(&run_id, &store, &rng, &config, &counters, &timers).await;
        in_tick.store(false, Ordering::SeqCst);
    }
}

async fn run_one_tick(
    run_id: &RunId,
    store: &Arc<dyn Store>,
    rng: &Arc<AsyncMutex<DeterministicRng>>,
    config: &RepairConfig,
    counters: &Arc<Counters>,
    timers: &TimerTable,
) {
    let since = Utc::now() - ChronoDuration::seconds(config.recent_window_sec);
    let query_limit = (config.budget_per_tick as usize) * 5;
    let candidates = match store.query_recent(run_id, since, query_limit).await {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(run_id = %run_id, error = %err, "recent-incidents query failed, skipping tick");
            return;
        }
    };

    let mut infra: Vec<IncidentProjection> = candidates
        .into_iter()
        .filter(|candidate| is_infrastructure(&candidate.issue))
        .collect();

    let mut rng_guard = rng.lock().await;
    fisher_yates_shuffle(&mut infra, &mut rng_guard);

    let mut emitted = 0u32;
    for candidate in &infra {
        if emitted >= config.budget_per_tick {
            break;
        }
        emitted += 1;

        let key = RepairEvent::deterministic_key(
            run_id,
            IssueCategory::Infrastructure,
            &candidate.id,
            &config.policy_version,
        );
        info!(kind = "WOULD_FIX", key = %key, incident_id = %candidate.id, "would fix");

        if rng_guard.uniform() < 1.0 - config.p_fix_probability {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let mut pending = timers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if pending.contains_key(&candidate.id) {
            // At most one scheduled repair per incident per run (§4.E.4 step 4).
            continue;
        }

        let delay = sample_delay(&mut rng_guard, config);
        let handle = spawn_repair_timer(
            Arc::clone(store),
            run_id.clone(),
            candidate.id.clone(),
            key,
            config.policy.clone(),
            config.policy_version.clone(),
            delay,
            Arc::clone(counters),
            Arc::clone(timers),
        );
        pending.insert(candidate.id.clone(), PendingTimer { handle });
        counters.scheduled.fetch_add(1, Ordering::Relaxed);
    }
}

/// `delaySec = clamp(max(1, base + jitter), 1, maxDelaySec)`, converted to
/// milliseconds (§4.E.4 step 4).
fn sample_delay(rng: &mut DeterministicRng, config: &RepairConfig) -> Duration {
    let base = rng.log_normal_seconds(config.delay_median_sec, config.delay_p95_sec);
    let span = 2 * config.delay_jitter_sec + 1;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let jitter_draw = (rng.uniform() * span as f64) as i64 - config.delay_jitter_sec;
    #[allow(clippy::cast_possible_wrap)]
    let base_signed = base as i64;
    let delay_sec = (base_signed + jitter_draw)
        .max(1)
        .clamp(1, config.max_delay_sec.try_into().unwrap_or(i64::MAX));
    #[allow(clippy::cast_sign_loss)]
    Duration::from_secs(delay_sec as u64)
}

fn is_infrastructure(issue: &Issue) -> bool {
    issue.category == IssueCategory::Infrastructure || issue.issue_type.token().contains("infra")
}

/// In-place Fisher-Yates shuffle driven by the scheduler's own RNG, so the
/// candidate walk order is reproducible for a given seed and store contents
/// (§4.E.4 step 3).
fn fisher_yates_shuffle<T>(items: &mut [T], rng: &mut DeterministicRng) {
    for i in (1..items.len()).rev() {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let j = ((rng.uniform() * (i + 1) as f64) as usize).min(i);
        items.swap(i, j);
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_repair_timer(
    store: Arc<dyn Store>,
    run_id: RunId,
    incident_id: String,
    key: String,
    policy: String,
    policy_version: String,
    delay: Duration,
    counters: Arc<Counters>,
    timers: TimerTable,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let repair = RepairEvent {
            kind: "repair".to_string(),
            run_id: run_id.clone(),
            incident_id: incident_id.clone(),
            decided_at: Utc::now(),
            category: IssueCategory::Infrastructure,
            policy,
            policy_version,
            reason: "delayed repair scheduled by infrastructure policy".to_string(),
            key,
        };
        match store.insert_repair(&repair).await {
            Ok(RepairInsertOutcome::Persisted) => {
                counters.persisted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(RepairInsertOutcome::Duplicate) => {
                counters.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!(run_id = %run_id, incident_id = %incident_id, error = %err, "repair insert failed, dropping");
            }
        }
        timers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&incident_id);
    })
}
