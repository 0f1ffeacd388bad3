// SPDX-License-Identifier: Apache-2.0
//! One shard's tick loop (§4.D.4).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use fieldpulse_events::{sample_and_build, RunId};
use fieldpulse_geo::LocationCatalog;
use fieldpulse_rng::DeterministicRng;
use fieldpulse_store::IncidentStore;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::Shared;

pub(crate) struct ShardArgs {
    pub shard_id: usize,
    pub target_rate: u32,
    pub batch_size: u32,
    pub spread_factor: f64,
    pub catalog: Arc<LocationCatalog>,
    pub rng: Arc<AsyncMutex<DeterministicRng>>,
    pub store: Arc<dyn IncidentStore>,
    pub run_id: RunId,
    pub shared: Arc<Shared>,
    pub cancel: Arc<std::sync::atomic::AtomicBool>,
}

/// Cooperative per-shard loop targeting one tick per second. Builds
/// `batches = max(1, ceil(target_rate / batch_size))` bulk-insert calls per
/// tick, the last possibly truncated so the per-tick total equals
/// `target_rate`, then sleeps out the remainder of the 1s budget.
pub(crate) async fn run(args: ShardArgs) {
    let ShardArgs {
        shard_id,
        target_rate,
        batch_size,
        spread_factor,
        catalog,
        rng,
        store,
        run_id,
        shared,
        cancel,
    } = args;

    if target_rate == 0 {
        return;
    }
    // target_rate/batch_size is always small enough to fit u32; the ceil+max
    // only ever rounds up from a ratio of two u32s.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let batches = (f64::from(target_rate) / f64::from(batch_size)).ceil().max(1.0) as u32;
    let counter = &shared.shard_counters[shard_id];

    loop {
        if !shared.running.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
            break;
        }
        let t0 = Instant::now();
        let mut remaining = target_rate;

        for _ in 0..batches {
            if remaining == 0 {
                break;
            }
            let this_batch = remaining.min(batch_size);
            remaining -= this_batch;

            let mut events = Vec::with_capacity(this_batch as usize);
            {
                let mut rng_guard = rng.lock().await;
                for _ in 0..this_batch {
                    let now = Utc::now();
                    events.push(sample_and_build(
                        &catalog,
                        spread_factor,
                        &mut rng_guard,
                        &run_id,
                        now,
                    ));
                }
            }

            match store.insert_batch(&run_id, &events).await {
                Ok(attempted) => {
                    counter.fetch_add(u64::try_from(attempted).unwrap_or(u64::MAX), Ordering::Relaxed);
                }
                Err(err) => {
                    // Best-effort accounting (§4.D.6, §9): a failed batch is
                    // still counted as attempted so the moving average
                    // reflects offered load, not confirmed durability.
                    warn!(shard = shard_id, error = %err, "batch insert failed, counting attempted");
                    shared.dropped_batches.fetch_add(1, Ordering::Relaxed);
                    counter.fetch_add(u64::try_from(events.len()).unwrap_or(u64::MAX), Ordering::Relaxed);
                }
            }
        }

        let elapsed = t0.elapsed();
        let budget = Duration::from_millis(1000);
        let sleep_for = budget.checked_sub(elapsed).unwrap_or(Duration::ZERO);
        tokio::time::sleep(sleep_for).await;
    }
}
