// SPDX-License-Identifier: Apache-2.0
//! In-memory [`Store`](crate::Store) adapter.
//!
//! Stands in for a real document database in the standalone binary and in
//! tests. Indexes described in spec.md §6 are modeled as plain `HashMap`/
//! `Vec` scans rather than real index structures — correctness, not query
//! performance, is what this adapter is for.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldpulse_events::{IncidentEvent, RepairEvent};
use tokio::sync::RwLock;

use crate::{
    IncidentProjection, IncidentStore, RepairInsertOutcome, RepairStore, RunDescriptor, RunStore,
    StoreError,
};

struct StoredIncident {
    id: String,
    run_id: String,
    timestamp: DateTime<Utc>,
    event: IncidentEvent,
}

/// A `Send + Sync` in-memory store backed by `tokio::sync::RwLock`-guarded
/// collections.
#[derive(Default)]
pub struct InMemoryStore {
    next_incident_id: AtomicU64,
    runs: RwLock<HashMap<String, RunDescriptor>>,
    incidents: RwLock<Vec<StoredIncident>>,
    repairs: RwLock<HashMap<(String, String), RepairEvent>>,
}

impl InMemoryStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_incident_id(&self) -> String {
        let n = self.next_incident_id.fetch_add(1, Ordering::Relaxed);
        format!("inc-{n:010}")
    }

    /// Snapshot of the currently open or most recently closed run
    /// descriptor for `run_id`, for tests and `/status` wiring.
    pub async fn run(&self, run_id: &str) -> Option<RunDescriptor> {
        self.runs.read().await.get(run_id).cloned()
    }

    /// Total number of run descriptors ever inserted, for tests asserting
    /// that a rejected `start` leaves no descriptor behind.
    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn insert_run(&self, descriptor: RunDescriptor) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        runs.insert(descriptor.run_id.clone(), descriptor);
        Ok(())
    }

    async fn close_run(&self, run_id: &str, ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let Some(descriptor) = runs.get_mut(run_id) else {
            return Err(StoreError::Other(format!("unknown run {run_id}")));
        };
        descriptor.ended_at = Some(ended_at);
        Ok(())
    }
}

#[async_trait]
impl IncidentStore for InMemoryStore {
    async fn insert_batch(
        &self,
        run_id: &str,
        events: &[IncidentEvent],
    ) -> Result<usize, StoreError> {
        let mut incidents = self.incidents.write().await;
        for event in events {
            let id = self.alloc_incident_id();
            incidents.push(StoredIncident {
                id,
                run_id: run_id.to_string(),
                timestamp: event.timestamp,
                event: event.clone(),
            });
        }
        Ok(events.len())
    }

    async fn query_recent(
        &self,
        run_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IncidentProjection>, StoreError> {
        let incidents = self.incidents.read().await;
        let mut matches: Vec<&StoredIncident> = incidents
            .iter()
            .filter(|i| i.run_id == run_id && i.timestamp >= since)
            .collect();
        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matches.truncate(limit);
        Ok(matches
            .into_iter()
            .map(|i| IncidentProjection {
                id: i.id.clone(),
                timestamp: i.timestamp,
                issue: i.event.issue.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl RepairStore for InMemoryStore {
    async fn insert_repair(
        &self,
        repair: &RepairEvent,
    ) -> Result<RepairInsertOutcome, StoreError> {
        let mut repairs = self.repairs.write().await;
        let key = (repair.run_id.clone(), repair.incident_id.clone());
        if repairs.contains_key(&key) {
            return Ok(RepairInsertOutcome::Duplicate);
        }
        repairs.insert(key, repair.clone());
        Ok(RepairInsertOutcome::Persisted)
    }

    async fn count_repairs_for_run(&self, run_id: &str) -> Result<u64, StoreError> {
        let repairs = self.repairs.read().await;
        let count = repairs.keys().filter(|(r, _)| r == run_id).count();
        Ok(count as u64)
    }
}

/// Used only to document the uniqueness invariant under test; not part of
/// the public API.
#[cfg(test)]
fn distinct_incident_ids(ids: &[String]) -> HashSet<&String> {
    ids.iter().collect()
}
