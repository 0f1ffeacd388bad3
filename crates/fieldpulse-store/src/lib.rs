// SPDX-License-Identifier: Apache-2.0
//! The persistence port (§6 "Persisted state layout") and an in-memory
//! adapter used by the standalone binary and by tests.
//!
//! The real document store (collections, indexes, TTL pruning) is an
//! external collaborator per spec.md §1; this crate only defines the seam a
//! real driver would implement and a faithful in-memory stand-in that
//! enforces the same invariants (one open run descriptor, at most one
//! repair per `(run_id, incident_id)`).

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldpulse_events::{Issue, RunId};
use thiserror::Error;

/// Errors a store operation can fail with.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// The store could not be reached (connection refused, timeout, DNS).
    #[error("store unreachable: {0}")]
    Unreachable(String),
    /// A unique-constraint violation — expected for retried/duplicate
    /// repair keys, never surfaced to the caller as a hard failure.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Anything else the store reported.
    #[error("store error: {0}")]
    Other(String),
}

/// One run descriptor (§3 Run Descriptor).
#[derive(Debug, Clone, PartialEq)]
pub struct RunDescriptor {
    /// Stable run identifier.
    pub run_id: RunId,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended; `None` while the run is open.
    pub ended_at: Option<DateTime<Utc>>,
    /// Effective aggregate rate (records/sec).
    pub rate: u32,
    /// Effective batch size.
    pub batch: u32,
    /// Effective shard count.
    pub shards: u32,
    /// Effective spread factor.
    pub spread_factor: f64,
    /// Seed used for this run's RNG, if any.
    pub seed: Option<u32>,
    /// Size of the loaded location catalog.
    pub catalog_size: usize,
    /// Optional free-text operator note.
    pub note: Option<String>,
}

/// Minimal projection of an incident used by the repair scheduler's
/// sampling query (§4.E.4 step 1): just enough to filter and key a repair.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentProjection {
    /// Store-assigned incident identifier.
    pub id: String,
    /// When the incident was recorded.
    pub timestamp: DateTime<Utc>,
    /// The incident's issue payload.
    pub issue: Issue,
}

/// Outcome of attempting to persist a repair event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairInsertOutcome {
    /// The repair was newly persisted.
    Persisted,
    /// A repair for this `(run_id, incident_id)` already existed.
    Duplicate,
}

/// Run descriptor lifecycle operations.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a freshly opened run descriptor.
    async fn insert_run(&self, descriptor: RunDescriptor) -> Result<(), StoreError>;
    /// Close a run descriptor by stamping `ended_at`.
    async fn close_run(&self, run_id: &str, ended_at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Incident persistence and sampling operations.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Bulk-insert a batch of incidents for `run_id`, returning the number
    /// of documents attempted (not necessarily the number durably
    /// committed — see the producer pool's best-effort accounting, §4.D.6).
    async fn insert_batch(
        &self,
        run_id: &str,
        events: &[fieldpulse_events::IncidentEvent],
    ) -> Result<usize, StoreError>;

    /// Fetch up to `limit` incidents for `run_id` with `timestamp >= since`,
    /// newest first, projected to `(id, timestamp, issue)`.
    async fn query_recent(
        &self,
        run_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IncidentProjection>, StoreError>;
}

/// Repair persistence operations.
#[async_trait]
pub trait RepairStore: Send + Sync {
    /// Insert a repair record, respecting the unique `(run_id,
    /// incident_id)` constraint. A conflict is a normal outcome, not an
    /// error.
    async fn insert_repair(
        &self,
        repair: &fieldpulse_events::RepairEvent,
    ) -> Result<RepairInsertOutcome, StoreError>;

    /// Count persisted repair records for `run_id` (used by `/status`'s
    /// `persistedCount`).
    async fn count_repairs_for_run(&self, run_id: &str) -> Result<u64, StoreError>;
}

/// The full store port: a real adapter implements all three traits plus
/// `Send + Sync + 'static` so it can be shared behind an `Arc<dyn Store>`.
pub trait Store: RunStore + IncidentStore + RepairStore + Send + Sync + 'static {}
impl<T: RunStore + IncidentStore + RepairStore + Send + Sync + 'static> Store for T {}
