// SPDX-License-Identifier: Apache-2.0
//! Record shapes (§3) and the pure event-shape builder (§4.C).

mod issue;

pub use issue::{Issue, IssueCategory, IssueType};

use chrono::{DateTime, Utc};
use fieldpulse_geo::LocationCatalog;
use fieldpulse_rng::DeterministicRng;
use serde::{Deserialize, Serialize};

/// Stable identifier for one logical run, derived from the start instant and
/// seed at run-start time (§3 Run Descriptor).
pub type RunId = String;

/// A `[lon, lat]` pair, matching the GeoJSON coordinate order used by a
/// 2dsphere-style geo index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Coordinates as `[longitude, latitude]`.
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    /// Build a geo point from separate lat/lon scalars.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            coordinates: [longitude, latitude],
        }
    }
}

/// One persisted incident record (§3 Incident Event). Immutable once
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentEvent {
    /// Always `"incident"`; kept as a field (not an enum discriminant on the
    /// store side) so a store record round-trips byte-for-byte.
    pub kind: String,
    /// When the incident was generated.
    pub timestamp: DateTime<Utc>,
    /// Latitude scalar.
    pub latitude: f64,
    /// Longitude scalar.
    pub longitude: f64,
    /// `[lon, lat]` geo-typed pair for geo-indexed queries.
    pub geo: GeoPoint,
    /// Name of the source location this incident was sampled from.
    pub city: String,
    /// The source location's configured sampling weight.
    pub location_weight: f64,
    /// The source location's configured jitter radius in km.
    pub location_sigma_km: f64,
    /// Opaque issue payload.
    pub issue: Issue,
    /// Owning run identifier.
    pub run_id: RunId,
}

/// Unique, store-assigned identifier for a persisted [`IncidentEvent`].
///
/// Modeled as an opaque string rather than any particular store's native ID
/// type, since the store itself is an external collaborator (§6).
pub type IncidentId = String;

/// One persisted repair record (§3 Repair Event). At most one exists per
/// `(run_id, incident_id)` pair, enforced by the store's unique index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairEvent {
    /// Always `"repair"`.
    pub kind: String,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Identifier of the incident this repair resolves.
    pub incident_id: IncidentId,
    /// When the repair scheduler decided to schedule this repair.
    pub decided_at: DateTime<Utc>,
    /// Category tag; currently always [`IssueCategory::Infrastructure`].
    pub category: IssueCategory,
    /// Opaque policy identifier (e.g. `"infrastructure-autofix"`).
    pub policy: String,
    /// Policy version, carried alongside `policy` in the deterministic key.
    pub policy_version: String,
    /// Human-readable reason text for log correlation.
    pub reason: String,
    /// Deterministic key formed from `(run_id, category, incident_id,
    /// policy_version)`, used for log correlation and as the natural key
    /// the store's unique index is built on.
    pub key: String,
}

impl RepairEvent {
    /// Build the deterministic key from the record's own fields.
    #[must_use]
    pub fn deterministic_key(
        run_id: &str,
        category: IssueCategory,
        incident_id: &str,
        policy_version: &str,
    ) -> String {
        let category_tag = match category {
            IssueCategory::Infrastructure => "infrastructure",
            IssueCategory::Consumer => "consumer",
            IssueCategory::Business => "business",
            IssueCategory::Federal => "federal",
            IssueCategory::EmergingTech => "emerging_tech",
        };
        format!("{run_id}:{category_tag}:{incident_id}:{policy_version}")
    }
}

/// Build one incident event from a catalog draw, a jittered point and an
/// RNG stream. Pure: identical `(location, jittered_point, rng-state,
/// run_id)` always produces an identical event.
#[must_use]
pub fn build_event(
    location: &fieldpulse_geo::Location,
    jittered_point: (f64, f64),
    rng: &mut DeterministicRng,
    run_id: &RunId,
    now: DateTime<Utc>,
) -> IncidentEvent {
    let (latitude, longitude) = jittered_point;
    let issue = Issue::sample(rng);
    IncidentEvent {
        kind: "incident".to_string(),
        timestamp: now,
        latitude,
        longitude,
        geo: GeoPoint::new(latitude, longitude),
        city: location.name.clone(),
        location_weight: location.weight,
        location_sigma_km: location.sigma_km,
        issue,
        run_id: run_id.clone(),
    }
}

/// Sample a location, jitter it and build an incident event in one call —
/// the shape the producer pool actually drives per-record (§4.D.4 step 2).
#[must_use]
pub fn sample_and_build(
    catalog: &LocationCatalog,
    spread_factor: f64,
    rng: &mut DeterministicRng,
    run_id: &RunId,
    now: DateTime<Utc>,
) -> IncidentEvent {
    let location = catalog.pick_location(rng);
    let jittered = catalog.jitter(location, spread_factor, rng);
    build_event(location, jittered, rng, run_id, now)
}
