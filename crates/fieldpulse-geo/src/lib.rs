// SPDX-License-Identifier: Apache-2.0
//! Immutable catalog of weighted, geographically distributed locations.
//!
//! Loaded once at process start and treated as read-only for the process
//! lifetime: [`LocationCatalog::pick_location`] draws weighted samples and
//! [`LocationCatalog::jitter`] scatters a sampled location by a Gaussian
//! offset scaled by its configured spread radius.

use fieldpulse_rng::DeterministicRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rough conversion used to scatter a jitter distance (in km) onto lat/lon
/// degrees. Not geodesically exact; good enough for synthetic scatter.
const KM_PER_DEGREE: f64 = 1.0 / 0.009;

/// One catalog entry: a named point with a sampling weight and a jitter
/// radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Human-readable location name.
    pub name: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Relative sampling weight, must be positive to be loaded.
    pub weight: f64,
    /// Gaussian jitter radius in kilometers.
    #[serde(default, rename = "sigmaKm")]
    pub sigma_km: f64,
}

/// Errors raised while loading a [`LocationCatalog`].
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Failed to read the catalog file.
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse the catalog JSON.
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    /// The catalog contained no usable entries after filtering.
    #[error("catalog is empty after filtering non-finite/non-positive-weight entries")]
    Empty,
}

/// Immutable, weight-sampleable set of locations.
///
/// Holds a precomputed cumulative-weight prefix alongside the filtered
/// entries so [`pick_location`](Self::pick_location) can binary-search
/// instead of re-summing weights on every draw.
#[derive(Debug, Clone)]
pub struct LocationCatalog {
    locations: Vec<Location>,
    cumulative_weights: Vec<f64>,
    total_weight: f64,
}

impl LocationCatalog {
    /// Build a catalog from raw entries, dropping entries with non-finite
    /// coordinates or non-positive weight. Fails if nothing survives.
    pub fn from_entries(entries: Vec<Location>) -> Result<Self, CatalogError> {
        let filtered: Vec<Location> = entries
            .into_iter()
            .filter(|loc| {
                loc.latitude.is_finite()
                    && loc.longitude.is_finite()
                    && loc.weight.is_finite()
                    && loc.weight > 0.0
            })
            .collect();
        if filtered.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut cumulative_weights = Vec::with_capacity(filtered.len());
        let mut running = 0.0;
        for loc in &filtered {
            running += loc.weight;
            cumulative_weights.push(running);
        }

        Ok(Self {
            locations: filtered,
            cumulative_weights,
            total_weight: running,
        })
    }

    /// Parse a catalog from a JSON array of entries and build it.
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let entries: Vec<Location> = serde_json::from_str(raw)?;
        Self::from_entries(entries)
    }

    /// Load and build a catalog from a JSON file on disk.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Number of entries retained after filtering.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Whether the catalog has no entries (never true for a constructed
    /// catalog, since construction rejects empty input).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Sum of all retained entries' weights.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Draw a location with probability proportional to its weight.
    ///
    /// Draws `r = uniform() * total_weight` and binary-searches the
    /// cumulative-weight prefix for the entry whose interval contains `r`.
    pub fn pick_location(&self, rng: &mut DeterministicRng) -> &Location {
        let r = rng.uniform() * self.total_weight;
        let idx = match self
            .cumulative_weights
            .binary_search_by(|probe| probe.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Equal))
        {
            Ok(idx) => idx,
            Err(idx) => idx,
        };
        let idx = idx.min(self.locations.len() - 1);
        &self.locations[idx]
    }

    /// Scatter `location` by an independent Gaussian jitter on each axis,
    /// scaled by `location.sigma_km * spread_factor` and converted from
    /// kilometers to degrees.
    pub fn jitter(
        &self,
        location: &Location,
        spread_factor: f64,
        rng: &mut DeterministicRng,
    ) -> (f64, f64) {
        let sigma_deg = location.sigma_km * spread_factor / KM_PER_DEGREE;
        let lat = location.latitude + rng.standard_normal() * sigma_deg;
        let lon = location.longitude + rng.standard_normal() * sigma_deg;
        (lat, lon)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    use super::*;

    fn loc(name: &str, weight: f64) -> Location {
        Location {
            name: name.to_string(),
            latitude: 40.0,
            longitude: -74.0,
            weight,
            sigma_km: 5.0,
        }
    }

    #[test]
    fn rejects_empty_catalog() {
        let err = LocationCatalog::from_entries(vec![]).expect_err("empty should fail");
        assert!(matches!(err, CatalogError::Empty));
    }

    #[test]
    fn drops_non_finite_and_non_positive_weight_entries() {
        let mut bad_coords = loc("bad-coords", 1.0);
        bad_coords.latitude = f64::NAN;
        let mut zero_weight = loc("zero-weight", 0.0);
        zero_weight.latitude = 10.0;
        let good = loc("good", 1.0);

        let catalog =
            LocationCatalog::from_entries(vec![bad_coords, zero_weight, good]).expect("one good");
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn cumulative_prefix_is_monotonic_and_matches_total() {
        let catalog =
            LocationCatalog::from_entries(vec![loc("a", 1.0), loc("b", 3.0), loc("c", 6.0)])
                .expect("built");
        assert!((catalog.total_weight() - 10.0).abs() < f64::EPSILON);
        assert_eq!(catalog.cumulative_weights, vec![1.0, 4.0, 10.0]);
    }

    #[test]
    fn weighted_selection_approaches_configured_ratios() {
        let catalog =
            LocationCatalog::from_entries(vec![loc("a", 1.0), loc("b", 3.0), loc("c", 6.0)])
                .expect("built");
        let mut rng = DeterministicRng::new(Some(42));
        let n = 200_000;
        let mut counts = [0u32; 3];
        for _ in 0..n {
            let picked = catalog.pick_location(&mut rng);
            match picked.name.as_str() {
                "a" => counts[0] += 1,
                "b" => counts[1] += 1,
                "c" => counts[2] += 1,
                other => panic!("unexpected location {other}"),
            }
        }
        let freqs: Vec<f64> = counts.iter().map(|&c| f64::from(c) / f64::from(n)).collect();
        assert!((freqs[0] - 0.1).abs() < 0.02, "freq a {}", freqs[0]);
        assert!((freqs[1] - 0.3).abs() < 0.02, "freq b {}", freqs[1]);
        assert!((freqs[2] - 0.6).abs() < 0.02, "freq c {}", freqs[2]);
    }

    #[test]
    fn jitter_scales_with_spread_factor_and_sigma() {
        let location = loc("a", 1.0);
        let mut rng = DeterministicRng::new(Some(1));
        let catalog = LocationCatalog::from_entries(vec![location.clone()]).expect("built");
        let (lat, lon) = catalog.jitter(&location, 0.0, &mut rng);
        assert!((lat - location.latitude).abs() < f64::EPSILON);
        assert!((lon - location.longitude).abs() < f64::EPSILON);
    }
}
