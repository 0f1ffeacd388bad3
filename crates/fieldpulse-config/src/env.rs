// SPDX-License-Identifier: Apache-2.0
//! Environment-driven application configuration (§6 "Environment
//! configuration"). The core pipeline never reads `std::env` itself — only
//! `AppConfig` fields passed in — so producer/scheduler stay testable
//! without environment coupling.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

/// Fatal configuration error. Only a missing store URI is fatal; every
/// other setting has a default.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}

/// Fully resolved process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Document store connection URI. No default; missing this is a fatal
    /// startup error.
    pub store_uri: String,
    /// Database name within the store.
    pub database_name: String,
    /// Incident collection name.
    pub incident_collection: String,
    /// Repair collection name.
    pub repair_collection: String,
    /// HTTP control surface port.
    pub control_port: u16,
    /// Allowed CORS origin for the control surface.
    pub allowed_origin: String,
    /// Moving-average window, seconds.
    pub moving_average_window_secs: u32,
    /// Path to the location catalog JSON file.
    pub catalog_path: PathBuf,
    /// Resource cap: maximum shard count.
    pub max_shards: u32,
    /// Resource cap: maximum batch size.
    pub max_batch: u32,
    /// Resource cap: maximum aggregate rate.
    pub max_rate: u32,
    /// Repair collection TTL in days; `0` disables TTL pruning.
    pub repair_ttl_days: u32,
}

impl AppConfig {
    /// Load configuration from the process environment, applying the
    /// spec's defaults for everything except the store URI.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_uri = std::env::var("FIELDPULSE_STORE_URI")
            .map_err(|_| ConfigError::Missing("FIELDPULSE_STORE_URI"))?;

        Ok(Self {
            store_uri,
            database_name: env_string("FIELDPULSE_DATABASE", "fieldpulse"),
            incident_collection: env_string("FIELDPULSE_INCIDENT_COLLECTION", "incidents"),
            repair_collection: env_string("FIELDPULSE_REPAIR_COLLECTION", "repairs"),
            control_port: env_parsed("FIELDPULSE_CONTROL_PORT", 5050),
            allowed_origin: env_string("FIELDPULSE_ALLOWED_ORIGIN", "*"),
            moving_average_window_secs: env_parsed("FIELDPULSE_MA_WINDOW_SECS", 10),
            catalog_path: PathBuf::from(env_string(
                "FIELDPULSE_CATALOG_PATH",
                "catalog.json",
            )),
            max_shards: env_parsed("FIELDPULSE_MAX_SHARDS", 128),
            max_batch: env_parsed("FIELDPULSE_MAX_BATCH", 50_000),
            max_rate: env_parsed("FIELDPULSE_MAX_RATE", 1_000_000),
            repair_ttl_days: env_parsed("FIELDPULSE_REPAIR_TTL_DAYS", 0),
        })
    }
}

fn env_string(key: &'static str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: FromStr>(key: &'static str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "could not parse environment variable, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    use super::*;

    #[test]
    fn missing_store_uri_is_fatal() {
        std::env::remove_var("FIELDPULSE_STORE_URI");
        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("FIELDPULSE_STORE_URI")));
    }

    #[test]
    fn unset_optional_vars_fall_back_to_defaults() {
        std::env::set_var("FIELDPULSE_STORE_URI", "mongodb://localhost/fieldpulse");
        std::env::remove_var("FIELDPULSE_CONTROL_PORT");
        let config = AppConfig::from_env().expect("store uri is set");
        assert_eq!(config.control_port, 5050);
        assert_eq!(config.max_shards, 128);
        std::env::remove_var("FIELDPULSE_STORE_URI");
    }
}
