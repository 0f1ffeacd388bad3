// SPDX-License-Identifier: Apache-2.0
//! Small persisted operator conveniences (§F): the last-used `note`/`seed`,
//! remembered across restarts of the control plane. Ported from the
//! teacher's generic `ConfigStore`/`ConfigService` port-and-adapter split so
//! the control surface can depend on the trait without committing to a
//! filesystem-backed implementation.

use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a [`ConfigStore`] implementation can raise.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    /// Underlying filesystem operation failed.
    #[error("config store io error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored preferences could not be decoded.
    #[error("config store decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// No platform-appropriate config directory could be determined.
    #[error("no config directory available on this platform")]
    NoConfigDir,
}

/// Operator-level preferences remembered across restarts of the control
/// plane. Distinct from a [`fieldpulse_store`]-style run descriptor: this
/// is never tied to a `runId` and is never itself a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorPrefs {
    /// Last operator-supplied free-text note.
    pub last_note: Option<String>,
    /// Last explicit seed, if the operator ever supplied one.
    pub last_seed: Option<u32>,
}

/// Load/save port for [`OperatorPrefs`].
pub trait ConfigStore: Send + Sync {
    /// Load the persisted preferences, or `None` if nothing has been saved
    /// yet.
    fn load(&self) -> Result<Option<OperatorPrefs>, ConfigStoreError>;
    /// Persist the given preferences, overwriting any prior value.
    fn save(&self, prefs: &OperatorPrefs) -> Result<(), ConfigStoreError>;
}

/// Thin convenience wrapper: load() never fails the caller out — an
/// absent or corrupt prefs file just yields defaults.
pub struct ConfigService<S: ConfigStore> {
    store: S,
}

impl<S: ConfigStore> ConfigService<S> {
    /// Wrap a [`ConfigStore`] adapter.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Current preferences, falling back to defaults on any load error.
    pub fn load(&self) -> OperatorPrefs {
        self.store.load().ok().flatten().unwrap_or_default()
    }

    /// Persist preferences through the underlying store.
    pub fn save(&self, prefs: &OperatorPrefs) -> Result<(), ConfigStoreError> {
        self.store.save(prefs)
    }
}

/// Filesystem-backed [`ConfigStore`], using the platform's standard config
/// directory (`~/.config/fieldpulse` on Linux, etc).
pub struct FsConfigStore {
    path: PathBuf,
}

impl FsConfigStore {
    /// Resolve the platform-default config path and ensure its parent
    /// directory exists.
    pub fn project_default() -> Result<Self, ConfigStoreError> {
        let dirs = ProjectDirs::from("sim", "fieldpulse", "fieldpulse")
            .ok_or(ConfigStoreError::NoConfigDir)?;
        let dir = dirs.config_dir();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join("operator_prefs.json"),
        })
    }

    /// Build a store pointed at an explicit path, for tests or overrides.
    #[must_use]
    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ConfigStore for FsConfigStore {
    fn load(&self) -> Result<Option<OperatorPrefs>, ConfigStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, prefs: &OperatorPrefs) -> Result<(), ConfigStoreError> {
        let raw = serde_json::to_string_pretty(prefs)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}
