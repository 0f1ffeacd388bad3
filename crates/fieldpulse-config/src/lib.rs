// SPDX-License-Identifier: Apache-2.0
//! Process configuration (§6) and the operator-preferences port (§F).

mod env;
mod prefs;

pub use env::{AppConfig, ConfigError};
pub use prefs::{ConfigService, ConfigStore, ConfigStoreError, FsConfigStore, OperatorPrefs};
