// SPDX-License-Identifier: Apache-2.0
//! Configurable repair-scheduler parameters (§4.E.3).

/// Tunables governing one scheduler run. Call-site fields override the
/// struct's own defaults; defaults here are the spec's built-in fallback
/// tier, the bottom of the precedence chain.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Interval between ticks, milliseconds.
    pub cadence_ms: u64,
    /// Maximum repair candidates emitted per tick.
    pub budget_per_tick: u32,
    /// How far back into incident history to sample, seconds.
    pub recent_window_sec: i64,
    /// Median of the log-normal delay, seconds.
    pub delay_median_sec: f64,
    /// 95th percentile of the log-normal delay, seconds.
    pub delay_p95_sec: f64,
    /// Uniform additive jitter, ± this many seconds.
    pub delay_jitter_sec: i64,
    /// Gate probability a candidate actually schedules.
    pub p_fix_probability: f64,
    /// Hard cap on the resulting delay, seconds.
    pub max_delay_sec: u64,
    /// Opaque policy identifier persisted on the repair record.
    pub policy: String,
    /// Policy version, carried alongside `policy` in the deterministic key.
    pub policy_version: String,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            cadence_ms: 1000,
            budget_per_tick: 5,
            recent_window_sec: 30,
            delay_median_sec: 60.0,
            delay_p95_sec: 150.0,
            delay_jitter_sec: 10,
            p_fix_probability: 0.92,
            max_delay_sec: 300,
            policy: "infrastructure-autofix".to_string(),
            policy_version: "v1".to_string(),
        }
    }
}
