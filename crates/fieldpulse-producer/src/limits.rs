// SPDX-License-Identifier: Apache-2.0
//! Resource caps on producer `start` parameters (§5 Resource caps).

/// Upper bounds a `start` call is validated against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProducerLimits {
    /// Maximum aggregate rate, records/sec.
    pub max_rate: u32,
    /// Maximum batch size.
    pub max_batch: u32,
    /// Maximum shard count.
    pub max_shards: u32,
}

impl Default for ProducerLimits {
    fn default() -> Self {
        Self {
            max_rate: 1_000_000,
            max_batch: 50_000,
            max_shards: 128,
        }
    }
}
