//! Timing knobs for the config client's poll/backoff cadence.
//!
//! Mirrors `TimingValues` from the source spec: the Source reads these once
//! at construction and the Agent derives `waitTime`/`nextTimeout` from them
//! on every response.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable per-Source timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingValues {
    /// Server timeout used for the very first request.
    pub initial_timeout: Duration,
    /// Server timeout used after a successful response.
    pub success_timeout: Duration,
    /// Server timeout used after an error response.
    pub error_timeout: Duration,
    /// Base delay multiplied in on a successful response (multiplier is always 1).
    pub success_delay: Duration,
    /// Base delay multiplied in on an error response once at least one
    /// config has been successfully received (`num_configured > 0`).
    pub configured_error_delay: Duration,
    /// Base delay multiplied in on an error response before any config has
    /// ever been received.
    pub unconfigured_delay: Duration,
    /// Flat delay added regardless of outcome.
    pub fixed_delay: Duration,
    /// Base delay for a Connection's transient-failure suspension.
    pub transient_delay: Duration,
    /// Base delay for a Connection's fatal-failure suspension.
    pub fatal_delay: Duration,
    /// Cap on the failure-count multiplier used by both Agent and Connection.
    pub max_delay_multiplier: u32,
}

impl Default for TimingValues {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_secs(10),
            success_timeout: Duration::from_secs(55),
            error_timeout: Duration::from_secs(5),
            success_delay: Duration::ZERO,
            configured_error_delay: Duration::from_secs(15),
            unconfigured_delay: Duration::from_secs(1),
            fixed_delay: Duration::ZERO,
            transient_delay: Duration::from_secs(1),
            fatal_delay: Duration::from_secs(5),
            max_delay_multiplier: 6,
        }
    }
}

impl TimingValues {
    /// `waitTime = fixedDelay + multiplier * delay`, multiplier capped at
    /// `max_delay_multiplier`. Shared formula used by both the Agent
    /// (failed request count) and Connection (failure count).
    pub fn wait_time(&self, delay: Duration, count: u32) -> Duration {
        let multiplier = count.min(self.max_delay_multiplier);
        self.fixed_delay + delay * multiplier
    }
}
