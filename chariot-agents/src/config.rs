//! Scheduling configuration for agents

use chariot::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

const DEFAULT_MAX_CONCURRENT: usize = 1;
const DEFAULT_POLL_INTERVAL_SECS: f64 = 3.0;

/// Largest concurrency ceiling an agent accepts. Both the permit pool and
/// the drain in `Agent::stop` must be able to hold it.
pub const MAX_CONCURRENT_LIMIT: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

/// Longest poll interval, one day.
pub const MAX_POLL_INTERVAL_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Ceiling on simultaneously in-flight plan dispatches per agent
    pub max_concurrent: usize,
    /// Seconds between scheduler polls when nothing nudges the agent
    pub poll_interval_secs: f64,
    /// Bound of the agent event channel
    pub event_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            event_capacity: 64,
        }
    }
}

impl AgentConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> RuntimeResult<Self> {
        let config: AgentConfig =
            toml::from_str(source).map_err(|e| RuntimeError::Config(e.to_string()))?;
        Ok(config.normalized())
    }

    /// Replaces non-positive values with the defaults and clamps oversized
    /// ones to [`MAX_CONCURRENT_LIMIT`] and [`MAX_POLL_INTERVAL_SECS`].
    pub fn normalized(mut self) -> Self {
        if self.max_concurrent == 0 {
            self.max_concurrent = DEFAULT_MAX_CONCURRENT;
        }
        self.max_concurrent = self.max_concurrent.min(MAX_CONCURRENT_LIMIT);
        if self.poll_interval_secs.is_nan() || self.poll_interval_secs <= 0.0 {
            self.poll_interval_secs = DEFAULT_POLL_INTERVAL_SECS;
        }
        self.poll_interval_secs = self.poll_interval_secs.min(MAX_POLL_INTERVAL_SECS);
        if self.event_capacity == 0 {
            self.event_capacity = 1;
        }
        self
    }

    /// Copy with per-agent overrides; `None` keeps the current value.
    pub fn with_overrides(&self, max_concurrent: Option<usize>, poll_secs: Option<f64>) -> Self {
        AgentConfig {
            max_concurrent: max_concurrent.unwrap_or(self.max_concurrent),
            poll_interval_secs: poll_secs.unwrap_or(self.poll_interval_secs),
            event_capacity: self.event_capacity,
        }
        .normalized()
    }

    /// The poll interval as a `Duration`. Fields set by hand skip
    /// `normalized`, so out-of-range values are mapped here as well.
    pub fn poll_interval(&self) -> Duration {
        let secs = self.poll_interval_secs;
        let fallback = Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS);
        if secs.is_nan() || secs <= 0.0 {
            return fallback;
        }
        let interval = Duration::from_secs_f64(secs.min(MAX_POLL_INTERVAL_SECS));
        if interval.is_zero() {
            fallback
        } else {
            interval
        }
    }
}
