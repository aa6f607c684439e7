//! # Engine Configuration
//!
//! Tunable limits for transform orchestration. `0` disables a threshold.

use crate::primitives::{DEFAULT_NOISE_THRESHOLD, PROGRESS_INTERVAL_SECS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestrator defaults, overridable per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Warn when a job returns more nodes than this.
    pub max_nodes_warn: usize,
    /// Truncate a job's output to this many nodes.
    pub max_nodes_cap: usize,
    /// Seconds between "still running" notices.
    pub progress_interval_secs: u64,
    /// Noise threshold applied when a filter does not name one.
    pub default_noise: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_nodes_warn: 0,
            max_nodes_cap: 0,
            progress_interval_secs: PROGRESS_INTERVAL_SECS,
            default_noise: DEFAULT_NOISE_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Interval between progress notices, never shorter than one second.
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_nodes_cap": 500}"#).expect("parse");
        assert_eq!(config.max_nodes_cap, 500);
        assert_eq!(config.max_nodes_warn, 0);
        assert_eq!(config.default_noise, DEFAULT_NOISE_THRESHOLD);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = EngineConfig {
            progress_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.progress_interval(), Duration::from_secs(1));
    }
}
