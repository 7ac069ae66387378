//! Observability configuration parsing from environment variables.
//!
//! This module handles loading the metrics reporter settings.

use super::parse_var;
use anyhow::Result;

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    /// Seconds between two pushed metrics snapshots
    pub interval_secs: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            enabled: parse_var("OBSERVABILITY_ENABLED", defaults.enabled)?,
            interval_secs: parse_var("OBSERVABILITY_INTERVAL", defaults.interval_secs)?.max(1),
        })
    }
}
