//! Persistent store and response cache configuration.

use super::parse_var;
use anyhow::Result;
use std::env;
use std::time::Duration;

/// Candle store configuration
#[derive(Debug, Clone)]
pub struct StoreEnvConfig {
    pub enabled: bool,
    pub database_url: String,
}

impl Default for StoreEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_url: "sqlite://data/chartfeed.db".to_string(),
        }
    }
}

impl StoreEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            enabled: parse_var("STORE_ENABLED", defaults.enabled)?,
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        })
    }
}

/// In-memory response cache configuration
#[derive(Debug, Clone)]
pub struct CacheEnvConfig {
    pub ttl_secs: u64,
}

impl Default for CacheEnvConfig {
    fn default() -> Self {
        Self { ttl_secs: 60 }
    }
}

impl CacheEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ttl_secs: parse_var("RESPONSE_CACHE_TTL_SECS", Self::default().ttl_secs)?,
        })
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
