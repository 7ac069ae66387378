//! Configuration module for chartfeed.
//!
//! This module provides structured configuration loading from environment variables,
//! organized by concern: Binance endpoints, Store, Cache, Streams, Server and Observability.

mod binance_config;
mod observability_config;
mod server_config;
mod store_config;
mod stream_config;

pub use binance_config::BinanceConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use server_config::ServerEnvConfig;
pub use store_config::{CacheEnvConfig, StoreEnvConfig};
pub use stream_config::StreamEnvConfig;

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Main application configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub binance: BinanceConfig,
    pub store: StoreEnvConfig,
    pub cache: CacheEnvConfig,
    pub stream: StreamEnvConfig,
    pub server: ServerEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to their defaults; malformed ones fail with
    /// the variable name in the error chain.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            binance: BinanceConfig::from_env().context("Failed to load Binance config")?,
            store: StoreEnvConfig::from_env().context("Failed to load store config")?,
            cache: CacheEnvConfig::from_env().context("Failed to load cache config")?,
            stream: StreamEnvConfig::from_env().context("Failed to load stream config")?,
            server: ServerEnvConfig::from_env().context("Failed to load server config")?,
            observability: ObservabilityEnvConfig::from_env()
                .context("Failed to load observability config")?,
        })
    }
}

/// Reads `key` and parses it, or returns `default` when unset.
fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Failed to parse {}", key)),
        Err(_) => Ok(default),
    }
}
