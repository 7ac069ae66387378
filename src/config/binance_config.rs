//! Binance endpoint configuration parsing from environment variables.
//!
//! Only public market-data endpoints are used, so no API keys are read.

use super::parse_var;
use anyhow::Result;
use std::env;
use std::time::Duration;

/// Binance REST + stream endpoint configuration
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub base_url: String,
    pub ws_url: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            ws_url: "wss://stream.binance.com:9443".to_string(),
            request_timeout_secs: 10,
            max_retries: 3,
        }
    }
}

impl BinanceConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            base_url: env::var("BINANCE_BASE_URL").unwrap_or(defaults.base_url),
            ws_url: env::var("BINANCE_WS_URL").unwrap_or(defaults.ws_url),
            request_timeout_secs: parse_var(
                "BINANCE_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            max_retries: parse_var("BINANCE_MAX_RETRIES", defaults.max_retries)?,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
