use super::parse_var;
use anyhow::Result;
use std::env;

/// Downstream HTTP/WebSocket listener configuration
#[derive(Debug, Clone)]
pub struct ServerEnvConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerEnvConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bind_address: env::var("SERVER_BIND_ADDRESS").unwrap_or(defaults.bind_address),
            port: parse_var("SERVER_PORT", defaults.port)?,
        })
    }

    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
