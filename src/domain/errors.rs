use thiserror::Error;

/// Errors surfaced by the market-data core.
///
/// Only `UpstreamUnavailable` is worth retrying. `StoreUnavailable` never
/// reaches a downstream caller: the historical query service degrades to
/// upstream-only mode instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarketDataError {
    #[error("Upstream unavailable{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    UpstreamUnavailable {
        status: Option<u16>,
        message: String,
    },

    #[error("Store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Stream {stream} gave up after {attempts} reconnect attempts")]
    StreamReconnectExhausted { stream: String, attempts: u32 },
}

impl MarketDataError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            status,
            message: message.into(),
        }
    }

    pub fn store(reason: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable {
            reason: reason.to_string(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}
