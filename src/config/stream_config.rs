//! Live stream configuration: reconnect policy and fan-out buffers.

use super::parse_var;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct StreamEnvConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    /// Rolling candles kept per kline stream for late joiners
    pub candle_history: usize,
    /// Rolling trades kept per trade stream for late joiners
    pub trade_history: usize,
    /// Per-consumer outbound queue capacity
    pub consumer_buffer: usize,
}

impl Default for StreamEnvConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 3000,
            candle_history: 100,
            trade_history: 30,
            consumer_buffer: 256,
        }
    }
}

impl StreamEnvConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            max_reconnect_attempts: parse_var(
                "STREAM_MAX_RECONNECT_ATTEMPTS",
                d.max_reconnect_attempts,
            )?,
            reconnect_base_delay_ms: parse_var(
                "STREAM_RECONNECT_BASE_DELAY_MS",
                d.reconnect_base_delay_ms,
            )?,
            candle_history: parse_var("STREAM_CANDLE_HISTORY", d.candle_history)?,
            trade_history: parse_var("STREAM_TRADE_HISTORY", d.trade_history)?,
            consumer_buffer: parse_var("STREAM_CONSUMER_BUFFER", d.consumer_buffer)?.max(1),
        })
    }
}
