pub mod candle;
pub mod gap;
pub mod interval;
pub mod symbol;
