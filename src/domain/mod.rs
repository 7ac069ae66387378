// Market data model: intervals, candles, symbols, gaps
pub mod market;

// Upstream connection and consumer push events
pub mod events;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Domain-specific error types
pub mod errors;
