pub mod klines;
pub mod websocket;

pub use klines::BinanceKlinesClient;
pub use websocket::BinanceStreamConnector;
