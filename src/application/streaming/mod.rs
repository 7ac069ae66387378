pub mod broadcast_hub;
pub mod connection;
pub mod dispatcher;
pub mod subscription_manager;

pub use dispatcher::{DispatcherConfig, GatewayError, StreamDispatcher, StreamHandle, StreamsSnapshot};
pub use subscription_manager::{StreamState, StreamStatus, SubscriptionConfig};
