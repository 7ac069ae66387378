use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::application::bootstrap::persistence::PersistenceHandle;
use crate::application::market_data::{
    CachedKlineSource, HistoricalQueryService, KlineCache,
};
use crate::application::streaming::{DispatcherConfig, SubscriptionConfig};
use crate::config::{Config, StreamEnvConfig};
use crate::domain::ports::{HistoricalKlineSource, MarketStreamConnector};
use crate::infrastructure::binance::{BinanceKlinesClient, BinanceStreamConnector};
use crate::infrastructure::core::HttpClientFactory;
use crate::infrastructure::observability::Metrics;

pub struct ServicesHandle {
    pub historical: Arc<HistoricalQueryService>,
    pub kline_cache: Arc<KlineCache>,
    pub connector: Arc<dyn MarketStreamConnector>,
    pub dispatcher_config: DispatcherConfig,
}

pub struct ServicesBootstrap;

impl ServicesBootstrap {
    pub fn init(
        config: &Config,
        persistence: Option<&PersistenceHandle>,
        metrics: Metrics,
    ) -> ServicesHandle {
        let client = HttpClientFactory::create_client(
            config.binance.request_timeout(),
            config.binance.max_retries,
        );
        let upstream: Arc<dyn HistoricalKlineSource> = Arc::new(BinanceKlinesClient::new(
            client,
            config.binance.base_url.clone(),
            metrics.clone(),
        ));

        let kline_cache = Arc::new(KlineCache::new(config.cache.ttl()));
        let cached: Arc<dyn HistoricalKlineSource> = Arc::new(CachedKlineSource::new(
            upstream,
            kline_cache.clone(),
            metrics.clone(),
        ));

        let store = persistence.map(|p| p.candle_repository.clone());
        info!(
            "Historical queries: upstream {} | store {} | cache TTL {:?}",
            config.binance.base_url,
            if store.is_some() { "enabled" } else { "disabled" },
            config.cache.ttl()
        );
        let historical = Arc::new(HistoricalQueryService::new(cached, store, metrics));

        let connector: Arc<dyn MarketStreamConnector> =
            Arc::new(BinanceStreamConnector::new(config.binance.ws_url.clone()));

        ServicesHandle {
            historical,
            kline_cache,
            connector,
            dispatcher_config: dispatcher_config(&config.stream),
        }
    }
}

pub fn dispatcher_config(stream: &StreamEnvConfig) -> DispatcherConfig {
    DispatcherConfig {
        subscription: SubscriptionConfig {
            max_reconnect_attempts: stream.max_reconnect_attempts,
            reconnect_base_delay: Duration::from_millis(stream.reconnect_base_delay_ms),
        },
        candle_history: stream.candle_history,
        trade_history: stream.trade_history,
        consumer_buffer: stream.consumer_buffer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_config_from_env_config() {
        let stream = StreamEnvConfig {
            max_reconnect_attempts: 2,
            reconnect_base_delay_ms: 250,
            candle_history: 10,
            trade_history: 5,
            consumer_buffer: 8,
        };
        let config = dispatcher_config(&stream);
        assert_eq!(config.subscription.max_reconnect_attempts, 2);
        assert_eq!(config.subscription.reconnect_base_delay, Duration::from_millis(250));
        assert_eq!(config.candle_history, 10);
        assert_eq!(config.consumer_buffer, 8);
    }

    #[tokio::test]
    async fn test_services_without_store() {
        let config = Config::default();
        let services = ServicesBootstrap::init(&config, None, Metrics::new().unwrap());
        assert!(!services.historical.has_store());
        assert!(services.kline_cache.is_empty());
    }
}
