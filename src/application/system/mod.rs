use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::bootstrap::{
    persistence::{PersistenceBootstrap, PersistenceHandle},
    services::{ServicesBootstrap, ServicesHandle},
};
use crate::application::market_data::{HistoricalQueryService, spawn_cache_sweeper};
use crate::application::streaming::{StreamDispatcher, StreamHandle};
use crate::config::Config;
use crate::infrastructure::observability::{Metrics, MetricsReporter};

const DISPATCHER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Running services shared with the downstream surfaces.
pub struct SystemHandle {
    pub historical: Arc<HistoricalQueryService>,
    pub streams: StreamHandle,
    pub metrics: Metrics,
    dispatcher: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

impl SystemHandle {
    /// Stops the dispatcher (closing every upstream connection) and the
    /// background tasks.
    pub async fn shutdown(self) {
        info!("Shutting down chartfeed services...");
        self.streams.shutdown().await;

        match tokio::time::timeout(DISPATCHER_STOP_TIMEOUT, self.dispatcher).await {
            Ok(_) => info!("Stream dispatcher stopped"),
            Err(_) => warn!("Stream dispatcher did not stop within {:?}", DISPATCHER_STOP_TIMEOUT),
        }

        for task in self.background {
            task.abort();
        }
        info!("Shutdown sequence completed");
    }
}

pub struct Application {
    pub config: Config,
    pub metrics: Metrics,
    pub persistence: Option<PersistenceHandle>,
    pub services: ServicesHandle,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!("Building chartfeed v{}...", env!("CARGO_PKG_VERSION"));

        let metrics = Metrics::new()?;
        let persistence = PersistenceBootstrap::init(&config.store).await;
        let services = ServicesBootstrap::init(&config, persistence.as_ref(), metrics.clone());

        Ok(Self {
            config,
            metrics,
            persistence,
            services,
        })
    }

    pub fn start(self) -> SystemHandle {
        let (dispatcher, streams) = StreamDispatcher::new(
            self.services.connector.clone(),
            self.services.dispatcher_config.clone(),
            self.metrics.clone(),
        );
        let dispatcher = tokio::spawn(dispatcher.run());

        let mut background = vec![spawn_cache_sweeper(self.services.kline_cache.clone())];

        if self.config.observability.enabled {
            let reporter =
                MetricsReporter::new(self.metrics.clone(), self.config.observability.interval_secs);
            background.push(tokio::spawn(reporter.run()));
        }

        info!(
            "chartfeed started (store: {}, reporter: {})",
            if self.persistence.is_some() { "on" } else { "off" },
            if self.config.observability.enabled { "on" } else { "off" }
        );

        SystemHandle {
            historical: self.services.historical.clone(),
            streams,
            metrics: self.metrics,
            dispatcher,
            background,
        }
    }
}
