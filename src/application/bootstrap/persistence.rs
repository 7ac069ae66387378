use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::StoreEnvConfig;
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::SqliteCandleRepository;

pub struct PersistenceHandle {
    pub db: Database,
    pub candle_repository: Arc<dyn CandleRepository>,
}

pub struct PersistenceBootstrap;

impl PersistenceBootstrap {
    /// Opens the candle store, or returns `None` to run upstream-only.
    ///
    /// A store that fails to open is logged and skipped; it never aborts
    /// startup.
    pub async fn init(config: &StoreEnvConfig) -> Option<PersistenceHandle> {
        if !config.enabled {
            info!("Candle store disabled, running upstream-only");
            return None;
        }

        match Self::connect(&config.database_url).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Candle store unavailable ({:#}), running upstream-only", e);
                None
            }
        }
    }

    pub async fn connect(db_url: &str) -> Result<PersistenceHandle> {
        info!("Initializing Database at {}", db_url);

        let db = Database::new(db_url)
            .await
            .context("Failed to initialize database")?;
        let candle_repository = Arc::new(SqliteCandleRepository::new(db.pool.clone()));

        Ok(PersistenceHandle {
            db,
            candle_repository,
        })
    }
}
