use std::sync::Arc;

use log::info;

use crate::api::factory::{ClientFactory, DefaultClientFactory};
use crate::api::secure_storage::AesGcmCipher;
use crate::api::error::ApiError;
use crate::config::AppConfig;
use crate::db::{Database, SqliteStore};
use crate::proxy::{IpAllocator, ProxyGateway};
use crate::sync::{
    AggregationOrchestrator, HttpPriceOracle, OrchestratorConfig, PriceOracle, SyncScheduler,
};

/// Resources owned by one running worker, built at start and dropped at stop
pub struct AppContext {
    pub config: AppConfig,
    pub database: Arc<Database>,
    pub store: Arc<SqliteStore>,
    pub allocator: Arc<dyn IpAllocator>,
    pub factory: Arc<dyn ClientFactory>,
    pub prices: Arc<dyn PriceOracle>,
}

impl AppContext {
    /// Open the database, derive the credential key and provision the proxy
    /// gateway. Any failure here stops the worker from starting.
    pub async fn initialize(config: AppConfig) -> Result<Self, ApiError> {
        let database = Arc::new(Database::new(&config.database_path)?);
        info!("Database ready at {}", config.database_path);

        let cipher = Arc::new(AesGcmCipher::new(
            &config.credentials.master_key,
            &config.credentials.salt,
        )?);
        let store = Arc::new(SqliteStore::new(Arc::clone(&database), cipher));

        let gateway = Arc::new(ProxyGateway::provision(config.proxy.clone()).await?);
        let factory = Arc::new(
            DefaultClientFactory::new(gateway.clone())
                .with_settlement_asset(&config.sync.settlement_asset),
        );

        let prices = Arc::new(HttpPriceOracle::new(
            config.price_api_url.clone(),
            config.proxy.timeout(),
            config.proxy.connect_timeout(),
        )?);

        Ok(Self::from_parts(config, database, store, gateway, factory, prices))
    }

    pub fn from_parts(
        config: AppConfig,
        database: Arc<Database>,
        store: Arc<SqliteStore>,
        allocator: Arc<dyn IpAllocator>,
        factory: Arc<dyn ClientFactory>,
        prices: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            config,
            database,
            store,
            allocator,
            factory,
            prices,
        }
    }

    pub fn orchestrator(&self) -> AggregationOrchestrator {
        AggregationOrchestrator::new(
            self.store.clone(),
            self.store.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.prices),
            OrchestratorConfig::from(&self.config.sync),
        )
    }

    pub fn scheduler(&self) -> SyncScheduler {
        SyncScheduler::new(Arc::new(self.orchestrator()), self.config.sync.interval())
    }
}
