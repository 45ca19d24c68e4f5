use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::cache::{QueryCache, DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_TTL_SECS};
use crate::config::AppConfig;
use crate::dataset::Dataset;
use crate::marts::DatasetLoader;
use crate::warehouse::{ConnectionProvider, QueryError, SnowflakeConnector, WarehouseConnector};

/// The explicitly-owned service object behind the dashboard.
///
/// Constructed once at process start and passed by reference to whatever
/// renders the page; owns the connection provider, the query cache, and
/// the mart loader. There is no module-level global state.
#[derive(Debug)]
pub struct DashboardEngine {
    cache: Arc<QueryCache>,
    loader: DatasetLoader,
    ttl: Duration,
}

impl DashboardEngine {
    pub fn builder() -> DashboardEngineBuilder {
        DashboardEngineBuilder::new()
    }

    /// Build an engine from validated application configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        Self::builder()
            .connector(Arc::new(SnowflakeConnector::new(config.warehouse.clone())))
            .ttl(Duration::from_secs(config.cache.ttl_secs))
            .query_timeout(Duration::from_secs(config.cache.query_timeout_secs))
            .build()
    }

    /// The mart catalog reader.
    pub fn datasets(&self) -> &DatasetLoader {
        &self.loader
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Run an ad-hoc query through the cache with the engine's TTL.
    ///
    /// Each distinct statement occupies a cache slot until it is
    /// invalidated or reclaimed via `cache().prune_expired(..)`; hosts
    /// issuing unbounded ad-hoc SQL should prune periodically.
    pub async fn run_query(&self, sql: &str) -> Result<Arc<Dataset>, QueryError> {
        self.cache.run_query(sql, self.ttl).await
    }
}

/// Builder for [`DashboardEngine`].
///
/// The connector seam exists so tests can inject a fake warehouse; real
/// deployments go through [`DashboardEngine::from_config`].
#[derive(Debug, Default)]
pub struct DashboardEngineBuilder {
    connector: Option<Arc<dyn WarehouseConnector>>,
    ttl: Option<Duration>,
    query_timeout: Option<Duration>,
}

impl DashboardEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(mut self, connector: Arc<dyn WarehouseConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<DashboardEngine> {
        let connector = self
            .connector
            .ok_or_else(|| anyhow::anyhow!("engine requires a warehouse connector"))?;
        let ttl = self.ttl.unwrap_or(Duration::from_secs(DEFAULT_TTL_SECS));
        let query_timeout = self
            .query_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS));

        let provider = Arc::new(ConnectionProvider::new(connector));
        let cache = Arc::new(QueryCache::new(provider, query_timeout));
        let loader = DatasetLoader::new(cache.clone(), ttl);

        tracing::debug!(
            ttl_secs = ttl.as_secs(),
            query_timeout_secs = query_timeout.as_secs(),
            "dashboard engine ready"
        );

        Ok(DashboardEngine { cache, loader, ttl })
    }
}
