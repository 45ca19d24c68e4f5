use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_TTL_SECS};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Snowflake session parameters.
///
/// The password is intentionally absent from checked-in config files; it
/// is supplied via the `MARTDASH_WAREHOUSE_PASSWORD` environment variable
/// (or any secrets store that exports one).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarehouseConfig {
    pub account: String,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub warehouse: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Seconds a cached query result stays live.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Upper bound on a single query execution.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

fn default_query_timeout_secs() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load(config_path: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::File::with_name(config_path));

        // Add environment variables with prefix MARTDASH_
        // Example: MARTDASH_WAREHOUSE_PASSWORD=...
        builder = builder.add_source(
            config::Environment::with_prefix("MARTDASH")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("account", &self.warehouse.account),
            ("user", &self.warehouse.user),
            ("warehouse", &self.warehouse.warehouse),
            ("database", &self.warehouse.database),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("Warehouse config requires '{}'", field);
            }
        }

        if self.warehouse.password.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!(
                "Warehouse password not set; supply MARTDASH_WAREHOUSE_PASSWORD \
                 instead of embedding it in config files"
            );
        }

        if self.cache.query_timeout_secs == 0 {
            anyhow::bail!("cache.query_timeout_secs must be greater than zero");
        }

        Ok(())
    }
}
