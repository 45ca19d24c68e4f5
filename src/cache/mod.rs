//! TTL memoization of warehouse query results.
//!
//! One cache is shared process-wide. Entries are keyed by exact SQL text
//! and expire lazily at access time; there is no background timer. A
//! per-key async lock serializes fetches for the same key, so N concurrent
//! callers of an expired or missing entry produce exactly one warehouse
//! round-trip while distinct keys stay independent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::dataset::{Column, Dataset};
use crate::warehouse::{ConnectionProvider, QueryError};

/// TTL applied by the engine when none is configured.
pub const DEFAULT_TTL_SECS: u64 = 600;

/// Per-query execution bound applied when none is configured.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default)]
struct Slot {
    dataset: Option<Arc<Dataset>>,
    fetched_at: Option<Instant>,
    /// Column list recorded on the first successful fetch; refreshes must
    /// keep matching it.
    schema: Option<Vec<Column>>,
}

impl Slot {
    fn live(&self, ttl: Duration) -> Option<Arc<Dataset>> {
        let fetched_at = self.fetched_at?;
        if fetched_at.elapsed() < ttl {
            self.dataset.clone()
        } else {
            None
        }
    }
}

/// Memoizes query results for a bounded time-to-live.
#[derive(Debug)]
pub struct QueryCache {
    provider: Arc<ConnectionProvider>,
    query_timeout: Duration,
    slots: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
}

impl QueryCache {
    pub fn new(provider: Arc<ConnectionProvider>, query_timeout: Duration) -> Self {
        Self {
            provider,
            query_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached dataset for `sql` if one younger than `ttl`
    /// exists, otherwise execute the query and cache the result.
    ///
    /// Expiry is not an error; it just triggers the re-fetch. Execution
    /// failures, timeouts, and schema drift surface as [`QueryError`] with
    /// the query text attached, and the previous entry (if any) is left in
    /// place for callers that tolerate stale data.
    pub async fn run_query(&self, sql: &str, ttl: Duration) -> Result<Arc<Dataset>, QueryError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(sql.to_string()).or_default().clone()
        };

        // Holding the slot lock across the fetch is what guarantees
        // at-most-one-fetch-per-key; callers queued here re-check the entry
        // they were waiting for.
        let mut slot = slot.lock().await;
        if let Some(dataset) = slot.live(ttl) {
            tracing::debug!(query = sql, "query cache hit");
            return Ok(dataset);
        }

        let warehouse = self.provider.get().await?;
        let started = Instant::now();
        let dataset = match tokio::time::timeout(self.query_timeout, warehouse.execute(sql)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(QueryError::Timeout {
                    query: sql.to_string(),
                    timeout_secs: self.query_timeout.as_secs(),
                })
            }
        };

        match &slot.schema {
            Some(expected) if expected != dataset.columns() => {
                return Err(QueryError::SchemaMismatch {
                    query: sql.to_string(),
                    details: format!(
                        "expected columns [{}], got [{}]",
                        column_names(expected),
                        column_names(dataset.columns())
                    ),
                });
            }
            Some(_) => {}
            None => slot.schema = Some(dataset.columns().to_vec()),
        }

        tracing::info!(
            query = sql,
            rows = dataset.num_rows(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query executed"
        );

        let dataset = Arc::new(dataset);
        slot.dataset = Some(dataset.clone());
        slot.fetched_at = Some(Instant::now());
        Ok(dataset)
    }

    /// Drop the entry for `sql`, forcing the next call to re-fetch.
    pub async fn invalidate(&self, sql: &str) {
        self.slots.lock().await.remove(sql);
    }

    /// Drop every slot whose entry has outlived `ttl`.
    ///
    /// The slot map grows one entry per distinct query text. The fixed
    /// mart catalog bounds that at nine, but hosts routing ad-hoc SQL
    /// through the cache should prune periodically. Slots with a fetch in
    /// flight are left alone; a pruned slot's recorded schema is forgotten
    /// with it and re-recorded on the next fetch.
    pub async fn prune_expired(&self, ttl: Duration) {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => guard.live(ttl).is_some(),
            Err(_) => true,
        });
        let dropped = before - slots.len();
        if dropped > 0 {
            tracing::debug!(dropped, remaining = slots.len(), "pruned expired cache slots");
        }
    }

    /// Number of known cache slots (including in-flight fetches).
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

fn column_names(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataType, Value};
    use crate::warehouse::{ConnectionError, Warehouse, WarehouseConnector};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct EchoWarehouse {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Warehouse for EchoWarehouse {
        async fn execute(&self, sql: &str) -> Result<Dataset, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Dataset::new(
                vec![Column::new("SQL", DataType::Text)],
                vec![vec![Value::Text(sql.to_string())]],
            )
            .unwrap())
        }
    }

    #[derive(Debug)]
    struct EchoConnector {
        warehouse: Arc<EchoWarehouse>,
    }

    #[async_trait]
    impl WarehouseConnector for EchoConnector {
        async fn connect(&self) -> Result<Arc<dyn Warehouse>, ConnectionError> {
            Ok(self.warehouse.clone())
        }
    }

    fn cache() -> (QueryCache, Arc<EchoWarehouse>) {
        let warehouse = Arc::new(EchoWarehouse {
            calls: AtomicUsize::new(0),
        });
        let provider = Arc::new(ConnectionProvider::new(Arc::new(EchoConnector {
            warehouse: warehouse.clone(),
        })));
        (
            QueryCache::new(provider, Duration::from_secs(60)),
            warehouse,
        )
    }

    #[tokio::test]
    async fn test_live_entry_skips_warehouse() {
        let (cache, warehouse) = cache();
        let ttl = Duration::from_secs(600);

        let first = cache.run_query("SELECT * FROM mart_a", ttl).await.unwrap();
        let second = cache.run_query("SELECT * FROM mart_a", ttl).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(warehouse.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refetches() {
        let (cache, warehouse) = cache();

        cache
            .run_query("SELECT * FROM mart_a", Duration::ZERO)
            .await
            .unwrap();
        cache
            .run_query("SELECT * FROM mart_a", Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(warehouse.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_cached_separately() {
        let (cache, warehouse) = cache();
        let ttl = Duration::from_secs(600);

        cache.run_query("SELECT * FROM mart_a", ttl).await.unwrap();
        cache.run_query("SELECT * FROM mart_b", ttl).await.unwrap();

        assert_eq!(warehouse.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_prune_drops_only_expired_slots() {
        let (cache, warehouse) = cache();
        let ttl = Duration::from_secs(600);

        cache.run_query("SELECT * FROM mart_a", ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.run_query("SELECT * FROM mart_b", ttl).await.unwrap();
        assert_eq!(cache.len().await, 2);

        // mart_a is older than the prune horizon, mart_b is not
        cache.prune_expired(Duration::from_millis(30)).await;
        assert_eq!(cache.len().await, 1);

        // The pruned query refetches, the survivor stays cached
        cache.run_query("SELECT * FROM mart_a", ttl).await.unwrap();
        cache.run_query("SELECT * FROM mart_b", ttl).await.unwrap();
        assert_eq!(warehouse.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let (cache, warehouse) = cache();
        let ttl = Duration::from_secs(600);

        cache.run_query("SELECT * FROM mart_a", ttl).await.unwrap();
        cache.invalidate("SELECT * FROM mart_a").await;
        cache.run_query("SELECT * FROM mart_a", ttl).await.unwrap();

        assert_eq!(warehouse.calls.load(Ordering::SeqCst), 2);
    }
}
