//! Integration tests for the query cache and connection provider.
//!
//! All tests run against scripted warehouse backends with call counters so
//! cache behavior is observable without a live warehouse.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use martdash::warehouse::{Warehouse, WarehouseConnector};
use martdash::{
    Column, ConnectionError, ConnectionProvider, DashboardEngine, DataType, Dataset, Mart,
    QueryCache, QueryError, Value,
};

/// Warehouse that returns a fixed 3-row dataset and can be scripted to
/// fail, delay, or change its schema from a given call index.
#[derive(Debug, Default)]
struct ScriptedWarehouse {
    calls: AtomicUsize,
    fail_from_call: Option<usize>,
    rename_column_from_call: Option<usize>,
    delay: Duration,
}

impl ScriptedWarehouse {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Warehouse for ScriptedWarehouse {
    async fn execute(&self, sql: &str) -> Result<Dataset, QueryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_from_call.is_some_and(|n| call >= n) {
            return Err(QueryError::execution(sql, "forced failure"));
        }

        let revenue_column = if self.rename_column_from_call.is_some_and(|n| call >= n) {
            "REVENUE"
        } else {
            "TOTAL_REVENUE"
        };
        let columns = vec![
            Column::new("MONTH", DataType::Text),
            Column::new(revenue_column, DataType::Float),
        ];
        let rows = (0..3)
            .map(|i| {
                vec![
                    Value::Text(format!("2024-0{}", i + 1)),
                    Value::Float(100.0 * (i + 1) as f64),
                ]
            })
            .collect();
        Ok(Dataset::new(columns, rows).unwrap())
    }
}

#[derive(Debug)]
struct StaticConnector {
    warehouse: Arc<ScriptedWarehouse>,
}

#[async_trait]
impl WarehouseConnector for StaticConnector {
    async fn connect(&self) -> Result<Arc<dyn Warehouse>, ConnectionError> {
        Ok(self.warehouse.clone())
    }
}

#[derive(Debug)]
struct RefusingConnector;

#[async_trait]
impl WarehouseConnector for RefusingConnector {
    async fn connect(&self) -> Result<Arc<dyn Warehouse>, ConnectionError> {
        Err(ConnectionError::Unreachable(
            "account unreachable".to_string(),
        ))
    }
}

fn cache_over(warehouse: Arc<ScriptedWarehouse>, timeout: Duration) -> QueryCache {
    let provider = Arc::new(ConnectionProvider::new(Arc::new(StaticConnector {
        warehouse,
    })));
    QueryCache::new(provider, timeout)
}

const MONTHLY: &str = "SELECT * FROM mart_monthly_sales ORDER BY month";

#[tokio::test]
async fn test_repeat_within_ttl_runs_warehouse_once() {
    let warehouse = Arc::new(ScriptedWarehouse::default());
    let cache = cache_over(warehouse.clone(), Duration::from_secs(60));
    let ttl = Duration::from_secs(600);

    let first = cache.run_query(MONTHLY, ttl).await.unwrap();
    let second = cache.run_query(MONTHLY, ttl).await.unwrap();

    assert_eq!(warehouse.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(first.num_rows(), 3);
}

#[tokio::test]
async fn test_expired_entry_is_refetched() {
    let warehouse = Arc::new(ScriptedWarehouse::default());
    let cache = cache_over(warehouse.clone(), Duration::from_secs(60));
    let ttl = Duration::from_millis(50);

    cache.run_query(MONTHLY, ttl).await.unwrap();
    cache.run_query(MONTHLY, ttl).await.unwrap();
    assert_eq!(warehouse.calls(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    cache.run_query(MONTHLY, ttl).await.unwrap();
    assert_eq!(warehouse.calls(), 2);
}

#[tokio::test]
async fn test_cached_result_served_while_backend_would_fail() {
    // First call succeeds with 3 rows; any further execution would throw.
    let warehouse = Arc::new(ScriptedWarehouse {
        fail_from_call: Some(1),
        ..Default::default()
    });
    let cache = cache_over(warehouse.clone(), Duration::from_secs(60));
    let ttl = Duration::from_secs(600);

    let first = cache.run_query(MONTHLY, ttl).await.unwrap();
    let second = cache.run_query(MONTHLY, ttl).await.unwrap();

    assert_eq!(first.num_rows(), 3);
    assert_eq!(first, second);
    assert_eq!(warehouse.calls(), 1, "throwing path must not be invoked");
}

#[tokio::test]
async fn test_concurrent_callers_produce_one_fetch() {
    let warehouse = Arc::new(ScriptedWarehouse {
        delay: Duration::from_millis(50),
        ..Default::default()
    });
    let cache = Arc::new(cache_over(warehouse.clone(), Duration::from_secs(60)));
    let ttl = Duration::from_secs(600);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(
            async move { cache.run_query(MONTHLY, ttl).await },
        ));
    }

    for handle in handles {
        let dataset = handle.await.unwrap().unwrap();
        assert_eq!(dataset.num_rows(), 3);
    }
    assert_eq!(warehouse.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_query_times_out() {
    let warehouse = Arc::new(ScriptedWarehouse {
        delay: Duration::from_secs(120),
        ..Default::default()
    });
    let cache = cache_over(warehouse.clone(), Duration::from_secs(1));

    let err = cache
        .run_query(MONTHLY, Duration::from_secs(600))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        QueryError::Timeout {
            timeout_secs: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn test_schema_drift_on_refresh_fails() {
    let warehouse = Arc::new(ScriptedWarehouse {
        rename_column_from_call: Some(1),
        ..Default::default()
    });
    let cache = cache_over(warehouse.clone(), Duration::from_secs(60));

    cache.run_query(MONTHLY, Duration::ZERO).await.unwrap();
    let err = cache.run_query(MONTHLY, Duration::ZERO).await.unwrap_err();

    match err {
        QueryError::SchemaMismatch { query, details } => {
            assert_eq!(query, MONTHLY);
            assert!(details.contains("TOTAL_REVENUE"));
            assert!(details.contains("REVENUE"));
        }
        other => panic!("expected SchemaMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_failure_reaches_loader_unchanged() {
    let engine = DashboardEngine::builder()
        .connector(Arc::new(RefusingConnector))
        .build()
        .unwrap();

    let err = engine.datasets().load(Mart::MonthlySales).await.unwrap_err();
    assert!(matches!(
        err,
        QueryError::Connection(ConnectionError::Unreachable(_))
    ));

    // The whole bundle fails the same way.
    assert!(engine.datasets().load_all().await.is_err());
}
