use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::{ConnectionError, QueryError};
use crate::dataset::Dataset;

/// A live warehouse session: SQL text in, tabular dataset out.
///
/// The trait seam exists so tests can substitute a scripted backend for
/// the real Snowflake driver.
#[async_trait]
pub trait Warehouse: Send + Sync + std::fmt::Debug {
    async fn execute(&self, sql: &str) -> Result<Dataset, QueryError>;
}

/// Opens warehouse sessions using configured credentials.
#[async_trait]
pub trait WarehouseConnector: Send + Sync + std::fmt::Debug {
    async fn connect(&self) -> Result<Arc<dyn Warehouse>, ConnectionError>;
}

/// Caches one warehouse handle for the life of the process.
///
/// The first `get` connects; later calls return the same `Arc`. There is
/// no pooling and no explicit close; the session is dropped with the
/// process.
#[derive(Debug)]
pub struct ConnectionProvider {
    connector: Arc<dyn WarehouseConnector>,
    handle: OnceCell<Arc<dyn Warehouse>>,
}

impl ConnectionProvider {
    pub fn new(connector: Arc<dyn WarehouseConnector>) -> Self {
        Self {
            connector,
            handle: OnceCell::new(),
        }
    }

    /// Return the shared handle, connecting on first use.
    ///
    /// A connect failure propagates and leaves nothing cached; the next
    /// call attempts a fresh connect. Retry policy belongs to the caller.
    pub async fn get(&self) -> Result<Arc<dyn Warehouse>, ConnectionError> {
        self.handle
            .get_or_try_init(|| async {
                tracing::info!("opening warehouse connection");
                self.connector.connect().await
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct NullWarehouse;

    #[async_trait]
    impl Warehouse for NullWarehouse {
        async fn execute(&self, _sql: &str) -> Result<Dataset, QueryError> {
            Ok(Dataset::empty(vec![]))
        }
    }

    #[derive(Debug)]
    struct CountingConnector {
        connects: AtomicUsize,
        fail: bool,
    }

    impl CountingConnector {
        fn new(fail: bool) -> Self {
            Self {
                connects: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl WarehouseConnector for CountingConnector {
        async fn connect(&self) -> Result<Arc<dyn Warehouse>, ConnectionError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ConnectionError::Unreachable("warehouse suspended".into()));
            }
            Ok(Arc::new(NullWarehouse))
        }
    }

    #[tokio::test]
    async fn test_connects_once_and_reuses_handle() {
        let connector = Arc::new(CountingConnector::new(false));
        let provider = ConnectionProvider::new(connector.clone());

        let first = provider.get().await.unwrap();
        let second = provider.get().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_propagates_without_caching() {
        let connector = Arc::new(CountingConnector::new(true));
        let provider = ConnectionProvider::new(connector.clone());

        assert!(matches!(
            provider.get().await,
            Err(ConnectionError::Unreachable(_))
        ));
        // Nothing was cached, so the next caller attempts a fresh connect.
        assert!(provider.get().await.is_err());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }
}
