//! The fixed catalog of mart queries behind the dashboard.
//!
//! Every query is static SQL against a pre-aggregated warehouse view; no
//! user input is ever interpolated. The loader is stateless and reads
//! through the shared [`QueryCache`], so repeated render cycles within the
//! TTL cost no warehouse round-trips.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::QueryCache;
use crate::dataset::Dataset;
use crate::warehouse::QueryError;

/// Rollup sentinels emitted by the warehouse CUBE views. The filtered cube
/// queries exclude rows carrying these values; the full variants keep them.
pub const ALL_CATEGORIES: &str = "ALL CATEGORIES";
pub const ALL_MONTHS: &str = "ALL MONTHS";
pub const ALL_METHODS: &str = "ALL METHODS";
pub const ALL_STATUSES: &str = "ALL STATUSES";

/// A named mart query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mart {
    MonthlySales,
    SalesByCategory,
    SalesByClientType,
    SalesByClient,
    CubeCategoryMonth,
    CubePaymentStatus,
    CubeCategoryMonthFull,
    CubePaymentStatusFull,
    SummaryFacts,
}

impl Mart {
    pub const ALL: [Mart; 9] = [
        Mart::MonthlySales,
        Mart::SalesByCategory,
        Mart::SalesByClientType,
        Mart::SalesByClient,
        Mart::CubeCategoryMonth,
        Mart::CubePaymentStatus,
        Mart::CubeCategoryMonthFull,
        Mart::CubePaymentStatusFull,
        Mart::SummaryFacts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Mart::MonthlySales => "monthly_sales",
            Mart::SalesByCategory => "sales_by_category",
            Mart::SalesByClientType => "sales_by_client_type",
            Mart::SalesByClient => "sales_by_client",
            Mart::CubeCategoryMonth => "cube_category_month",
            Mart::CubePaymentStatus => "cube_payment_status",
            Mart::CubeCategoryMonthFull => "cube_category_month_full",
            Mart::CubePaymentStatusFull => "cube_payment_status_full",
            Mart::SummaryFacts => "summary_facts",
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Mart::MonthlySales => "SELECT * FROM mart_monthly_sales ORDER BY month",
            Mart::SalesByCategory => "SELECT * FROM mart_sales_by_category",
            Mart::SalesByClientType => "SELECT * FROM mart_sales_by_client_type",
            Mart::SalesByClient => "SELECT * FROM mart_sales_by_client",
            Mart::CubeCategoryMonth => {
                "SELECT * FROM mart_cube_category_month \
                 WHERE category != 'ALL CATEGORIES' AND month != 'ALL MONTHS'"
            }
            Mart::CubePaymentStatus => {
                "SELECT * FROM mart_cube_payment_status \
                 WHERE payment_method != 'ALL METHODS' AND order_status != 'ALL STATUSES'"
            }
            Mart::CubeCategoryMonthFull => "SELECT * FROM mart_cube_category_month",
            Mart::CubePaymentStatusFull => "SELECT * FROM mart_cube_payment_status",
            Mart::SummaryFacts => {
                "SELECT COUNT(DISTINCT order_id) AS orders, \
                 COUNT(DISTINCT client_id) AS clients, \
                 SUM(quantity) AS units, \
                 SUM(price_unit * quantity) AS revenue \
                 FROM fact_orders"
            }
        }
    }
}

/// The single-row aggregate backing the KPI cards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummaryFacts {
    pub orders: i64,
    pub clients: i64,
    pub units: f64,
    pub revenue: f64,
}

impl SummaryFacts {
    fn from_dataset(dataset: &Dataset) -> Result<Self, String> {
        if dataset.num_rows() != 1 {
            return Err(format!("expected exactly 1 row, got {}", dataset.num_rows()));
        }

        let int_field = |name: &str| {
            dataset
                .cell(0, name)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| format!("missing or non-numeric column '{}'", name))
        };
        let float_field = |name: &str| {
            dataset
                .cell(0, name)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| format!("missing or non-numeric column '{}'", name))
        };

        Ok(SummaryFacts {
            orders: int_field("ORDERS")?,
            clients: int_field("CLIENTS")?,
            units: float_field("UNITS")?,
            revenue: float_field("REVENUE")?,
        })
    }
}

/// Every dataset a full page render needs, fetched in one pass.
///
/// The full cube variants back on-demand detail tabs and are loaded
/// individually via [`DatasetLoader::load`] instead.
#[derive(Debug, Clone)]
pub struct DashboardData {
    pub monthly_sales: Arc<Dataset>,
    pub sales_by_category: Arc<Dataset>,
    pub sales_by_client_type: Arc<Dataset>,
    pub sales_by_client: Arc<Dataset>,
    pub cube_category_month: Arc<Dataset>,
    pub cube_payment_status: Arc<Dataset>,
    pub summary: SummaryFacts,
}

/// Stateless reader for the mart catalog.
#[derive(Debug, Clone)]
pub struct DatasetLoader {
    cache: Arc<QueryCache>,
    ttl: Duration,
}

impl DatasetLoader {
    pub fn new(cache: Arc<QueryCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Load one named dataset through the cache.
    #[tracing::instrument(skip(self), fields(mart = mart.name()))]
    pub async fn load(&self, mart: Mart) -> Result<Arc<Dataset>, QueryError> {
        self.cache.run_query(mart.sql(), self.ttl).await
    }

    /// Parse the KPI aggregate into typed fields.
    pub async fn summary(&self) -> Result<SummaryFacts, QueryError> {
        let dataset = self.load(Mart::SummaryFacts).await?;
        SummaryFacts::from_dataset(&dataset).map_err(|details| QueryError::SchemaMismatch {
            query: Mart::SummaryFacts.sql().to_string(),
            details,
        })
    }

    /// The first `n` rows of `sales_by_client` (the view is ordered by
    /// revenue warehouse-side).
    pub async fn top_clients(&self, n: usize) -> Result<Dataset, QueryError> {
        let by_client = self.load(Mart::SalesByClient).await?;
        Ok(by_client.head(n))
    }

    /// Fetch everything a page render needs, concurrently.
    ///
    /// No dataset depends on another, so ordering is irrelevant; the first
    /// error aborts the bundle. Callers that prefer partial rendering
    /// should call [`load`](Self::load) per mart instead.
    pub async fn load_all(&self) -> Result<DashboardData, QueryError> {
        let (
            monthly_sales,
            sales_by_category,
            sales_by_client_type,
            sales_by_client,
            cube_category_month,
            cube_payment_status,
            summary,
        ) = futures::try_join!(
            self.load(Mart::MonthlySales),
            self.load(Mart::SalesByCategory),
            self.load(Mart::SalesByClientType),
            self.load(Mart::SalesByClient),
            self.load(Mart::CubeCategoryMonth),
            self.load(Mart::CubePaymentStatus),
            self.summary(),
        )?;

        Ok(DashboardData {
            monthly_sales,
            sales_by_category,
            sales_by_client_type,
            sales_by_client,
            cube_category_month,
            cube_payment_status,
            summary,
        })
    }
}
