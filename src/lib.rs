pub mod cache;
pub mod config;
pub mod dataset;
mod engine;
pub mod marts;
pub mod telemetry;
pub mod warehouse;

pub use cache::QueryCache;
pub use dataset::{Column, DataType, Dataset, Value};
pub use engine::{DashboardEngine, DashboardEngineBuilder};
pub use marts::{DashboardData, DatasetLoader, Mart, SummaryFacts};
pub use warehouse::{ConnectionError, ConnectionProvider, QueryError};
