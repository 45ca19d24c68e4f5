mod error;
mod provider;
mod snowflake;

pub use error::{ConnectionError, QueryError};
pub use provider::{ConnectionProvider, Warehouse, WarehouseConnector};
pub use snowflake::SnowflakeConnector;
