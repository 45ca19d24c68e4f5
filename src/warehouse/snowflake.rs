//! Snowflake driver built on the `snowflake-api` crate.
//!
//! Results come back as Arrow record batches; this module converts them to
//! [`Dataset`] values at the driver boundary so nothing above it depends on
//! Arrow.

use std::sync::Arc;

use arrow::array::{
    Array, BooleanArray, Date32Array, Decimal128Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, LargeStringArray, StringArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray, UInt16Array,
    UInt32Array, UInt64Array, UInt8Array,
};
use arrow::datatypes::{DataType as ArrowDataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate};
use snowflake_api::{QueryResult, SnowflakeApi};

use super::provider::{Warehouse, WarehouseConnector};
use super::{ConnectionError, QueryError};
use crate::config::WarehouseConfig;
use crate::dataset::{Column, DataType, Dataset, Value};

/// Widest NUMBER(p, 0) that is guaranteed to fit in an i64 cell. Wider
/// integral decimals are kept as text so no digits are lost.
const DECIMAL_INT_MAX_PRECISION: u8 = 18;

/// Connects to Snowflake with password authentication.
///
/// The password is expected to arrive via the environment overlay
/// (`MARTDASH_WAREHOUSE_PASSWORD`), never from a config file literal.
#[derive(Debug, Clone)]
pub struct SnowflakeConnector {
    config: WarehouseConfig,
}

impl SnowflakeConnector {
    pub fn new(config: WarehouseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WarehouseConnector for SnowflakeConnector {
    async fn connect(&self) -> Result<Arc<dyn Warehouse>, ConnectionError> {
        let cfg = &self.config;
        let password = cfg.password.as_deref().ok_or_else(|| {
            ConnectionError::Config(
                "warehouse password not set; supply MARTDASH_WAREHOUSE_PASSWORD".to_string(),
            )
        })?;

        let client = SnowflakeApi::with_password_auth(
            &cfg.account,
            Some(cfg.warehouse.as_str()),
            Some(cfg.database.as_str()),
            cfg.schema.as_deref(),
            &cfg.user,
            cfg.role.as_deref(),
            password,
        )
        .map_err(|e| {
            ConnectionError::Config(format!("failed to create Snowflake client: {}", e))
        })?;

        // Fail fast on bad credentials or a suspended warehouse instead of
        // surfacing the problem on the first mart query.
        client
            .exec("SELECT 1")
            .await
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

        tracing::info!(
            account = %cfg.account,
            database = %cfg.database,
            warehouse = %cfg.warehouse,
            "connected to Snowflake"
        );

        Ok(Arc::new(SnowflakeWarehouse { client }))
    }
}

/// One live Snowflake session shared for the process lifetime.
pub struct SnowflakeWarehouse {
    client: SnowflakeApi,
}

impl std::fmt::Debug for SnowflakeWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeWarehouse").finish_non_exhaustive()
    }
}

#[async_trait]
impl Warehouse for SnowflakeWarehouse {
    async fn execute(&self, sql: &str) -> Result<Dataset, QueryError> {
        let result = self
            .client
            .exec(sql)
            .await
            .map_err(|e| QueryError::execution(sql, e))?;

        match result {
            QueryResult::Arrow(batches) => dataset_from_batches(sql, &batches),
            QueryResult::Json(_) => Err(QueryError::execution(
                sql,
                "unexpected JSON response from Snowflake",
            )),
            QueryResult::Empty => Ok(Dataset::empty(Vec::new())),
        }
    }
}

/// Convert Arrow record batches into a single dataset.
fn dataset_from_batches(sql: &str, batches: &[RecordBatch]) -> Result<Dataset, QueryError> {
    let Some(first) = batches.first() else {
        return Ok(Dataset::empty(Vec::new()));
    };

    let columns: Vec<Column> = first
        .schema()
        .fields()
        .iter()
        .map(|field| {
            Ok(Column::new(
                field.name().clone(),
                map_arrow_type(sql, field.name(), field.data_type())?,
            ))
        })
        .collect::<Result<_, QueryError>>()?;

    let mut rows = Vec::new();
    for batch in batches {
        for row in 0..batch.num_rows() {
            let cells = batch
                .columns()
                .iter()
                .map(|array| value_at(sql, array.as_ref(), row))
                .collect::<Result<Vec<Value>, QueryError>>()?;
            rows.push(cells);
        }
    }

    Dataset::new(columns, rows).map_err(|e| QueryError::execution(sql, e))
}

fn map_arrow_type(
    sql: &str,
    column: &str,
    arrow_type: &ArrowDataType,
) -> Result<DataType, QueryError> {
    let mapped = match arrow_type {
        ArrowDataType::Boolean => DataType::Bool,
        ArrowDataType::Int8
        | ArrowDataType::Int16
        | ArrowDataType::Int32
        | ArrowDataType::Int64
        | ArrowDataType::UInt8
        | ArrowDataType::UInt16
        | ArrowDataType::UInt32
        | ArrowDataType::UInt64 => DataType::Int,
        ArrowDataType::Float32 | ArrowDataType::Float64 => DataType::Float,
        // NUMBER(p, 0) is integral; any other scale carries decimals
        ArrowDataType::Decimal128(p, 0) if *p <= DECIMAL_INT_MAX_PRECISION => DataType::Int,
        ArrowDataType::Decimal128(_, 0) => DataType::Text,
        ArrowDataType::Decimal128(_, _) => DataType::Float,
        ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 => DataType::Text,
        ArrowDataType::Date32 => DataType::Date,
        ArrowDataType::Timestamp(_, _) => DataType::Timestamp,
        other => {
            return Err(QueryError::execution(
                sql,
                format!("unsupported column type {} for '{}'", other, column),
            ))
        }
    };
    Ok(mapped)
}

/// Extract one cell from an Arrow array.
fn value_at(sql: &str, array: &dyn Array, row: usize) -> Result<Value, QueryError> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }

    macro_rules! int_value {
        ($ty:ty) => {
            array
                .as_any()
                .downcast_ref::<$ty>()
                .map(|a| Value::Int(a.value(row) as i64))
        };
    }

    let value = match array.data_type() {
        ArrowDataType::Boolean => array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .map(|a| Value::Bool(a.value(row))),
        ArrowDataType::Int8 => int_value!(Int8Array),
        ArrowDataType::Int16 => int_value!(Int16Array),
        ArrowDataType::Int32 => int_value!(Int32Array),
        ArrowDataType::Int64 => int_value!(Int64Array),
        ArrowDataType::UInt8 => int_value!(UInt8Array),
        ArrowDataType::UInt16 => int_value!(UInt16Array),
        ArrowDataType::UInt32 => int_value!(UInt32Array),
        ArrowDataType::UInt64 => array.as_any().downcast_ref::<UInt64Array>().map(|a| {
            let v = a.value(row);
            i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(v.to_string()))
        }),
        ArrowDataType::Float32 => array
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|a| Value::Float(a.value(row) as f64)),
        ArrowDataType::Float64 => array
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(|a| Value::Float(a.value(row))),
        ArrowDataType::Decimal128(precision, scale) => array
            .as_any()
            .downcast_ref::<Decimal128Array>()
            .map(|a| decimal_value(a.value(row), *precision, *scale)),
        ArrowDataType::Utf8 => array
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|a| Value::Text(a.value(row).to_string())),
        ArrowDataType::LargeUtf8 => array
            .as_any()
            .downcast_ref::<LargeStringArray>()
            .map(|a| Value::Text(a.value(row).to_string())),
        ArrowDataType::Date32 => array
            .as_any()
            .downcast_ref::<Date32Array>()
            .and_then(|a| date_from_epoch_days(a.value(row)))
            .map(Value::Date),
        ArrowDataType::Timestamp(unit, _) => timestamp_value(array, row, unit),
        other => {
            return Err(QueryError::execution(
                sql,
                format!("unsupported column type {}", other),
            ))
        }
    };

    value.ok_or_else(|| {
        QueryError::execution(
            sql,
            format!("array does not match declared type {}", array.data_type()),
        )
    })
}

fn decimal_value(raw: i128, precision: u8, scale: i8) -> Value {
    if scale == 0 {
        match i64::try_from(raw) {
            Ok(v) if precision <= DECIMAL_INT_MAX_PRECISION => Value::Int(v),
            // Wide NUMBER(p, 0) columns stay textual end to end
            _ => Value::Text(raw.to_string()),
        }
    } else {
        Value::Float(raw as f64 / 10f64.powi(scale as i32))
    }
}

fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(Duration::days(days as i64))
}

fn timestamp_value(array: &dyn Array, row: usize, unit: &TimeUnit) -> Option<Value> {
    let ts = match unit {
        TimeUnit::Second => {
            let v = array.as_any().downcast_ref::<TimestampSecondArray>()?.value(row);
            DateTime::from_timestamp(v, 0)?
        }
        TimeUnit::Millisecond => {
            let v = array
                .as_any()
                .downcast_ref::<TimestampMillisecondArray>()?
                .value(row);
            DateTime::from_timestamp_millis(v)?
        }
        TimeUnit::Microsecond => {
            let v = array
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()?
                .value(row);
            DateTime::from_timestamp_micros(v)?
        }
        TimeUnit::Nanosecond => {
            let v = array
                .as_any()
                .downcast_ref::<TimestampNanosecondArray>()?
                .value(row);
            DateTime::from_timestamp_nanos(v)
        }
    };
    Some(Value::Timestamp(ts))
}
