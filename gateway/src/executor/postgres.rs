//! PostgreSQL pools
//!
//! Pools are built with deadpool; every checkout runs with a session statement
//! timeout and a read-only default transaction before the statement is sent.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, SslMode, Timeouts,
};
use guarded_query_core::ConnectionDescriptor;
use log::debug;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use super::{PoolFactory, QueryPool, QueryRows};
use crate::error::{to_config_error, to_connection_error, GatewayError, Result};

/// Boxed statement parameter
type Param = Box<dyn ToSql + Sync + Send>;

/// Creates deadpool-backed PostgreSQL pools
#[derive(Debug, Clone)]
pub struct PostgresPoolFactory {
    /// Maximum connections per pool
    max_size: usize,

    /// Connect and checkout timeout
    connect_timeout: Duration,
}

impl PostgresPoolFactory {
    /// Create a new factory
    pub fn new(max_size: usize, connect_timeout: Duration) -> Self {
        Self {
            max_size,
            connect_timeout,
        }
    }
}

#[async_trait]
impl PoolFactory for PostgresPoolFactory {
    async fn create_pool(&self, descriptor: ConnectionDescriptor) -> Result<Arc<dyn QueryPool>> {
        let mut cfg = Config::new();
        cfg.host = Some(descriptor.host.clone());
        cfg.port = Some(descriptor.port);
        cfg.dbname = Some(descriptor.database.clone());
        cfg.user = Some(descriptor.username.clone());
        cfg.password = Some(descriptor.password.expose().to_string());
        cfg.application_name = Some("guarded-query".to_string());
        cfg.connect_timeout = Some(self.connect_timeout);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut timeouts = Timeouts::new();
        timeouts.wait = Some(self.connect_timeout);
        timeouts.create = Some(self.connect_timeout);
        timeouts.recycle = Some(self.connect_timeout);
        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts = timeouts;
        cfg.pool = Some(pool_config);

        let created = if descriptor.tls {
            cfg.ssl_mode = Some(SslMode::Require);
            let connector = native_tls::TlsConnector::builder()
                .build()
                .map_err(to_connection_error)?;
            let tls = postgres_native_tls::MakeTlsConnector::new(connector);
            cfg.create_pool(Some(Runtime::Tokio1), tls)
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        };
        let pool = created.map_err(to_config_error)?;

        debug!(
            "Created {} pool for {}@{}:{}/{}",
            descriptor.dialect.as_str(),
            descriptor.username,
            descriptor.host,
            descriptor.port,
            descriptor.database
        );
        Ok(Arc::new(PostgresPool { pool }))
    }
}

/// A deadpool pool for one external database
pub struct PostgresPool {
    pool: Pool,
}

#[async_trait]
impl QueryPool for PostgresPool {
    async fn run_select(&self, sql: &str, params: &[Value], timeout: Duration) -> Result<QueryRows> {
        let work = async {
            let client = self.pool.get().await?;
            client
                .batch_execute(&format!(
                    "SET statement_timeout = {}; SET default_transaction_read_only = on",
                    timeout.as_millis()
                ))
                .await?;

            let statement = client.prepare(sql).await?;
            let bound = bind_params(params, statement.params())?;
            let refs: Vec<&(dyn ToSql + Sync)> = bound
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();

            let rows = client.query(&statement, &refs).await?;
            let columns = statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;

            Ok::<_, GatewayError>(QueryRows { columns, rows })
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| GatewayError::Timeout(timeout.as_secs()))?
    }
}

fn bind_params(params: &[Value], types: &[Type]) -> Result<Vec<Param>> {
    if params.len() != types.len() {
        return Err(GatewayError::Execution(format!(
            "Statement expects {} parameter(s), {} given",
            types.len(),
            params.len()
        )));
    }

    params
        .iter()
        .zip(types)
        .enumerate()
        .map(|(i, (value, ty))| bind_param(value, ty).map_err(|msg| {
            GatewayError::Execution(format!("Parameter ${}: {}", i + 1, msg))
        }))
        .collect()
}

fn bind_param(value: &Value, ty: &Type) -> std::result::Result<Param, String> {
    let param: Param = match *ty {
        Type::BOOL => Box::new(typed(value, "boolean", Value::as_bool)?),
        Type::INT2 => Box::new(typed(value, "smallint", |v| v.as_i64().and_then(|n| i16::try_from(n).ok()))?),
        Type::INT4 => Box::new(typed(value, "integer", |v| v.as_i64().and_then(|n| i32::try_from(n).ok()))?),
        Type::INT8 => Box::new(typed(value, "bigint", Value::as_i64)?),
        Type::FLOAT4 => Box::new(typed(value, "real", |v| v.as_f64().map(|n| n as f32))?),
        Type::FLOAT8 => Box::new(typed(value, "double precision", Value::as_f64)?),
        Type::NUMERIC => Box::new(typed(value, "numeric", |v| match v {
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            Value::String(s) => Decimal::from_str(s).ok(),
            _ => None,
        })?),
        Type::JSON | Type::JSONB => Box::new(value.clone()),
        Type::UUID => Box::new(typed(value, "uuid", |v| v.as_str().and_then(|s| Uuid::parse_str(s).ok()))?),
        Type::TIMESTAMPTZ => Box::new(typed(value, "timestamptz", |v| {
            v.as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
        })?),
        Type::TIMESTAMP => Box::new(typed(value, "timestamp", |v| {
            v.as_str()
                .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok())
        })?),
        Type::DATE => Box::new(typed(value, "date", |v| {
            v.as_str().and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        })?),
        _ => Box::new(match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
    };
    Ok(param)
}

/// Convert a JSON value into an optional typed value; JSON null binds SQL NULL
fn typed<T, F>(value: &Value, expected: &str, convert: F) -> std::result::Result<Option<T>, String>
where
    F: FnOnce(&Value) -> Option<T>,
{
    if value.is_null() {
        return Ok(None);
    }
    convert(value)
        .map(Some)
        .ok_or_else(|| format!("expected {}, got {}", expected, value))
}

fn decode_row(row: &Row) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_value(row, idx, column.type_())?);
    }
    Ok(out)
}

fn decode_value(row: &Row, idx: usize, ty: &Type) -> Result<Value> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(Value::from),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(Value::from),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::from),
        Type::OID => row.try_get::<_, Option<u32>>(idx)?.map(Value::from),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .and_then(|f| Number::from_f64(f64::from(f)))
            .map(Value::Number),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)?
            .and_then(Number::from_f64)
            .map(Value::Number),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(|d| {
            d.to_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(d.to_string()))
        }),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx)?,
        Type::UUID => row
            .try_get::<_, Option<Uuid>>(idx)?
            .map(|u| Value::String(u.to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|t| Value::String(t.to_rfc3339())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|t| Value::String(t.to_string())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|d| Value::String(d.to_string())),
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(text) => text.map(Value::String),
            Err(_) => Some(Value::String(format!("<{}>", ty.name()))),
        },
    };
    Ok(value.unwrap_or(Value::Null))
}
