//! PostgreSQL backend for tributary-rdbc
//!
//! A [`Connection`] over tokio-postgres. Server errors keep their SQLSTATE:
//! `40P01` becomes [`Error::Deadlock`], `55P03` becomes [`Error::LockWait`],
//! everything else a query error carrying the code.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_postgres::types::{ToSql, Type};
use tracing::{debug, error};

use crate::connection::{
    Connection, ConnectionFactory, ConnectionHandle, DatabaseType, SourceDescriptor,
};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

fn value_to_sql(value: &Value) -> BoxedParam {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Uuid(u) => Box::new(*u),
        Value::Json(j) => Box::new(j.clone()),
    }
}

fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let values = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();
    Row::new(columns, values)
}

fn get<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> Option<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Value {
    let value = match *pg_type {
        Type::BOOL => get::<bool>(row, idx).map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx).map(Value::Int16),
        Type::INT4 => get::<i32>(row, idx).map(Value::Int32),
        Type::INT8 => get::<i64>(row, idx).map(Value::Int64),
        Type::FLOAT4 => get::<f32>(row, idx).map(|f| Value::Float64(f64::from(f))),
        Type::FLOAT8 => get::<f64>(row, idx).map(Value::Float64),
        Type::NUMERIC => get::<rust_decimal::Decimal>(row, idx).map(Value::Decimal),
        Type::BYTEA => get::<Vec<u8>>(row, idx).map(Value::Bytes),
        Type::DATE => get::<chrono::NaiveDate>(row, idx).map(Value::Date),
        Type::TIME => get::<chrono::NaiveTime>(row, idx).map(Value::Time),
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx).map(Value::DateTime),
        Type::TIMESTAMPTZ => {
            get::<chrono::DateTime<chrono::Utc>>(row, idx).map(Value::DateTimeTz)
        }
        Type::UUID => get::<uuid::Uuid>(row, idx).map(Value::Uuid),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx).map(Value::Json),
        // text-like and anything else readable as text
        _ => get::<String>(row, idx).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

fn map_pg_error(err: tokio_postgres::Error, sql: &str) -> Error {
    match err.code() {
        Some(state) => {
            let code = state.code().to_string();
            let message = err
                .as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| err.to_string());
            match code.as_str() {
                "40P01" => Error::deadlock(code, message),
                "55P03" => Error::lock_wait(code, message),
                _ => Error::Query {
                    message,
                    code: Some(code),
                    sql: Some(sql.to_string()),
                },
            }
        }
        None if err.is_closed() => Error::connection_with_source("connection closed", err),
        None => Error::query_with_sql(err.to_string(), sql),
    }
}

/// PostgreSQL connection
pub struct PgConnection {
    client: tokio_postgres::Client,
    closed: AtomicBool,
}

impl PgConnection {
    /// Wrap a connected client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) || self.client.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.check_open()?;
        let boxed: Vec<BoxedParam> = params.iter().map(value_to_sql).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = self
            .client
            .query(sql, &refs)
            .await
            .map_err(|e| map_pg_error(e, sql))?;
        Ok(rows.iter().map(pg_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.check_open()?;
        let boxed: Vec<BoxedParam> = params.iter().map(value_to_sql).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        self.client
            .execute(sql, &refs)
            .await
            .map_err(|e| map_pg_error(e, sql))
    }

    /// DDL batches (plpgsql bodies included) go through the simple protocol
    async fn execute_batch(&self, statements: &[String]) -> Result<Vec<u64>> {
        self.check_open()?;
        let mut results = Vec::with_capacity(statements.len());
        for sql in statements {
            self.client
                .batch_execute(sql)
                .await
                .map_err(|e| map_pg_error(e, sql))?;
            results.push(0);
        }
        Ok(results)
    }

    async fn is_valid(&self) -> bool {
        self.check_open().is_ok() && self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, source: &SourceDescriptor) -> Result<ConnectionHandle> {
        if source.product != DatabaseType::Postgres {
            return Err(Error::config(format!(
                "PostgreSQL factory cannot open a {} source",
                source.product
            )));
        }
        let url = source.url()?;
        debug!(url = %source.redacted_url(), "Connecting to PostgreSQL");

        let (client, connection) = tokio_postgres::connect(url.as_str(), tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Arc::new(PgConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }
}
