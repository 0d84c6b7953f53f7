//! SQL Server backend for tributary-rdbc
//!
//! A [`Connection`] over tiberius (TDS 7.3+). Parameters are bound as typed
//! TDS parameters (`@P1`, `@P2`, ...) and never interpolated. Server error
//! `1205` becomes [`Error::Deadlock`], `1222` becomes [`Error::LockWait`].

use async_trait::async_trait;
use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;
use tiberius::{AuthMethod, Client, ColumnData, ColumnType, Config};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::connection::{
    Connection, ConnectionFactory, ConnectionHandle, DatabaseType, SourceDescriptor,
};
use crate::dialect::{SqlDialect, SqlServerDialect};
use crate::error::{Error, Result, RetryKind};
use crate::types::{Row, Value};

type TdsClient = Client<Compat<TcpStream>>;

/// Owned parameter bound through the TDS protocol
struct SqlParam(Value);

impl tiberius::ToSql for SqlParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match &self.0 {
            Value::Null => ColumnData::String(None),
            Value::Bool(b) => ColumnData::Bit(Some(*b)),
            Value::Int16(n) => ColumnData::I16(Some(*n)),
            Value::Int32(n) => ColumnData::I32(Some(*n)),
            Value::Int64(n) => ColumnData::I64(Some(*n)),
            Value::Float64(n) => ColumnData::F64(Some(*n)),
            Value::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            Value::Bytes(b) => ColumnData::Binary(Some(Cow::Borrowed(b.as_slice()))),
            Value::Uuid(u) => ColumnData::Guid(Some(*u)),
            // SQL Server converts ISO 8601 text implicitly
            Value::Date(d) => ColumnData::String(Some(Cow::Owned(d.format("%Y-%m-%d").to_string()))),
            Value::Time(t) => ColumnData::String(Some(Cow::Owned(t.format("%H:%M:%S%.f").to_string()))),
            Value::DateTime(dt) => ColumnData::String(Some(Cow::Owned(
                dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            ))),
            Value::DateTimeTz(dt) => ColumnData::String(Some(Cow::Owned(
                dt.format("%Y-%m-%dT%H:%M:%S%.f%:z").to_string(),
            ))),
            Value::Decimal(d) => ColumnData::String(Some(Cow::Owned(d.to_string()))),
            Value::Json(j) => ColumnData::String(Some(Cow::Owned(j.to_string()))),
        }
    }
}

fn get<'a, T>(row: &'a tiberius::Row, idx: usize) -> Option<T>
where
    T: tiberius::FromSql<'a>,
{
    row.try_get::<T, _>(idx).ok().flatten()
}

fn tiberius_to_value(row: &tiberius::Row, idx: usize, column_type: ColumnType) -> Value {
    let value = match column_type {
        ColumnType::Bit | ColumnType::Bitn => get::<bool>(row, idx).map(Value::Bool),
        ColumnType::Int1 => get::<u8>(row, idx).map(|n| Value::Int16(i16::from(n))),
        ColumnType::Int2 => get::<i16>(row, idx).map(Value::Int16),
        ColumnType::Int4 => get::<i32>(row, idx).map(Value::Int32),
        ColumnType::Int8 => get::<i64>(row, idx).map(Value::Int64),
        // nullable ints carry their width in the value
        ColumnType::Intn => get::<i64>(row, idx)
            .map(Value::Int64)
            .or_else(|| get::<i32>(row, idx).map(Value::Int32))
            .or_else(|| get::<i16>(row, idx).map(Value::Int16))
            .or_else(|| get::<u8>(row, idx).map(|n| Value::Int16(i16::from(n)))),
        ColumnType::Float4 => get::<f32>(row, idx).map(|f| Value::Float64(f64::from(f))),
        ColumnType::Float8 | ColumnType::Floatn => get::<f64>(row, idx)
            .map(Value::Float64)
            .or_else(|| get::<f32>(row, idx).map(|f| Value::Float64(f64::from(f)))),
        ColumnType::Decimaln | ColumnType::Numericn | ColumnType::Money | ColumnType::Money4 => {
            get::<tiberius::numeric::Numeric>(row, idx).map(|n| {
                let text = n.to_string();
                rust_decimal::Decimal::from_str(&text)
                    .map(Value::Decimal)
                    .unwrap_or(Value::String(text))
            })
        }
        ColumnType::Guid => get::<uuid::Uuid>(row, idx).map(Value::Uuid),
        ColumnType::Daten => get::<chrono::NaiveDate>(row, idx).map(Value::Date),
        ColumnType::Timen => get::<chrono::NaiveTime>(row, idx).map(Value::Time),
        ColumnType::Datetime
        | ColumnType::Datetime4
        | ColumnType::Datetimen
        | ColumnType::Datetime2 => get::<chrono::NaiveDateTime>(row, idx).map(Value::DateTime),
        ColumnType::DatetimeOffsetn => {
            get::<chrono::DateTime<chrono::Utc>>(row, idx).map(Value::DateTimeTz)
        }
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => {
            get::<&[u8]>(row, idx).map(|b| Value::Bytes(b.to_vec()))
        }
        _ => get::<&str>(row, idx).map(|s| Value::String(s.to_string())),
    };
    value.unwrap_or(Value::Null)
}

fn tiberius_row_to_row(row: &tiberius::Row) -> Row {
    let columns = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| tiberius_to_value(row, i, col.column_type()))
        .collect();
    Row::new(columns, values)
}

/// Map a server error number onto the error taxonomy
fn server_error(code: u32, message: String, sql: &str) -> Error {
    let code = code.to_string();
    match SqlServerDialect.classify_error_code(&code) {
        Some(RetryKind::Deadlock) => Error::deadlock(code, message),
        Some(RetryKind::LockWait) => Error::lock_wait(code, message),
        None => Error::Query {
            message,
            code: Some(code),
            sql: Some(sql.to_string()),
        },
    }
}

fn map_tiberius_error(err: tiberius::error::Error, sql: &str) -> Error {
    match err {
        tiberius::error::Error::Server(token) => {
            server_error(token.code(), token.message().to_string(), sql)
        }
        err @ tiberius::error::Error::Io { .. } => {
            Error::connection_with_source("SQL Server I/O failure", err)
        }
        other => Error::query_with_sql(other.to_string(), sql),
    }
}

/// SQL Server connection
pub struct SqlServerConnection {
    client: Mutex<Option<TdsClient>>,
}

impl SqlServerConnection {
    /// Wrap an authenticated client
    pub fn new(client: TdsClient) -> Self {
        Self {
            client: Mutex::new(Some(client)),
        }
    }
}

#[async_trait]
impl Connection for SqlServerConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| Error::connection("connection is closed"))?;
        let owned: Vec<SqlParam> = params.iter().cloned().map(SqlParam).collect();
        let refs: Vec<&dyn tiberius::ToSql> = owned.iter().map(|p| p as &dyn tiberius::ToSql).collect();

        let stream = client
            .query(sql, &refs)
            .await
            .map_err(|e| map_tiberius_error(e, sql))?;
        let rows = stream
            .into_first_result()
            .await
            .map_err(|e| map_tiberius_error(e, sql))?;
        Ok(rows.iter().map(tiberius_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| Error::connection("connection is closed"))?;
        let owned: Vec<SqlParam> = params.iter().cloned().map(SqlParam).collect();
        let refs: Vec<&dyn tiberius::ToSql> = owned.iter().map(|p| p as &dyn tiberius::ToSql).collect();

        let result = client
            .execute(sql, &refs)
            .await
            .map_err(|e| map_tiberius_error(e, sql))?;
        Ok(result.total())
    }

    async fn is_valid(&self) -> bool {
        let mut guard = self.client.lock().await;
        match guard.as_mut() {
            Some(client) => client.execute("SELECT 1", &[]).await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(client) = self.client.lock().await.take() {
            client
                .close()
                .await
                .map_err(|e| Error::connection_with_source("failed to close connection", e))?;
        }
        Ok(())
    }
}

/// SQL Server connection factory
#[derive(Debug, Clone, Default)]
pub struct SqlServerConnectionFactory {
    trust_cert: bool,
}

impl SqlServerConnectionFactory {
    /// Accept the server certificate without validation
    pub fn trusting_certificates(mut self) -> Self {
        self.trust_cert = true;
        self
    }

    fn config(&self, source: &SourceDescriptor) -> Config {
        let mut config = Config::new();
        config.host(&source.host);
        config.port(source.port);
        config.database(&source.db);
        config.authentication(AuthMethod::sql_server(&source.login, &source.password));
        if self.trust_cert {
            config.trust_cert();
        }
        config
    }
}

#[async_trait]
impl ConnectionFactory for SqlServerConnectionFactory {
    async fn connect(&self, source: &SourceDescriptor) -> Result<ConnectionHandle> {
        if source.product != DatabaseType::SqlServer {
            return Err(Error::config(format!(
                "SQL Server factory cannot open a {} source",
                source.product
            )));
        }
        let config = self.config(source);
        debug!(url = %source.redacted_url(), "Connecting to SQL Server");

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;
        tcp.set_nodelay(true)
            .map_err(|e| Error::connection_with_source("failed to configure socket", e))?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| Error::connection_with_source("failed to authenticate", e))?;
        Ok(Arc::new(SqlServerConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiberius::ToSql;

    #[test]
    fn test_server_codes_become_retry_errors() {
        assert!(matches!(
            server_error(1205, "chosen as the deadlock victim".into(), "UPDATE t"),
            Error::Deadlock { .. }
        ));
        assert!(matches!(
            server_error(1222, "Lock request time out period exceeded".into(), "UPDATE t"),
            Error::LockWait { .. }
        ));
        assert_eq!(server_error(208, "Invalid object name".into(), "SELECT 1").code(), Some("208"));
    }

    #[test]
    fn test_params_are_typed() {
        assert!(matches!(SqlParam(Value::Int64(5)).to_sql(), ColumnData::I64(Some(5))));
        assert!(matches!(SqlParam(Value::Null).to_sql(), ColumnData::String(None)));
        assert!(matches!(
            SqlParam(Value::from("o'brien")).to_sql(),
            ColumnData::String(Some(_))
        ));
    }

    #[test]
    fn test_config_uses_descriptor() {
        let source = SourceDescriptor::new(DatabaseType::SqlServer, "mssql.internal", "shop", "sa")
            .with_password("pw");
        let config = SqlServerConnectionFactory::default()
            .trusting_certificates()
            .config(&source);
        assert_eq!(config.get_addr(), "mssql.internal:1433");
    }

    #[tokio::test]
    async fn test_factory_rejects_other_products() {
        let source = SourceDescriptor::new(DatabaseType::MySql, "localhost", "db", "u");
        let err = SqlServerConnectionFactory::default()
            .connect(&source)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
