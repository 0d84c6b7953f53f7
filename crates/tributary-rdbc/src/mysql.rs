//! MySQL backend for tributary-rdbc
//!
//! A [`Connection`] over mysql_async. Server errors keep their native error
//! number: `1213` becomes [`Error::Deadlock`], `1205` becomes
//! [`Error::LockWait`], everything else a query error carrying the number.

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::{
    Connection, ConnectionFactory, ConnectionHandle, DatabaseType, SourceDescriptor,
};
use crate::dialect::{MySqlDialect, SqlDialect};
use crate::error::{Error, Result, RetryKind};
use crate::types::{Row, Value};

fn value_to_sql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int16(n) => mysql_async::Value::from(*n),
        Value::Int32(n) => mysql_async::Value::from(*n),
        Value::Int64(n) => mysql_async::Value::from(*n),
        Value::Float64(n) => mysql_async::Value::from(*n),
        // DECIMAL travels as text
        Value::Decimal(d) => mysql_async::Value::from(d.to_string()),
        Value::String(s) => mysql_async::Value::from(s.clone()),
        Value::Bytes(b) => mysql_async::Value::from(b.clone()),
        Value::Date(d) => mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Time(t) => mysql_async::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => datetime_value(dt),
        Value::DateTimeTz(dt) => datetime_value(&dt.naive_utc()),
        Value::Uuid(u) => mysql_async::Value::from(u.to_string()),
        Value::Json(j) => mysql_async::Value::from(j.to_string()),
    }
}

fn datetime_value(dt: &chrono::NaiveDateTime) -> mysql_async::Value {
    let (date, time) = (dt.date(), dt.time());
    mysql_async::Value::Date(
        date.year() as u16,
        date.month() as u8,
        date.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        time.nanosecond() / 1000,
    )
}

fn mysql_value_to_value(val: mysql_async::Value) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        // text protocol results and VARCHAR columns arrive as bytes
        mysql_async::Value::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(n) => Value::Int64(n),
        mysql_async::Value::UInt(n) => i64::try_from(n)
            .map(Value::Int64)
            .unwrap_or_else(|_| Value::String(n.to_string())),
        mysql_async::Value::Float(f) => Value::Float64(f64::from(f)),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let Some(date) = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32) else {
                return Value::Null;
            };
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                return Value::Date(date);
            }
            chrono::NaiveTime::from_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                .map(|time| Value::DateTime(chrono::NaiveDateTime::new(date, time)))
                .unwrap_or(Value::Null)
        }
        mysql_async::Value::Time(neg, days, hour, min, sec, micro) => {
            if neg || days > 0 {
                // durations outside a wall-clock day keep their text form
                let sign = if neg { "-" } else { "" };
                let hours = days * 24 + u32::from(hour);
                return Value::String(format!("{}{}:{:02}:{:02}.{:06}", sign, hours, min, sec, micro));
            }
            chrono::NaiveTime::from_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                .map(Value::Time)
                .unwrap_or(Value::Null)
        }
    }
}

fn mysql_row_to_row(mut row: mysql_async::Row) -> Row {
    let columns: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();
    let values = (0..row.len())
        .map(|i| {
            row.take::<mysql_async::Value, _>(i)
                .unwrap_or(mysql_async::Value::NULL)
        })
        .map(mysql_value_to_value)
        .collect();
    Row::new(columns, values)
}

/// Map a server error number onto the error taxonomy
fn server_error(code: u16, message: String, sql: &str) -> Error {
    let code = code.to_string();
    match MySqlDialect.classify_error_code(&code) {
        Some(RetryKind::Deadlock) => Error::deadlock(code, message),
        Some(RetryKind::LockWait) => Error::lock_wait(code, message),
        None => Error::Query {
            message,
            code: Some(code),
            sql: Some(sql.to_string()),
        },
    }
}

fn map_mysql_error(err: mysql_async::Error, sql: &str) -> Error {
    match err {
        mysql_async::Error::Server(server) => server_error(server.code, server.message, sql),
        mysql_async::Error::Io(io) => Error::connection_with_source("MySQL I/O failure", io),
        mysql_async::Error::Driver(driver) => Error::connection_with_source("MySQL driver failure", driver),
        other => Error::query_with_sql(other.to_string(), sql),
    }
}

/// MySQL connection.
///
/// mysql_async needs `&mut Conn` per call, so the connection sits behind an
/// async mutex; one job issues one statement at a time anyway.
pub struct MySqlConnection {
    conn: Mutex<Option<Conn>>,
}

impl MySqlConnection {
    /// Wrap an open connection
    pub fn new(conn: Conn) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("connection is closed"))?;
        let params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();

        let rows: Vec<mysql_async::Row> = if params.is_empty() {
            conn.query(sql).await
        } else {
            conn.exec(sql, params).await
        }
        .map_err(|e| map_mysql_error(e, sql))?;
        Ok(rows.into_iter().map(mysql_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("connection is closed"))?;
        let params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();

        // trigger DDL is not preparable; parameterless statements use the text protocol
        let outcome = if params.is_empty() {
            conn.query_drop(sql).await
        } else {
            conn.exec_drop(sql, params).await
        };
        outcome.map_err(|e| map_mysql_error(e, sql))?;
        Ok(conn.affected_rows())
    }

    async fn is_valid(&self) -> bool {
        let mut guard = self.conn.lock().await;
        match guard.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.disconnect()
                .await
                .map_err(|e| Error::connection_with_source("failed to close connection", e))?;
        }
        Ok(())
    }
}

/// MySQL connection factory
#[derive(Debug, Clone, Default)]
pub struct MySqlConnectionFactory;

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(&self, source: &SourceDescriptor) -> Result<ConnectionHandle> {
        if source.product != DatabaseType::MySql {
            return Err(Error::config(format!(
                "MySQL factory cannot open a {} source",
                source.product
            )));
        }
        let url = source.url()?;
        debug!(url = %source.redacted_url(), "Connecting to MySQL");

        let opts = Opts::from_url(url.as_str())
            .map_err(|e| Error::config(format!("invalid MySQL connection string: {}", e)))?;
        let conn = Conn::new(OptsBuilder::from_opts(opts))
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        Ok(Arc::new(MySqlConnection::new(conn)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_codes_become_retry_errors() {
        assert!(matches!(
            server_error(1213, "Deadlock found".into(), "UPDATE t"),
            Error::Deadlock { .. }
        ));
        assert!(matches!(
            server_error(1205, "Lock wait timeout exceeded".into(), "UPDATE t"),
            Error::LockWait { .. }
        ));
        let err = server_error(1146, "Table doesn't exist".into(), "SELECT 1");
        assert_eq!(err.code(), Some("1146"));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_value_round_trip_shapes() {
        assert_eq!(mysql_value_to_value(mysql_async::Value::Int(7)), Value::Int64(7));
        assert_eq!(
            mysql_value_to_value(mysql_async::Value::Bytes(b"abc".to_vec())),
            Value::String("abc".into())
        );
        assert_eq!(
            mysql_value_to_value(mysql_async::Value::Bytes(vec![0xff, 0xfe])),
            Value::Bytes(vec![0xff, 0xfe])
        );
        assert!(matches!(
            mysql_value_to_value(mysql_async::Value::Date(2024, 3, 1, 12, 30, 0, 0)),
            Value::DateTime(_)
        ));
        assert_eq!(value_to_sql(&Value::Null), mysql_async::Value::NULL);
    }

    #[tokio::test]
    async fn test_factory_rejects_other_products() {
        let source = SourceDescriptor::new(DatabaseType::Postgres, "localhost", "db", "u");
        let err = MySqlConnectionFactory.connect(&source).await.err().unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
