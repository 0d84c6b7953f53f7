//! Connection traits for tributary-rdbc
//!
//! Core abstractions for source connectivity:
//! - Connection: query execution against one source database
//! - ConnectionFactory: opens connections from a [`SourceDescriptor`]
//! - SourceDescriptor: product, host, port, database and credentials
//!
//! Connections are owned handles. A background job opens its own connection
//! and keeps it for its lifetime; nothing here is process-global.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// A connection to a source database
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement, returns affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a batch of parameterless statements in order
    async fn execute_batch(&self, statements: &[String]) -> Result<Vec<u64>> {
        let mut results = Vec::with_capacity(statements.len());
        for sql in statements {
            results.push(self.execute(sql, &[]).await?);
        }
        Ok(results)
    }

    /// Execute a query and return the first row
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Shared handle to a connection owned by one job
pub type ConnectionHandle = Arc<dyn Connection>;

/// Supported source database products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// PostgreSQL
    #[serde(alias = "postgresql")]
    Postgres,
    /// MySQL/MariaDB
    #[serde(alias = "mariadb")]
    MySql,
    /// Microsoft SQL Server
    #[serde(alias = "mssql")]
    SqlServer,
    /// Oracle Database
    Oracle,
}

impl DatabaseType {
    /// Default TCP port for the product
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::MySql => 3306,
            Self::SqlServer => 1433,
            Self::Oracle => 1521,
        }
    }

    /// URL scheme used when rendering connection URLs
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::SqlServer => "mssql",
            Self::Oracle => "oracle",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => write!(f, "PostgreSQL"),
            Self::MySql => write!(f, "MySQL"),
            Self::SqlServer => write!(f, "SQL Server"),
            Self::Oracle => write!(f, "Oracle"),
        }
    }
}

impl FromStr for DatabaseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlserver" | "mssql" | "sql server" => Ok(Self::SqlServer),
            "oracle" => Ok(Self::Oracle),
            other => Err(Error::validation(format!(
                "unsupported database product: {}",
                other
            ))),
        }
    }
}

/// Connection descriptor for one source
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Database product
    pub product: DatabaseType,
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Database name
    pub db: String,
    /// Login
    pub login: String,
    /// Password
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("product", &self.product)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

impl SourceDescriptor {
    /// Create a descriptor using the product's default port
    pub fn new(
        product: DatabaseType,
        host: impl Into<String>,
        db: impl Into<String>,
        login: impl Into<String>,
    ) -> Self {
        Self {
            product,
            host: host.into(),
            port: product.default_port(),
            db: db.into(),
            login: login.into(),
            password: String::new(),
        }
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Render a connection URL, credentials included
    pub fn url(&self) -> Result<url::Url> {
        let base = format!(
            "{}://{}:{}/{}",
            self.product.scheme(),
            self.host,
            self.port,
            self.db
        );
        let mut url = url::Url::parse(&base)
            .map_err(|e| Error::config(format!("invalid source address: {}", e)))?;
        url.set_username(&self.login)
            .map_err(|_| Error::config("login cannot be set on source url"))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| Error::config("password cannot be set on source url"))?;
        }
        Ok(url)
    }

    /// Connection URL with the password masked, safe for logs
    pub fn redacted_url(&self) -> String {
        match self.url() {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("***"));
                }
                parsed.to_string()
            }
            Err(_) => "***".to_string(),
        }
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection to the described source
    async fn connect(&self, source: &SourceDescriptor) -> Result<ConnectionHandle>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}
