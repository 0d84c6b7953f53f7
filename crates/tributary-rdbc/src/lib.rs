//! # tributary-rdbc
//!
//! Relational source connectivity for the Tributary extraction/sync core.
//!
//! This crate knows how to talk to BI source databases: what their tables
//! look like, how to page through them, how to install change-capture
//! triggers, and when an error is worth retrying.
//!
//! ## Features
//!
//! - **Multi-Database Dialects**: PostgreSQL, MySQL, SQL Server, Oracle behind one [`SqlDialect`](dialect::SqlDialect) trait
//! - **Dialect Catalog**: table listing, column/index/constraint introspection, statistics, row estimates
//! - **Canonical Types**: native types mapped into a closed set, unknown types passed through
//! - **Trigger DDL**: shadow tables and AFTER INSERT/UPDATE/DELETE triggers per product
//! - **Resilient Execution**: deadlock / lock-wait retry with per-kind waits
//! - **Owned Connections**: one injected [`ConnectionHandle`](connection::ConnectionHandle) per job
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tributary_rdbc::prelude::*;
//!
//! let source = SourceDescriptor::new(DatabaseType::Postgres, "db.internal", "sales", "bi")
//!     .with_password("secret");
//! let conn = PgConnectionFactory.connect(&source).await?;
//!
//! let catalog = DialectCatalog::new(conn, source, "sales-db");
//! let tables = catalog.list_tables(&[]).await?;
//! let descriptors = catalog.inspect(&tables).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL backend via tokio-postgres
//! - `mysql` - MySQL backend via mysql_async
//! - `sqlserver` - SQL Server backend via tiberius
//! - `full` - All features enabled

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod catalog;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod resilience;
pub mod schema;
pub mod security;
pub mod serde_utils;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlserver")]
pub mod sqlserver;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result, RetryKind};

    // Value and type system
    pub use crate::types::{Row, Value};

    // Connection traits and descriptors
    pub use crate::connection::{
        Connection, ConnectionFactory, ConnectionHandle, DatabaseType, SourceDescriptor,
    };

    // Dialect types
    pub use crate::dialect::{
        dialect_for, shadow_table_name, MySqlDialect, OracleDialect, PostgresDialect, SqlDialect,
        SqlServerDialect,
    };

    // Schema types
    pub use crate::schema::{
        CanonicalType, ColumnDescriptor, ColumnType, DateInterval, ForeignKeyDescriptor,
        IndexDescriptor, StatisticsSnapshot, TableDescriptor,
    };

    // Catalog and retry
    pub use crate::catalog::DialectCatalog;
    pub use crate::resilience::{retry_db_call, RetryPolicy};

    #[cfg(feature = "postgres")]
    pub use crate::postgres::{PgConnection, PgConnectionFactory};

    #[cfg(feature = "mysql")]
    pub use crate::mysql::{MySqlConnection, MySqlConnectionFactory};

    #[cfg(feature = "sqlserver")]
    pub use crate::sqlserver::{SqlServerConnection, SqlServerConnectionFactory};
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use types::Value;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int32(42);
        let _policy = RetryPolicy::default();
        let _source = SourceDescriptor::new(DatabaseType::MySql, "localhost", "db", "root");
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(!err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_dialect_selection() {
        assert_eq!(dialect_for(DatabaseType::Postgres).name(), "PostgreSQL");
        assert_eq!(dialect_for(DatabaseType::MySql).name(), "MySQL");
        assert_eq!(dialect_for(DatabaseType::SqlServer).name(), "SQL Server");
        assert_eq!(dialect_for(DatabaseType::Oracle).name(), "Oracle");
    }

    #[test]
    fn test_canonical_names() {
        let names: Vec<_> = CanonicalType::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(
            names,
            vec!["integer", "double precision", "text", "timestamp", "boolean", "binary"]
        );
    }
}
