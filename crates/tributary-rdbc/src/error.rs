//! Error types for tributary-rdbc
//!
//! Errors are classified so callers can tell transient lock contention
//! (deadlock, lock wait) apart from everything else:
//! - Retriable errors (deadlock, lock wait)
//! - Fatal errors (connection, validation, type conversion)
//!
//! Connection failures are not retriable at this layer.

use std::fmt;
use thiserror::Error;

/// Result type for tributary-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Source unreachable or connection dropped
    Connection,
    /// Query execution errors
    Query,
    /// Deadlock detected by the server (retriable)
    Deadlock,
    /// Lock wait timeout reported by the server (retriable)
    LockWait,
    /// Malformed user input
    Validation,
    /// Type conversion errors
    TypeConversion,
    /// Configuration error
    Configuration,
    /// Schema-related errors
    Schema,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are retried by the resilience layer
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Deadlock | Self::LockWait)
    }
}

/// Kind of transient contention reported by a database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    /// Transaction chosen as deadlock victim
    Deadlock,
    /// Lock could not be obtained in time
    LockWait,
}

impl fmt::Display for RetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deadlock => write!(f, "deadlock"),
            Self::LockWait => write!(f, "lock_wait"),
        }
    }
}

/// Main error type for tributary-rdbc
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        /// Vendor error code (SQLSTATE or native number)
        code: Option<String>,
        sql: Option<String>,
    },

    /// Deadlock detected
    #[error("deadlock detected [{code}]: {message}")]
    Deadlock { code: String, message: String },

    /// Lock wait timeout
    #[error("lock wait timeout [{code}]: {message}")]
    LockWait { code: String, message: String },

    /// Malformed input (bad identifier, empty selection)
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Type conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Schema error (missing table, unexpected metadata shape)
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Table not found
    #[error("table not found: {table}")]
    TableNotFound { table: String },

    /// Unsupported operation for this dialect
    #[error("unsupported: {message}")]
    Unsupported { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Deadlock { .. } => ErrorCategory::Deadlock,
            Self::LockWait { .. } => ErrorCategory::LockWait,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Schema { .. } | Self::TableNotFound { .. } => ErrorCategory::Schema,
            Self::Unsupported { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Vendor error code carried by this error, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            Self::Deadlock { code, .. } | Self::LockWait { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            code: None,
            sql: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            code: None,
            sql: Some(sql.into()),
        }
    }

    /// Create a query error carrying a vendor error code
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            code: Some(code.into()),
            sql: None,
        }
    }

    /// Create a deadlock error
    pub fn deadlock(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Deadlock {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a lock wait error
    pub fn lock_wait(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LockWait {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Deadlock => write!(f, "deadlock"),
            Self::LockWait => write!(f, "lock_wait"),
            Self::Validation => write!(f, "validation"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Configuration => write!(f, "configuration"),
            Self::Schema => write!(f, "schema"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retriable() {
        assert!(ErrorCategory::Deadlock.is_retriable());
        assert!(ErrorCategory::LockWait.is_retriable());

        assert!(!ErrorCategory::Connection.is_retriable());
        assert!(!ErrorCategory::Validation.is_retriable());
        assert!(!ErrorCategory::Query.is_retriable());
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::deadlock("40P01", "victim").is_retriable());
        assert!(Error::lock_wait("1205", "wait").is_retriable());

        assert!(!Error::connection("refused").is_retriable());
        assert!(!Error::database("42P01", "relation missing").is_retriable());
    }

    #[test]
    fn test_error_code() {
        assert_eq!(Error::database("1213", "x").code(), Some("1213"));
        assert_eq!(Error::deadlock("40P01", "x").code(), Some("40P01"));
        assert_eq!(Error::validation("x").code(), None);
    }

    #[test]
    fn test_error_display() {
        let err = Error::connection("connection refused");
        assert!(err.to_string().contains("connection refused"));

        let err = Error::deadlock("1213", "try restarting transaction");
        assert!(err.to_string().contains("1213"));
    }
}
