//! Error types for extraction and CDC operations
//!
//! Database errors from tributary-rdbc are wrapped unchanged so their vendor
//! code and retry classification survive. Everything raised above the
//! database layer (tree edits, staging, locks, jobs) has its own variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for CDC operations
pub type Result<T> = std::result::Result<T, CdcError>;

/// Error categories for logging and job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Source database errors (connection, query, contention)
    Database,
    /// Distributed lock could not be obtained
    Lock,
    /// Malformed user input
    Validation,
    /// Join-tree structure errors
    Tree,
    /// Staging or state store errors
    Staging,
    /// Serialization errors (JSON)
    Serialization,
    /// I/O errors
    Io,
    /// Other/unknown errors
    Other,
}

/// CDC-specific errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// Source database error
    #[error("Database error: {0}")]
    Database(#[from] tributary_rdbc::Error),

    /// Lock not acquired within the configured budget
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Malformed user input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Join-tree structure error (unknown node, would create a cycle)
    #[error("Tree error: {0}")]
    Tree(String),

    /// Staging store error
    #[error("Staging error: {0}")]
    Staging(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Background job failure
    #[error("Job error: {0}")]
    Job(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CdcError {
    /// Create a lock timeout error
    pub fn lock_timeout(msg: impl Into<String>) -> Self {
        Self::LockTimeout(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a tree error
    pub fn tree(msg: impl Into<String>) -> Self {
        Self::Tree(msg.into())
    }

    /// Create a staging error
    pub fn staging(msg: impl Into<String>) -> Self {
        Self::Staging(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a job error
    pub fn job(msg: impl Into<String>) -> Self {
        Self::Job(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this error is retriable.
    ///
    /// Only database contention is; a lock timeout has already exhausted
    /// its own retries.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Database(e) => e.is_retriable(),
            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::TimedOut)
            }
            _ => false,
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Database(_) => ErrorCategory::Database,
            Self::LockTimeout(_) => ErrorCategory::Lock,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Tree(_) => ErrorCategory::Tree,
            Self::Staging(_) => ErrorCategory::Staging,
            Self::Serialization(_) | Self::Json(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Io,
            Self::Job(_) | Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Vendor error code from the source database, if any
    pub fn database_code(&self) -> Option<&str> {
        match self {
            Self::Database(e) => e.code(),
            _ => None,
        }
    }

    /// Get a log-safe error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "database_error",
            Self::LockTimeout(_) => "lock_timeout",
            Self::Validation(_) => "validation_error",
            Self::Tree(_) => "tree_error",
            Self::Staging(_) => "staging_error",
            Self::Serialization(_) => "serialization_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
            Self::Job(_) => "job_error",
            Self::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_errors_keep_retry_classification() {
        let err: CdcError = tributary_rdbc::Error::deadlock("40P01", "victim").into();
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Database);
        assert_eq!(err.database_code(), Some("40P01"));

        let err: CdcError = tributary_rdbc::Error::connection("refused").into();
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_lock_timeout_not_retriable() {
        let err = CdcError::lock_timeout("tree lock for source 7");
        assert!(!err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Lock);
        assert_eq!(err.error_code(), "lock_timeout");
        assert!(err.to_string().contains("source 7"));
    }

    #[test]
    fn test_json_error_conversion() {
        let err: CdcError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.category(), ErrorCategory::Serialization);
        assert_eq!(err.database_code(), None);
    }
}
