//! Retry wrapper for transient lock contention
//!
//! Sources under concurrent load report deadlocks and lock-wait timeouts.
//! Both are worth retrying; nothing else is. [`retry_db_call`] wraps a single
//! database call:
//! - a recognized deadlock / lock-wait error sleeps for the kind's wait and
//!   retries, up to `max_attempts` calls in total
//! - when attempts run out the last error is logged and returned
//! - any other error is returned immediately
//!
//! # Example
//!
//! ```rust,no_run
//! use tributary_rdbc::dialect::MySqlDialect;
//! use tributary_rdbc::resilience::{retry_db_call, RetryPolicy};
//! # use tributary_rdbc::connection::ConnectionHandle;
//! # async fn example(conn: ConnectionHandle) -> tributary_rdbc::Result<()> {
//! let policy = RetryPolicy::for_dialect(&MySqlDialect);
//! let _rows = retry_db_call(&policy, "count orders", || {
//!     conn.query("SELECT COUNT(1) AS cnt FROM orders", &[])
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::dialect::SqlDialect;
use crate::error::{Error, Result, RetryKind};

/// Default number of calls, first attempt included
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default wait after a deadlock
pub const DEFAULT_DEADLOCK_WAIT: Duration = Duration::from_millis(500);
/// Default wait after a lock-wait timeout
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(10_000);

/// Retry configuration for database calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of calls, first attempt included
    pub max_attempts: u32,
    /// Sleep after a deadlock
    #[serde(with = "crate::serde_utils::duration_ms")]
    pub deadlock_wait: Duration,
    /// Sleep after a lock-wait timeout
    #[serde(with = "crate::serde_utils::duration_ms")]
    pub lock_wait: Duration,
    /// Vendor codes recognized on generic query errors
    pub codes: BTreeMap<String, RetryKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            deadlock_wait: DEFAULT_DEADLOCK_WAIT,
            lock_wait: DEFAULT_LOCK_WAIT,
            codes: BTreeMap::new(),
        }
    }
}

impl RetryPolicy {
    /// Default policy recognizing the dialect's deadlock and lock-wait codes
    pub fn for_dialect(dialect: &dyn SqlDialect) -> Self {
        let mut policy = Self::default();
        for (code, kind) in dialect.retry_codes() {
            policy.codes.insert((*code).to_string(), *kind);
        }
        policy
    }

    /// Policy that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the maximum number of calls
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the wait after a deadlock
    pub fn with_deadlock_wait(mut self, wait: Duration) -> Self {
        self.deadlock_wait = wait;
        self
    }

    /// Set the wait after a lock-wait timeout
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Recognize an additional vendor code
    pub fn with_code(mut self, code: impl Into<String>, kind: RetryKind) -> Self {
        self.codes.insert(code.into(), kind);
        self
    }

    /// Classify an error as transient contention
    pub fn classify(&self, err: &Error) -> Option<RetryKind> {
        match err {
            Error::Deadlock { .. } => Some(RetryKind::Deadlock),
            Error::LockWait { .. } => Some(RetryKind::LockWait),
            Error::Query {
                code: Some(code), ..
            } => self.codes.get(code).copied(),
            _ => None,
        }
    }

    /// Sleep duration for a contention kind
    pub fn wait_for(&self, kind: RetryKind) -> Duration {
        match kind {
            RetryKind::Deadlock => self.deadlock_wait,
            RetryKind::LockWait => self.lock_wait,
        }
    }
}

/// Run a database call, retrying on recognized deadlock / lock-wait errors
pub async fn retry_db_call<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some(kind) = policy.classify(&err) else {
            return Err(err);
        };

        if attempt >= max_attempts {
            error!(
                operation,
                attempts = attempt,
                kind = %kind,
                "Retries exhausted: {}",
                err
            );
            return Err(err);
        }

        let wait = policy.wait_for(kind);
        warn!(
            operation,
            attempt,
            max_attempts,
            kind = %kind,
            wait_ms = wait.as_millis() as u64,
            "Transient database error, retrying: {}",
            err
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}
