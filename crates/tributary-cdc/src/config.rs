//! Sync configuration
//!
//! All durations serialize as milliseconds.
//!
//! ```json
//! {
//!   "page_size": 1000,
//!   "estimate_threshold": 100000,
//!   "strategy": "checksum",
//!   "retry": { "max_attempts": 3, "deadlock_wait": 500, "lock_wait": 10000 },
//!   "lock": { "wait": 500, "attempts": 3, "ttl": 30000 }
//! }
//! ```

use crate::capture::CdcStrategy;
use crate::error::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tributary_rdbc::catalog::DEFAULT_ESTIMATE_THRESHOLD;
use tributary_rdbc::dialect::SqlDialect;
use tributary_rdbc::resilience::RetryPolicy;
use tributary_rdbc::serde_utils::duration_ms;

/// Default rows per page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Distributed lock acquisition settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Sleep between attempts
    #[serde(with = "duration_ms")]
    pub wait: Duration,
    /// Attempts before giving up
    pub attempts: u32,
    /// Lease length; an abandoned lock frees itself after this
    #[serde(with = "duration_ms")]
    pub ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_millis(500),
            attempts: 3,
            ttl: Duration::from_secs(30),
        }
    }
}

impl LockConfig {
    /// Set the wait between attempts
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Set the number of attempts
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Set the lease length
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Settings for extraction and incremental sync of one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rows per page for every paginated loop
    pub page_size: usize,
    /// Planner estimates below this are replaced by exact counts
    pub estimate_threshold: u64,
    /// Change-detection strategy
    pub strategy: CdcStrategy,
    /// Database retry policy; dialect codes are added on top
    pub retry: RetryPolicy,
    /// Tree-edit lock settings
    pub lock: LockConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            estimate_threshold: DEFAULT_ESTIMATE_THRESHOLD,
            strategy: CdcStrategy::default(),
            retry: RetryPolicy::default(),
            lock: LockConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no loop can run with
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(CdcError::validation("page_size must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(CdcError::validation("retry.max_attempts must be positive"));
        }
        if self.lock.attempts == 0 {
            return Err(CdcError::validation("lock.attempts must be positive"));
        }
        Ok(())
    }

    /// Set the page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the strategy
    pub fn with_strategy(mut self, strategy: CdcStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the lock settings
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Retry policy with the dialect's codes merged in; configured codes win
    pub fn retry_for(&self, dialect: &dyn SqlDialect) -> RetryPolicy {
        let mut policy = RetryPolicy::for_dialect(dialect);
        policy.max_attempts = self.retry.max_attempts;
        policy.deadlock_wait = self.retry.deadlock_wait;
        policy.lock_wait = self.retry.lock_wait;
        policy
            .codes
            .extend(self.retry.codes.iter().map(|(c, k)| (c.clone(), *k)));
        policy
    }
}
