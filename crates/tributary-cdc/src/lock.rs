//! # Distributed Lock
//!
//! Structural edits of a source's join tree must not interleave. Every edit
//! runs under a named lease taken from a [`LockManager`]:
//!
//! - acquisition is retried `attempts` times, sleeping `wait` in between, and
//!   fails with [`CdcError::LockTimeout`] once the budget is spent
//! - a lease expires after `ttl`, so a crashed holder frees the lock
//! - only the owner that took a lease can release it
//!
//! [`TreeEditor`] wraps load / mutate / save of the persisted tree in one
//! lease and always releases it, whether the edit succeeds or not.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let editor = TreeEditor::new(state, Arc::new(MemoryLockManager::new()), LockConfig::default());
//!
//! let removed = editor.edit(|tree| tree.delete_subtree("orders")).await?;
//! ```

use crate::config::LockConfig;
use crate::error::{CdcError, Result};
use crate::inference::{check_join_types, JoinTypeCheck};
use crate::join_tree::{ColumnPair, JoinKind, JoinTree, TableRef};
use crate::state::SourceState;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tributary_rdbc::schema::TableDescriptor;
use uuid::Uuid;

/// Lease-based named locks
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Take `name` for `owner` unless someone else holds an unexpired lease.
    ///
    /// Re-acquiring by the current owner renews the lease.
    async fn try_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Release `name` if `owner` holds it
    async fn release(&self, name: &str, owner: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

/// In-process lock manager
#[derive(Debug, Default)]
pub struct MemoryLockManager {
    leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryLockManager {
    /// No locks held
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of `name`, ignoring expired leases
    pub fn holder(&self, name: &str) -> Option<String> {
        let leases = self.leases.lock();
        leases
            .get(name)
            .filter(|l| l.expires_at > Instant::now())
            .map(|l| l.owner.clone())
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn try_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        if let Some(lease) = leases.get(name) {
            if lease.expires_at > now && lease.owner != owner {
                return Ok(false);
            }
        }
        leases.insert(
            name.to_string(),
            Lease {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<bool> {
        let mut leases = self.leases.lock();
        match leases.get(name) {
            Some(lease) if lease.owner == owner => {
                leases.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// A held lease. Release it explicitly; an abandoned guard expires by TTL.
#[must_use = "a lock guard must be released"]
pub struct LockGuard {
    manager: Arc<dyn LockManager>,
    name: String,
    owner: String,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish()
    }
}

impl LockGuard {
    /// Lock name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owner token of this lease
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Give the lock back
    pub async fn release(self) -> Result<()> {
        if !self.manager.release(&self.name, &self.owner).await? {
            warn!(lock = %self.name, "Lease expired before release");
        }
        Ok(())
    }
}

/// Acquire `name` within the attempt budget of `config`
pub async fn acquire_with_retry(
    manager: Arc<dyn LockManager>,
    name: &str,
    config: &LockConfig,
) -> Result<LockGuard> {
    let owner = Uuid::new_v4().to_string();
    let attempts = config.attempts.max(1);

    for attempt in 1..=attempts {
        if manager.try_acquire(name, &owner, config.ttl).await? {
            debug!(lock = name, attempt, "Lock acquired");
            return Ok(LockGuard {
                manager,
                name: name.to_string(),
                owner,
            });
        }
        if attempt < attempts {
            warn!(
                lock = name,
                attempt,
                attempts,
                wait_ms = config.wait.as_millis() as u64,
                "Lock busy, waiting"
            );
            tokio::time::sleep(config.wait).await;
        }
    }

    Err(CdcError::lock_timeout(format!(
        "{} still held after {} attempts",
        name, attempts
    )))
}

// ============================================================================
// Locked tree edits
// ============================================================================

/// Serialized load / mutate / save of one source's join tree
pub struct TreeEditor {
    state: SourceState,
    locks: Arc<dyn LockManager>,
    config: LockConfig,
}

impl TreeEditor {
    /// Editor over `state`
    pub fn new(state: SourceState, locks: Arc<dyn LockManager>, config: LockConfig) -> Self {
        Self {
            state,
            locks,
            config,
        }
    }

    /// Run `work` under the tree lock.
    ///
    /// The lock is released in every case; a release failure is reported
    /// only if the work succeeded.
    async fn locked<T, Fut>(&self, work: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let name = self.state.keys().tree_lock();
        let guard = acquire_with_retry(self.locks.clone(), &name, &self.config).await?;

        let outcome = work.await;
        let released = guard.release().await;
        let value = outcome?;
        released?;
        Ok(value)
    }

    /// Run `f` on the stored tree under the tree lock.
    ///
    /// The tree is saved only when `f` succeeds.
    pub async fn edit<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut JoinTree) -> Result<T> + Send,
        T: Send,
    {
        self.locked(async {
            let mut tree = self.state.load_tree().await?.unwrap_or_default();
            let value = f(&mut tree)?;
            self.state.save_tree(&tree).await?;
            Ok(value)
        })
        .await
    }

    /// Build the best tree for `tables` and store it with the table selection.
    ///
    /// Tree, selection and descriptors are written under one lease.
    pub async fn rebuild(&self, tables: &[TableDescriptor]) -> Result<JoinTree> {
        let names: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        let tree = self
            .locked(async {
                let tree = JoinTree::build_best(tables)?;
                self.state.save_tree(&tree).await?;
                self.state.save_active_tables(&names).await?;
                for table in tables {
                    self.state.save_descriptor(table).await?;
                }
                Ok(tree)
            })
            .await?;
        info!(
            source = self.state.keys().source(),
            tables = names.len(),
            remainder = tree.remainder().len(),
            "Join tree rebuilt"
        );
        Ok(tree)
    }

    /// Apply user-confirmed conditions between `parent` and `child`.
    ///
    /// Conditions are type-checked first. Nothing is written unless every
    /// condition is valid; the error joins are returned for display.
    pub async fn save_new_joins(
        &self,
        parent: &str,
        child: &str,
        kind: JoinKind,
        pairs: &[ColumnPair],
        tables: &[TableDescriptor],
    ) -> Result<JoinTypeCheck> {
        let find = |name: &str| {
            tables
                .iter()
                .find(|t| t.name == name)
                .ok_or_else(|| CdcError::validation(format!("no descriptor for table {}", name)))
        };
        let check = check_join_types(find(parent)?, find(child)?, pairs);
        if !check.is_clean() {
            for err in &check.errors {
                warn!(parent, child, "Rejected join: {}", err.reason());
            }
            return Ok(check);
        }

        let valid = check.valid.clone();
        self.edit(|tree| tree.update_edge(parent, child, kind, valid))
            .await?;
        Ok(check)
    }

    /// Remove `table` and its subtree, returning the tables moved to the remainder
    pub async fn delete_table(&self, table: &str) -> Result<Vec<TableRef>> {
        self.edit(|tree| tree.delete_subtree(table)).await
    }

    /// Attach `table` wherever an edge is found
    pub async fn attach(&self, table: &TableDescriptor, tables: &[TableDescriptor]) -> Result<bool> {
        self.edit(|tree| tree.attach_anywhere(table, tables)).await
    }

    /// Move `table` under `new_parent`
    pub async fn reparent(&self, new_parent: &str, table: &str, tables: &[TableDescriptor]) -> Result<bool> {
        self.edit(|tree| tree.reparent(new_parent, table, tables)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_owner_semantics() {
        let manager = MemoryLockManager::new();
        let ttl = Duration::from_secs(30);
        assert!(manager.try_acquire("l", "a", ttl).await.unwrap());
        assert!(!manager.try_acquire("l", "b", ttl).await.unwrap());
        assert!(manager.try_acquire("l", "a", ttl).await.unwrap());
        assert!(!manager.release("l", "b").await.unwrap());
        assert_eq!(manager.holder("l").as_deref(), Some("a"));
        assert!(manager.release("l", "a").await.unwrap());
        assert!(manager.holder("l").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expires() {
        let manager = MemoryLockManager::new();
        assert!(manager.try_acquire("l", "a", Duration::from_secs(30)).await.unwrap());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(manager.try_acquire("l", "b", Duration::from_secs(30)).await.unwrap());
    }
}
