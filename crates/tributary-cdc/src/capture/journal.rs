//! Bookkeeping for trigger-based shadow tables
//!
//! One [`CdcJournalEntry`] per tracked table records where its changes are
//! captured and drained to, and how many rows went through.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use tributary_rdbc::dialect::shadow_table_name;

/// Journal record of one shadow table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdcJournalEntry {
    /// Shadow table name
    pub name: String,
    /// Tracked source table
    pub source_table: String,
    /// Delta collection the drain writes to
    pub collection: String,
    /// Shadow rows read so far
    pub rows_read: u64,
    /// Delta records written so far
    pub rows_written: u64,
    /// When capture was set up
    pub created_at: DateTime<Utc>,
    /// Last drain
    pub updated_at: DateTime<Utc>,
}

impl CdcJournalEntry {
    /// Fresh entry for `source_table`, draining into `collection`
    pub fn new(source_table: impl Into<String>, collection: impl Into<String>) -> Self {
        let source_table = source_table.into();
        let now = Utc::now();
        Self {
            name: shadow_table_name(&source_table),
            source_table,
            collection: collection.into(),
            rows_read: 0,
            rows_written: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage for journal entries, keyed by source id and shadow name
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Insert or replace an entry
    async fn upsert(&self, source_id: &str, entry: CdcJournalEntry) -> Result<()>;

    /// Entry by shadow table name
    async fn get(&self, source_id: &str, name: &str) -> Result<Option<CdcJournalEntry>>;

    /// All entries of a source, ordered by name
    async fn list(&self, source_id: &str) -> Result<Vec<CdcJournalEntry>>;

    /// Remove an entry; returns whether it existed
    async fn remove(&self, source_id: &str, name: &str) -> Result<bool>;

    /// Add to the counters of an entry and touch `updated_at`
    async fn bump(&self, source_id: &str, name: &str, read: u64, written: u64) -> Result<()>;
}

/// In-memory [`JournalStore`]
#[derive(Debug, Default)]
pub struct MemoryJournalStore {
    entries: RwLock<BTreeMap<(String, String), CdcJournalEntry>>,
}

impl MemoryJournalStore {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JournalStore for MemoryJournalStore {
    async fn upsert(&self, source_id: &str, entry: CdcJournalEntry) -> Result<()> {
        self.entries
            .write()
            .insert((source_id.to_string(), entry.name.clone()), entry);
        Ok(())
    }

    async fn get(&self, source_id: &str, name: &str) -> Result<Option<CdcJournalEntry>> {
        Ok(self
            .entries
            .read()
            .get(&(source_id.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(&self, source_id: &str) -> Result<Vec<CdcJournalEntry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|((s, _), _)| s == source_id)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn remove(&self, source_id: &str, name: &str) -> Result<bool> {
        Ok(self
            .entries
            .write()
            .remove(&(source_id.to_string(), name.to_string()))
            .is_some())
    }

    async fn bump(&self, source_id: &str, name: &str, read: u64, written: u64) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&(source_id.to_string(), name.to_string())) {
            entry.rows_read += read;
            entry.rows_written += written;
            entry.updated_at = Utc::now();
            debug!(
                "Journal {}: read {} (+{}), written {} (+{})",
                name, entry.rows_read, read, entry.rows_written, written
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_journal_counters() {
        let journal = MemoryJournalStore::new();
        let entry = CdcJournalEntry::new("orders", "sttm_datasource_delta_x");
        assert_eq!(entry.name, "_etl_orders");
        journal.upsert("1", entry).await.unwrap();

        journal.bump("1", "_etl_orders", 10, 8).await.unwrap();
        journal.bump("1", "_etl_orders", 2, 2).await.unwrap();
        let entry = journal.get("1", "_etl_orders").await.unwrap().unwrap();
        assert_eq!((entry.rows_read, entry.rows_written), (12, 10));
        assert!(entry.updated_at >= entry.created_at);

        assert!(journal.list("2").await.unwrap().is_empty());
        assert!(journal.remove("1", "_etl_orders").await.unwrap());
        assert!(!journal.remove("1", "_etl_orders").await.unwrap());
    }
}
