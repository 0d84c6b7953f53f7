//! # Staging Store
//!
//! Document-oriented holding area for extracted rows.
//!
//! One set of four collections exists per (source, table selection):
//!
//! | Kind | Prefix | Role |
//! |------|--------|------|
//! | Canonical | `sttm_datasource_` | mirror of the source rows |
//! | Delta | `sttm_datasource_delta_` | append-only change log |
//! | Keys | `sttm_datasource_keys_` | row keys currently present upstream |
//! | AllKeys | `sttm_datasource_keysall_` | staged keys for deletion detection |
//!
//! Collection names end in a hash of (host, port, owning user, sorted table
//! list), so re-extracting the same selection reuses the same collections.
//!
//! Records are addressed by [`RecordId`] (row key plus sequence) and carry a
//! [`RecordState`]. Stores keep both as indexes so that paging by state costs
//! O(page). Durable stores live in [`crate::stores`].

use crate::error::{CdcError, Result};
use crate::row_identity::{hash_text, RowKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use tributary_rdbc::types::Value;

/// Column values of a staged row
pub type Document = BTreeMap<String, Value>;

/// Lifecycle state of a staged record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    /// Present in the canonical mirror
    Loaded,
    /// Detected change, not yet merged
    New,
    /// Merged (delta) or confirmed present (all-keys)
    Synced,
    /// Confirmed absent upstream; purged next cycle
    Deleted,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Loaded => "LOADED",
            Self::New => "NEW",
            Self::Synced => "SYNCED",
            Self::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Change operation carried by a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    /// Row inserted
    #[default]
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
}

impl ChangeOp {
    /// Map a shadow-table `cdc_delta_flag` (1, 2, 3)
    pub fn from_delta_flag(flag: i64) -> Option<Self> {
        match flag {
            1 => Some(Self::Insert),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Shadow-table flag value
    pub const fn delta_flag(self) -> i64 {
        match self {
            Self::Insert => 1,
            Self::Update => 2,
            Self::Delete => 3,
        }
    }
}

/// Address of one record: row key plus sequence.
///
/// Canonical and key collections hold one record per key at sequence 0.
/// The delta collection is append-only and gives every captured change its
/// own sequence, so several changes to one row sit side by side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    /// Row identity
    pub key: RowKey,
    /// Capture sequence within the collection
    pub seq: u64,
}

impl RecordId {
    /// Id of `key` at `seq`
    pub fn new(key: RowKey, seq: u64) -> Self {
        Self { key, seq }
    }
}

impl From<RowKey> for RecordId {
    fn from(key: RowKey) -> Self {
        Self { key, seq: 0 }
    }
}

/// One staged copy of a source row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRecord {
    /// Row identity
    pub key: RowKey,
    /// Capture sequence, 0 outside the delta collection
    #[serde(default)]
    pub seq: u64,
    /// Lifecycle state
    pub state: RecordState,
    /// When the row was captured
    pub captured_at: DateTime<Utc>,
    /// Change operation
    #[serde(default)]
    pub op: ChangeOp,
    /// Column values (empty for key-only collections)
    #[serde(default)]
    pub data: Document,
}

impl StagingRecord {
    /// Record captured now
    pub fn new(key: RowKey, state: RecordState, data: Document) -> Self {
        Self {
            key,
            seq: 0,
            state,
            captured_at: Utc::now(),
            op: ChangeOp::Insert,
            data,
        }
    }

    /// Key-only record
    pub fn key_only(key: RowKey, state: RecordState) -> Self {
        Self::new(key, state, Document::new())
    }

    /// Set the change operation
    pub fn with_op(mut self, op: ChangeOp) -> Self {
        self.op = op;
        self
    }

    /// Set the capture timestamp
    pub fn with_captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }

    /// Set the sequence
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Address of this record
    pub fn id(&self) -> RecordId {
        RecordId::new(self.key.clone(), self.seq)
    }

    /// Whether every field of `fields` holds the same value here.
    ///
    /// Values compare by their row-identity text, so integer widths do not
    /// matter.
    pub fn matches_fields(&self, fields: &Document) -> bool {
        fields.iter().all(|(name, wanted)| {
            self.data
                .get(name)
                .is_some_and(|v| hash_text(v) == hash_text(wanted))
        })
    }
}

// ============================================================================
// Collection naming
// ============================================================================

/// Role of a collection within a set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Canonical mirror
    Canonical,
    /// Delta log
    Delta,
    /// Current upstream keys
    Keys,
    /// Staged keys for deletion detection
    AllKeys,
}

impl CollectionKind {
    /// Name prefix
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Canonical => "sttm_datasource_",
            Self::Delta => "sttm_datasource_delta_",
            Self::Keys => "sttm_datasource_keys_",
            Self::AllKeys => "sttm_datasource_keysall_",
        }
    }
}

/// The four collection names of one (source, table selection)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionNames {
    /// Shared name suffix
    pub suffix: String,
}

impl CollectionNames {
    /// Names for `tables` extracted from `host:port` on behalf of `user`.
    ///
    /// The table list is sorted first; order of selection does not matter.
    pub fn derive(host: &str, port: u16, user: &str, tables: &[String]) -> Self {
        let mut sorted: Vec<&str> = tables.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();
        let material = format!("{}{}{}{}", host, port, user, sorted.join(","));
        let digest = hex::encode(Sha256::digest(material.as_bytes()));
        Self {
            suffix: digest[..32].to_string(),
        }
    }

    /// Name of one collection
    pub fn name(&self, kind: CollectionKind) -> String {
        format!("{}{}", kind.prefix(), self.suffix)
    }

    /// Canonical mirror name
    pub fn canonical(&self) -> String {
        self.name(CollectionKind::Canonical)
    }

    /// Delta log name
    pub fn delta(&self) -> String {
        self.name(CollectionKind::Delta)
    }

    /// Current-keys name
    pub fn keys(&self) -> String {
        self.name(CollectionKind::Keys)
    }

    /// All-keys name
    pub fn all_keys(&self) -> String {
        self.name(CollectionKind::AllKeys)
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Keyed, state-indexed document collections
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Insert records, replacing any with the same [`RecordId`]. Returns the number written.
    async fn insert_many(&self, collection: &str, records: Vec<StagingRecord>) -> Result<u64>;

    /// Append records under fresh sequences, in input order. Never replaces.
    async fn append_many(&self, collection: &str, records: Vec<StagingRecord>) -> Result<u64>;

    /// Whether any record of `key` is present
    async fn contains(&self, collection: &str, key: &RowKey) -> Result<bool>;

    /// The subset of `keys` with no record, in input order
    async fn filter_missing(&self, collection: &str, keys: &[RowKey]) -> Result<Vec<RowKey>>;

    /// Records in `state`, ordered by sequence, capture time, then key
    async fn page_by_state(
        &self,
        collection: &str,
        state: RecordState,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StagingRecord>>;

    /// Move `ids` to `state`. Returns the number of records changed.
    async fn set_state(&self, collection: &str, ids: &[RecordId], state: RecordState) -> Result<u64>;

    /// Remove every record of `keys`. Returns the number removed.
    async fn delete_keys(&self, collection: &str, keys: &[RowKey]) -> Result<u64>;

    /// Remove every record in `state`. Returns the number removed.
    async fn delete_by_state(&self, collection: &str, state: RecordState) -> Result<u64>;

    /// Number of records
    async fn count(&self, collection: &str) -> Result<u64>;

    /// Number of records in `state`
    async fn count_by_state(&self, collection: &str, state: RecordState) -> Result<u64>;

    /// Latest record of `key`
    async fn get(&self, collection: &str, key: &RowKey) -> Result<Option<StagingRecord>>;

    /// Every record of `key`, oldest sequence first
    async fn history(&self, collection: &str, key: &RowKey) -> Result<Vec<StagingRecord>>;

    /// Records whose data holds all of `fields` (see [`StagingRecord::matches_fields`])
    async fn find_by_fields(&self, collection: &str, fields: &Document) -> Result<Vec<StagingRecord>>;

    /// Drop the collection and its indexes
    async fn drop_collection(&self, collection: &str) -> Result<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

type IndexEntry = (u64, DateTime<Utc>, RowKey);

fn index_entry(record: &StagingRecord) -> IndexEntry {
    (record.seq, record.captured_at, record.key.clone())
}

fn key_range(key: &RowKey) -> std::ops::RangeInclusive<RecordId> {
    RecordId::new(key.clone(), 0)..=RecordId::new(key.clone(), u64::MAX)
}

/// Serialized form of one collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct CollectionSnapshot {
    pub(crate) next_seq: u64,
    pub(crate) records: Vec<StagingRecord>,
}

#[derive(Debug, Default)]
struct MemoryCollection {
    records: BTreeMap<RecordId, StagingRecord>,
    by_state: HashMap<RecordState, BTreeSet<IndexEntry>>,
    next_seq: u64,
}

impl MemoryCollection {
    fn from_snapshot(snapshot: CollectionSnapshot) -> Self {
        let mut coll = Self::default();
        for record in snapshot.records {
            coll.insert(record);
        }
        coll.next_seq = coll.next_seq.max(snapshot.next_seq);
        coll
    }

    fn snapshot(&self) -> CollectionSnapshot {
        CollectionSnapshot {
            next_seq: self.next_seq,
            records: self.records.values().cloned().collect(),
        }
    }

    fn insert(&mut self, record: StagingRecord) {
        let id = record.id();
        self.remove(&id);
        self.next_seq = self.next_seq.max(record.seq);
        self.by_state
            .entry(record.state)
            .or_default()
            .insert(index_entry(&record));
        self.records.insert(id, record);
    }

    fn append(&mut self, record: StagingRecord) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.insert(record.with_seq(seq));
    }

    fn remove(&mut self, id: &RecordId) -> Option<StagingRecord> {
        let old = self.records.remove(id)?;
        if let Some(index) = self.by_state.get_mut(&old.state) {
            index.remove(&index_entry(&old));
        }
        Some(old)
    }

    fn remove_key(&mut self, key: &RowKey) -> usize {
        let ids: Vec<RecordId> = self.records.range(key_range(key)).map(|(id, _)| id.clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).count()
    }

    fn contains_key(&self, key: &RowKey) -> bool {
        self.records.range(key_range(key)).next().is_some()
    }

    fn set_state(&mut self, id: &RecordId, state: RecordState) -> bool {
        match self.records.get(id) {
            Some(r) if r.state != state => {}
            _ => return false,
        }
        if let Some(mut record) = self.remove(id) {
            record.state = state;
            self.insert(record);
            return true;
        }
        false
    }

    fn count_state(&self, state: RecordState) -> usize {
        self.by_state.get(&state).map_or(0, BTreeSet::len)
    }
}

/// In-memory [`StagingStore`]
#[derive(Debug, Default)]
pub struct MemoryStagingStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStagingStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of existing collections
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn snapshot(&self, collection: &str) -> Option<CollectionSnapshot> {
        self.collections.read().get(collection).map(MemoryCollection::snapshot)
    }

    pub(crate) fn restore(&self, collection: &str, snapshot: CollectionSnapshot) {
        self.collections
            .write()
            .insert(collection.to_string(), MemoryCollection::from_snapshot(snapshot));
    }
}

pub(crate) fn check_collection(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CdcError::staging("collection name is empty"));
    }
    Ok(())
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn insert_many(&self, collection: &str, records: Vec<StagingRecord>) -> Result<u64> {
        check_collection(collection)?;
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();
        let n = records.len() as u64;
        for record in records {
            coll.insert(record);
        }
        Ok(n)
    }

    async fn append_many(&self, collection: &str, records: Vec<StagingRecord>) -> Result<u64> {
        check_collection(collection)?;
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();
        let n = records.len() as u64;
        for record in records {
            coll.append(record);
        }
        Ok(n)
    }

    async fn contains(&self, collection: &str, key: &RowKey) -> Result<bool> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .is_some_and(|c| c.contains_key(key)))
    }

    async fn filter_missing(&self, collection: &str, keys: &[RowKey]) -> Result<Vec<RowKey>> {
        let collections = self.collections.read();
        let mut seen = HashSet::new();
        Ok(keys
            .iter()
            .filter(|k| seen.insert(*k))
            .filter(|k| {
                !collections
                    .get(collection)
                    .is_some_and(|c| c.contains_key(k))
            })
            .cloned()
            .collect())
    }

    async fn page_by_state(
        &self,
        collection: &str,
        state: RecordState,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StagingRecord>> {
        let collections = self.collections.read();
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let Some(index) = coll.by_state.get(&state) else {
            return Ok(Vec::new());
        };
        Ok(index
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(seq, _, key)| coll.records.get(&RecordId::new(key.clone(), *seq)).cloned())
            .collect())
    }

    async fn set_state(&self, collection: &str, ids: &[RecordId], state: RecordState) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| coll.set_state(id, state)).count() as u64)
    }

    async fn delete_keys(&self, collection: &str, keys: &[RowKey]) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        Ok(keys.iter().map(|k| coll.remove_key(k)).sum::<usize>() as u64)
    }

    async fn delete_by_state(&self, collection: &str, state: RecordState) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let doomed = coll.by_state.remove(&state).unwrap_or_default();
        for (seq, _, key) in &doomed {
            coll.records.remove(&RecordId::new(key.clone(), *seq));
        }
        Ok(doomed.len() as u64)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let collections = self.collections.read();
        Ok(collections.get(collection).map_or(0, |c| c.records.len()) as u64)
    }

    async fn count_by_state(&self, collection: &str, state: RecordState) -> Result<u64> {
        let collections = self.collections.read();
        Ok(collections.get(collection).map_or(0, |c| c.count_state(state)) as u64)
    }

    async fn get(&self, collection: &str, key: &RowKey) -> Result<Option<StagingRecord>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|c| c.records.range(key_range(key)).next_back())
            .map(|(_, r)| r.clone()))
    }

    async fn history(&self, collection: &str, key: &RowKey) -> Result<Vec<StagingRecord>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|c| c.records.range(key_range(key)).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }

    async fn find_by_fields(&self, collection: &str, fields: &Document) -> Result<Vec<StagingRecord>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|c| {
                c.records
                    .values()
                    .filter(|r| r.matches_fields(fields))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collections.write().remove(collection);
        Ok(())
    }
}
