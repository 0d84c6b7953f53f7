//! # Durable Stores
//!
//! Persistent implementations of [`StagingStore`] and [`JournalStore`].
//!
//! | Store | Use Case |
//! |-------|----------|
//! | [`MemoryStagingStore`] / [`MemoryJournalStore`] | Testing, one-off extractions |
//! | [`FileStagingStore`] / [`FileJournalStore`] | Single-node deployments |
//! | `PgStagingStore` / `PgJournalStore` | Shared metadata database (`postgres` feature) |
//!
//! ## File stores
//!
//! The file staging store keeps every collection in memory and writes the
//! whole collection to `{dir}/{collection}.json` after each change, through
//! a temp file and a rename. The delta sequence counter is part of the file,
//! so appends after a restart continue where they stopped.
//!
//! ```rust,ignore
//! use tributary_cdc::stores::{FileJournalStore, FileStagingStore};
//!
//! let staging = FileStagingStore::new("/var/lib/tributary/staging").await?;
//! let journal = FileJournalStore::new("/var/lib/tributary/journal.json").await?;
//! ```
//!
//! [`MemoryStagingStore`]: crate::staging::MemoryStagingStore
//! [`MemoryJournalStore`]: crate::capture::MemoryJournalStore

use crate::capture::{CdcJournalEntry, JournalStore};
use crate::error::{CdcError, Result};
use crate::row_identity::RowKey;
use crate::staging::{
    check_collection, CollectionSnapshot, Document, MemoryStagingStore, RecordId, RecordState,
    StagingRecord, StagingStore,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Write `bytes` to `path` via a sibling temp file and a rename
async fn write_atomic(path: &Path, bytes: &[u8], fsync: bool) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .await?;
    file.write_all(bytes).await?;
    if fsync {
        file.sync_all().await?;
    }
    fs::rename(&temp_path, path).await?;
    Ok(())
}

// ============================================================================
// File-based staging store
// ============================================================================

/// [`StagingStore`] persisted as one JSON file per collection
pub struct FileStagingStore {
    dir: PathBuf,
    memory: MemoryStagingStore,
    // serializes change + write so files never go back in time
    write_lock: Mutex<()>,
    fsync: bool,
}

impl FileStagingStore {
    /// Open a store in `dir`, loading existing collections
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_options(dir, true).await
    }

    /// Open a store, choosing whether writes are fsynced
    pub async fn with_options(dir: impl Into<PathBuf>, fsync: bool) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        let store = Self {
            dir,
            memory: MemoryStagingStore::new(),
            write_lock: Mutex::new(()),
            fsync,
        };
        store.load_all().await?;
        Ok(store)
    }

    /// Storage directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn validate_collection(name: &str) -> Result<()> {
        check_collection(name)?;
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CdcError::validation(format!("invalid collection name: {:?}", name)));
        }
        Ok(())
    }

    fn file_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.json", collection))
    }

    async fn load_all(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut loaded = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let Some(collection) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let contents = fs::read(&path).await?;
            match serde_json::from_slice::<CollectionSnapshot>(&contents) {
                Ok(snapshot) => {
                    self.memory.restore(collection, snapshot);
                    loaded += 1;
                }
                Err(e) => warn!("Skipping unreadable collection file {}: {}", path.display(), e),
            }
        }
        if loaded > 0 {
            info!("Loaded {} staging collections from {}", loaded, self.dir.display());
        }
        Ok(())
    }

    async fn persist(&self, collection: &str) -> Result<()> {
        let path = self.file_path(collection);
        match self.memory.snapshot(collection) {
            Some(snapshot) => {
                let json = serde_json::to_vec(&snapshot)?;
                write_atomic(&path, &json, self.fsync).await?;
                debug!(collection, records = snapshot.records.len(), "Collection saved");
            }
            None => match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }
}

#[async_trait]
impl StagingStore for FileStagingStore {
    async fn insert_many(&self, collection: &str, records: Vec<StagingRecord>) -> Result<u64> {
        Self::validate_collection(collection)?;
        let _guard = self.write_lock.lock().await;
        let n = self.memory.insert_many(collection, records).await?;
        self.persist(collection).await?;
        Ok(n)
    }

    async fn append_many(&self, collection: &str, records: Vec<StagingRecord>) -> Result<u64> {
        Self::validate_collection(collection)?;
        let _guard = self.write_lock.lock().await;
        let n = self.memory.append_many(collection, records).await?;
        self.persist(collection).await?;
        Ok(n)
    }

    async fn contains(&self, collection: &str, key: &RowKey) -> Result<bool> {
        self.memory.contains(collection, key).await
    }

    async fn filter_missing(&self, collection: &str, keys: &[RowKey]) -> Result<Vec<RowKey>> {
        self.memory.filter_missing(collection, keys).await
    }

    async fn page_by_state(
        &self,
        collection: &str,
        state: RecordState,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StagingRecord>> {
        self.memory.page_by_state(collection, state, limit, offset).await
    }

    async fn set_state(&self, collection: &str, ids: &[RecordId], state: RecordState) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let n = self.memory.set_state(collection, ids, state).await?;
        if n > 0 {
            self.persist(collection).await?;
        }
        Ok(n)
    }

    async fn delete_keys(&self, collection: &str, keys: &[RowKey]) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let n = self.memory.delete_keys(collection, keys).await?;
        if n > 0 {
            self.persist(collection).await?;
        }
        Ok(n)
    }

    async fn delete_by_state(&self, collection: &str, state: RecordState) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let n = self.memory.delete_by_state(collection, state).await?;
        if n > 0 {
            self.persist(collection).await?;
        }
        Ok(n)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        self.memory.count(collection).await
    }

    async fn count_by_state(&self, collection: &str, state: RecordState) -> Result<u64> {
        self.memory.count_by_state(collection, state).await
    }

    async fn get(&self, collection: &str, key: &RowKey) -> Result<Option<StagingRecord>> {
        self.memory.get(collection, key).await
    }

    async fn history(&self, collection: &str, key: &RowKey) -> Result<Vec<StagingRecord>> {
        self.memory.history(collection, key).await
    }

    async fn find_by_fields(&self, collection: &str, fields: &Document) -> Result<Vec<StagingRecord>> {
        self.memory.find_by_fields(collection, fields).await
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        Self::validate_collection(collection)?;
        let _guard = self.write_lock.lock().await;
        self.memory.drop_collection(collection).await?;
        self.persist(collection).await
    }
}

// ============================================================================
// File-based journal store
// ============================================================================

#[derive(Serialize, Deserialize)]
struct JournalLine {
    source_id: String,
    #[serde(flatten)]
    entry: CdcJournalEntry,
}

/// [`JournalStore`] persisted as a single JSON file
pub struct FileJournalStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<(String, String), CdcJournalEntry>>,
    fsync: bool,
}

impl FileJournalStore {
    /// Open the journal at `path`, creating its directory if needed
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_options(path, true).await
    }

    /// Open the journal, choosing whether writes are fsynced
    pub async fn with_options(path: impl Into<PathBuf>, fsync: bool) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut entries = BTreeMap::new();
        match fs::read(&path).await {
            Ok(contents) => {
                let lines: Vec<JournalLine> = serde_json::from_slice(&contents)?;
                for line in lines {
                    entries.insert((line.source_id, line.entry.name.clone()), line.entry);
                }
                info!("Loaded {} journal entries from {}", entries.len(), path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            path,
            entries: RwLock::new(entries),
            fsync,
        })
    }

    async fn persist(&self, entries: &BTreeMap<(String, String), CdcJournalEntry>) -> Result<()> {
        let lines: Vec<JournalLine> = entries
            .iter()
            .map(|((source_id, _), entry)| JournalLine {
                source_id: source_id.clone(),
                entry: entry.clone(),
            })
            .collect();
        let json = serde_json::to_vec_pretty(&lines)?;
        write_atomic(&self.path, &json, self.fsync).await
    }
}

#[async_trait]
impl JournalStore for FileJournalStore {
    async fn upsert(&self, source_id: &str, entry: CdcJournalEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert((source_id.to_string(), entry.name.clone()), entry);
        self.persist(&entries).await
    }

    async fn get(&self, source_id: &str, name: &str) -> Result<Option<CdcJournalEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(source_id.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(&self, source_id: &str) -> Result<Vec<CdcJournalEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|((s, _), _)| s == source_id)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn remove(&self, source_id: &str, name: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let existed = entries
            .remove(&(source_id.to_string(), name.to_string()))
            .is_some();
        if existed {
            self.persist(&entries).await?;
        }
        Ok(existed)
    }

    async fn bump(&self, source_id: &str, name: &str, read: u64, written: u64) -> Result<()> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&(source_id.to_string(), name.to_string())) else {
            return Ok(());
        };
        entry.rows_read += read;
        entry.rows_written += written;
        entry.updated_at = Utc::now();
        self.persist(&entries).await
    }
}

// ============================================================================
// PostgreSQL stores
// ============================================================================

#[cfg(feature = "postgres")]
pub use self::postgres::{PgJournalStore, PgStagingStore};

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;
    use crate::row_identity::hash_text;
    use chrono::DateTime;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn pg_error(context: &str) -> impl Fn(tokio_postgres::Error) -> CdcError + '_ {
        move |e| CdcError::staging(format!("{}: {}", context, e))
    }

    fn validate_table(name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !name.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(CdcError::validation(format!("invalid table name: {:?}", name)));
        }
        Ok(())
    }

    fn enum_text<T: Serialize>(value: &T) -> Result<String> {
        match serde_json::to_value(value)? {
            serde_json::Value::String(s) => Ok(s),
            other => Err(CdcError::serialization(format!("expected a string, got {}", other))),
        }
    }

    fn enum_from_text<T: serde::de::DeserializeOwned>(text: String) -> Result<T> {
        Ok(serde_json::from_value(serde_json::Value::String(text))?)
    }

    /// `field -> hash text` of a document, matched with `@>`
    fn lookup_of(data: &Document) -> serde_json::Value {
        serde_json::Value::Object(
            data.iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(hash_text(v))))
                .collect(),
        )
    }

    const RECORD_COLUMNS: &str = "row_key, seq, state, captured_at, op, data";

    fn record_from_row(row: &tokio_postgres::Row) -> Result<StagingRecord> {
        let key: String = row.get(0);
        let seq: i64 = row.get(1);
        let captured_at: DateTime<Utc> = row.get(3);
        let data: serde_json::Value = row.get(5);
        Ok(StagingRecord {
            key: RowKey::from_hex(key),
            seq: seq.max(0) as u64,
            state: enum_from_text(row.get(2))?,
            captured_at,
            op: enum_from_text(row.get(4))?,
            data: serde_json::from_value(data)?,
        })
    }

    /// [`StagingStore`] over a PostgreSQL table.
    ///
    /// # Table Schema
    ///
    /// ```sql
    /// CREATE TABLE IF NOT EXISTS tributary_staging (
    ///     collection TEXT NOT NULL,
    ///     row_key TEXT NOT NULL,
    ///     seq BIGINT NOT NULL,
    ///     state TEXT NOT NULL,
    ///     captured_at TIMESTAMPTZ NOT NULL,
    ///     op TEXT NOT NULL,
    ///     data JSONB NOT NULL,
    ///     lookup JSONB NOT NULL,
    ///     PRIMARY KEY (collection, row_key, seq)
    /// );
    /// ```
    ///
    /// `lookup` maps each field to its hash text so field searches compare
    /// values the way row keys do. Appended records draw their sequence from
    /// `{table}_seq`.
    pub struct PgStagingStore {
        client: Arc<tokio_postgres::Client>,
        table: String,
    }

    impl PgStagingStore {
        /// Open the store, creating its table, indexes and sequence
        pub async fn new(client: Arc<tokio_postgres::Client>, table: Option<&str>) -> Result<Self> {
            let table = table.unwrap_or("tributary_staging").to_string();
            validate_table(&table)?;
            let store = Self { client, table };
            store.ensure_table().await?;
            Ok(store)
        }

        async fn ensure_table(&self) -> Result<()> {
            let t = &self.table;
            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {t} (
                    collection TEXT NOT NULL,
                    row_key TEXT NOT NULL,
                    seq BIGINT NOT NULL,
                    state TEXT NOT NULL,
                    captured_at TIMESTAMPTZ NOT NULL,
                    op TEXT NOT NULL,
                    data JSONB NOT NULL,
                    lookup JSONB NOT NULL,
                    PRIMARY KEY (collection, row_key, seq)
                );
                CREATE INDEX IF NOT EXISTS {t}_by_state
                    ON {t} (collection, state, seq, captured_at, row_key);
                CREATE INDEX IF NOT EXISTS {t}_lookup ON {t} USING GIN (lookup jsonb_path_ops);
                CREATE SEQUENCE IF NOT EXISTS {t}_seq;
                "#
            );
            self.client
                .batch_execute(&ddl)
                .await
                .map_err(pg_error("failed to create staging table"))
        }

        async fn write(&self, collection: &str, record: &StagingRecord, seq_sql: &str) -> Result<()> {
            let sql = format!(
                r#"
                INSERT INTO {} (collection, row_key, seq, state, captured_at, op, data, lookup)
                VALUES ($1, $2, {}, $3, $4, $5, $6, $7)
                ON CONFLICT (collection, row_key, seq)
                DO UPDATE SET
                    state = EXCLUDED.state,
                    captured_at = EXCLUDED.captured_at,
                    op = EXCLUDED.op,
                    data = EXCLUDED.data,
                    lookup = EXCLUDED.lookup
                "#,
                self.table, seq_sql
            );
            let state = enum_text(&record.state)?;
            let op = enum_text(&record.op)?;
            let data = serde_json::to_value(&record.data)?;
            let lookup = lookup_of(&record.data);
            self.client
                .execute(
                    &sql,
                    &[
                        &collection,
                        &record.key.as_str(),
                        &state,
                        &record.captured_at,
                        &op,
                        &data,
                        &lookup,
                    ],
                )
                .await
                .map_err(pg_error("failed to write staging record"))?;
            Ok(())
        }

        async fn select(&self, filter: &str, params: &[&(dyn tokio_postgres::types::ToSql + Sync)]) -> Result<Vec<StagingRecord>> {
            let sql = format!("SELECT {} FROM {} WHERE {}", RECORD_COLUMNS, self.table, filter);
            let rows = self
                .client
                .query(&sql, params)
                .await
                .map_err(pg_error("failed to read staging records"))?;
            rows.iter().map(record_from_row).collect()
        }

        async fn count_where(&self, filter: &str, params: &[&(dyn tokio_postgres::types::ToSql + Sync)]) -> Result<u64> {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", self.table, filter);
            let row = self
                .client
                .query_one(&sql, params)
                .await
                .map_err(pg_error("failed to count staging records"))?;
            Ok(row.get::<_, i64>(0).max(0) as u64)
        }

        async fn delete_where(&self, filter: &str, params: &[&(dyn tokio_postgres::types::ToSql + Sync)]) -> Result<u64> {
            let sql = format!("DELETE FROM {} WHERE {}", self.table, filter);
            self.client
                .execute(&sql, params)
                .await
                .map_err(pg_error("failed to delete staging records"))
        }
    }

    #[async_trait]
    impl StagingStore for PgStagingStore {
        async fn insert_many(&self, collection: &str, records: Vec<StagingRecord>) -> Result<u64> {
            check_collection(collection)?;
            for record in &records {
                let seq = record.seq as i64;
                self.write(collection, record, &seq.to_string()).await?;
            }
            Ok(records.len() as u64)
        }

        async fn append_many(&self, collection: &str, records: Vec<StagingRecord>) -> Result<u64> {
            check_collection(collection)?;
            let next = format!("nextval('{}_seq')", self.table);
            for record in &records {
                self.write(collection, record, &next).await?;
            }
            Ok(records.len() as u64)
        }

        async fn contains(&self, collection: &str, key: &RowKey) -> Result<bool> {
            let n = self
                .count_where("collection = $1 AND row_key = $2", &[&collection, &key.as_str()])
                .await?;
            Ok(n > 0)
        }

        async fn filter_missing(&self, collection: &str, keys: &[RowKey]) -> Result<Vec<RowKey>> {
            let wanted: Vec<&str> = keys.iter().map(RowKey::as_str).collect();
            let sql = format!(
                "SELECT DISTINCT row_key FROM {} WHERE collection = $1 AND row_key = ANY($2)",
                self.table
            );
            let rows = self
                .client
                .query(&sql, &[&collection, &wanted])
                .await
                .map_err(pg_error("failed to look up staging keys"))?;
            let present: HashSet<String> = rows.iter().map(|r| r.get(0)).collect();
            let mut seen = HashSet::new();
            Ok(keys
                .iter()
                .filter(|k| seen.insert(*k))
                .filter(|k| !present.contains(k.as_str()))
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
            let state = enum_text(&state)?;
            let (limit, offset) = (limit as i64, offset as i64);
            self.select(
                "collection = $1 AND state = $2 ORDER BY seq, captured_at, row_key LIMIT $3 OFFSET $4",
                &[&collection, &state, &limit, &offset],
            )
            .await
        }

        async fn set_state(&self, collection: &str, ids: &[RecordId], state: RecordState) -> Result<u64> {
            let state = enum_text(&state)?;
            let sql = format!(
                "UPDATE {} SET state = $4 WHERE collection = $1 AND row_key = $2 AND seq = $3 AND state <> $4",
                self.table
            );
            let mut changed = 0;
            for id in ids {
                let seq = id.seq as i64;
                changed += self
                    .client
                    .execute(&sql, &[&collection, &id.key.as_str(), &seq, &state])
                    .await
                    .map_err(pg_error("failed to update staging state"))?;
            }
            Ok(changed)
        }

        async fn delete_keys(&self, collection: &str, keys: &[RowKey]) -> Result<u64> {
            let keys: Vec<&str> = keys.iter().map(RowKey::as_str).collect();
            self.delete_where("collection = $1 AND row_key = ANY($2)", &[&collection, &keys])
                .await
        }

        async fn delete_by_state(&self, collection: &str, state: RecordState) -> Result<u64> {
            let state = enum_text(&state)?;
            self.delete_where("collection = $1 AND state = $2", &[&collection, &state])
                .await
        }

        async fn count(&self, collection: &str) -> Result<u64> {
            self.count_where("collection = $1", &[&collection]).await
        }

        async fn count_by_state(&self, collection: &str, state: RecordState) -> Result<u64> {
            let state = enum_text(&state)?;
            self.count_where("collection = $1 AND state = $2", &[&collection, &state])
                .await
        }

        async fn get(&self, collection: &str, key: &RowKey) -> Result<Option<StagingRecord>> {
            let mut latest = self
                .select(
                    "collection = $1 AND row_key = $2 ORDER BY seq DESC LIMIT 1",
                    &[&collection, &key.as_str()],
                )
                .await?;
            Ok(latest.pop())
        }

        async fn history(&self, collection: &str, key: &RowKey) -> Result<Vec<StagingRecord>> {
            self.select(
                "collection = $1 AND row_key = $2 ORDER BY seq",
                &[&collection, &key.as_str()],
            )
            .await
        }

        async fn find_by_fields(&self, collection: &str, fields: &Document) -> Result<Vec<StagingRecord>> {
            let wanted = lookup_of(fields);
            self.select(
                "collection = $1 AND lookup @> $2 ORDER BY row_key, seq",
                &[&collection, &wanted],
            )
            .await
        }

        async fn drop_collection(&self, collection: &str) -> Result<()> {
            self.delete_where("collection = $1", &[&collection]).await?;
            Ok(())
        }
    }

    /// [`JournalStore`] over a PostgreSQL table
    pub struct PgJournalStore {
        client: Arc<tokio_postgres::Client>,
        table: String,
    }

    impl PgJournalStore {
        /// Open the journal, creating its table
        pub async fn new(client: Arc<tokio_postgres::Client>, table: Option<&str>) -> Result<Self> {
            let table = table.unwrap_or("tributary_cdc_journal").to_string();
            validate_table(&table)?;
            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    source_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    source_table TEXT NOT NULL,
                    collection TEXT NOT NULL,
                    rows_read BIGINT NOT NULL DEFAULT 0,
                    rows_written BIGINT NOT NULL DEFAULT 0,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    PRIMARY KEY (source_id, name)
                )
                "#,
                table
            );
            client
                .batch_execute(&ddl)
                .await
                .map_err(pg_error("failed to create journal table"))?;
            Ok(Self { client, table })
        }

        fn entry_from_row(row: &tokio_postgres::Row) -> CdcJournalEntry {
            CdcJournalEntry {
                name: row.get(0),
                source_table: row.get(1),
                collection: row.get(2),
                rows_read: row.get::<_, i64>(3).max(0) as u64,
                rows_written: row.get::<_, i64>(4).max(0) as u64,
                created_at: row.get(5),
                updated_at: row.get(6),
            }
        }
    }

    const ENTRY_COLUMNS: &str =
        "name, source_table, collection, rows_read, rows_written, created_at, updated_at";

    #[async_trait]
    impl JournalStore for PgJournalStore {
        async fn upsert(&self, source_id: &str, entry: CdcJournalEntry) -> Result<()> {
            let sql = format!(
                r#"
                INSERT INTO {} (source_id, {})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (source_id, name)
                DO UPDATE SET
                    source_table = EXCLUDED.source_table,
                    collection = EXCLUDED.collection,
                    rows_read = EXCLUDED.rows_read,
                    rows_written = EXCLUDED.rows_written,
                    created_at = EXCLUDED.created_at,
                    updated_at = EXCLUDED.updated_at
                "#,
                self.table, ENTRY_COLUMNS
            );
            self.client
                .execute(
                    &sql,
                    &[
                        &source_id,
                        &entry.name,
                        &entry.source_table,
                        &entry.collection,
                        &(entry.rows_read as i64),
                        &(entry.rows_written as i64),
                        &entry.created_at,
                        &entry.updated_at,
                    ],
                )
                .await
                .map_err(pg_error("failed to save journal entry"))?;
            Ok(())
        }

        async fn get(&self, source_id: &str, name: &str) -> Result<Option<CdcJournalEntry>> {
            let sql = format!(
                "SELECT {} FROM {} WHERE source_id = $1 AND name = $2",
                ENTRY_COLUMNS, self.table
            );
            let row = self
                .client
                .query_opt(&sql, &[&source_id, &name])
                .await
                .map_err(pg_error("failed to load journal entry"))?;
            Ok(row.as_ref().map(Self::entry_from_row))
        }

        async fn list(&self, source_id: &str) -> Result<Vec<CdcJournalEntry>> {
            let sql = format!(
                "SELECT {} FROM {} WHERE source_id = $1 ORDER BY name",
                ENTRY_COLUMNS, self.table
            );
            let rows = self
                .client
                .query(&sql, &[&source_id])
                .await
                .map_err(pg_error("failed to list journal entries"))?;
            Ok(rows.iter().map(Self::entry_from_row).collect())
        }

        async fn remove(&self, source_id: &str, name: &str) -> Result<bool> {
            let sql = format!("DELETE FROM {} WHERE source_id = $1 AND name = $2", self.table);
            let n = self
                .client
                .execute(&sql, &[&source_id, &name])
                .await
                .map_err(pg_error("failed to remove journal entry"))?;
            Ok(n > 0)
        }

        async fn bump(&self, source_id: &str, name: &str, read: u64, written: u64) -> Result<()> {
            let sql = format!(
                "UPDATE {} SET rows_read = rows_read + $3, rows_written = rows_written + $4, \
                 updated_at = now() WHERE source_id = $1 AND name = $2",
                self.table
            );
            self.client
                .execute(&sql, &[&source_id, &name, &(read as i64), &(written as i64)])
                .await
                .map_err(pg_error("failed to update journal counters"))?;
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::staging::ChangeOp;

        #[test]
        fn test_lookup_uses_hash_text() {
            let mut data = Document::new();
            data.insert("orders__id".into(), tributary_rdbc::Value::Int32(7));
            data.insert("orders__note".into(), tributary_rdbc::Value::Null);
            let lookup = lookup_of(&data);
            assert_eq!(lookup["orders__id"], "1:7");
            assert_eq!(lookup["orders__note"], "~");
        }

        #[test]
        fn test_state_text() {
            assert_eq!(enum_text(&RecordState::Synced).unwrap(), "SYNCED");
            assert_eq!(enum_text(&ChangeOp::Delete).unwrap(), "delete");
            let state: RecordState = enum_from_text("NEW".to_string()).unwrap();
            assert_eq!(state, RecordState::New);
            assert!(validate_table("staging; DROP").is_err());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::ChangeOp;
    use tempfile::TempDir;
    use tributary_rdbc::Value;

    fn record(key: &str, state: RecordState, v: i64) -> StagingRecord {
        let mut data = Document::new();
        data.insert("t__v".to_string(), Value::from(v));
        StagingRecord::new(RowKey::digest(key), state, data)
    }

    #[tokio::test]
    async fn test_staging_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStagingStore::with_options(dir.path(), false).await.unwrap();
            store
                .insert_many("canon", vec![record("a", RecordState::Loaded, 1)])
                .await
                .unwrap();
            store
                .append_many(
                    "delta",
                    vec![
                        record("a", RecordState::New, 2).with_op(ChangeOp::Update),
                        record("a", RecordState::New, 3).with_op(ChangeOp::Update),
                    ],
                )
                .await
                .unwrap();
            let first = store.history("delta", &RowKey::digest("a")).await.unwrap()[0].id();
            store.set_state("delta", &[first], RecordState::Synced).await.unwrap();
        }

        let store = FileStagingStore::with_options(dir.path(), false).await.unwrap();
        assert_eq!(store.count("canon").await.unwrap(), 1);
        assert_eq!(store.count_by_state("delta", RecordState::Synced).await.unwrap(), 1);
        assert_eq!(store.count_by_state("delta", RecordState::New).await.unwrap(), 1);

        // the sequence picks up after the persisted records
        store
            .append_many("delta", vec![record("a", RecordState::New, 4)])
            .await
            .unwrap();
        let seqs: Vec<u64> = store
            .history("delta", &RowKey::digest("a"))
            .await
            .unwrap()
            .iter()
            .map(|r| r.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_drop_collection_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = FileStagingStore::with_options(dir.path(), false).await.unwrap();
        store
            .insert_many("keys", vec![record("a", RecordState::Loaded, 1)])
            .await
            .unwrap();
        assert!(dir.path().join("keys.json").exists());

        store.drop_collection("keys").await.unwrap();
        assert!(!dir.path().join("keys.json").exists());
        let reopened = FileStagingStore::with_options(dir.path(), false).await.unwrap();
        assert_eq!(reopened.count("keys").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_path_like_collection_names() {
        let dir = TempDir::new().unwrap();
        let store = FileStagingStore::with_options(dir.path(), false).await.unwrap();
        assert!(store.insert_many("../escape", vec![]).await.is_err());
        assert!(store.insert_many("", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_journal_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta").join("journal.json");
        {
            let journal = FileJournalStore::with_options(&path, false).await.unwrap();
            journal
                .upsert("src-1", CdcJournalEntry::new("orders", "delta"))
                .await
                .unwrap();
            journal
                .upsert("src-2", CdcJournalEntry::new("orders", "other"))
                .await
                .unwrap();
            journal.bump("src-1", "_etl_orders", 5, 3).await.unwrap();
            assert!(journal.remove("src-2", "_etl_orders").await.unwrap());
        }

        let journal = FileJournalStore::with_options(&path, false).await.unwrap();
        let entry = journal.get("src-1", "_etl_orders").await.unwrap().unwrap();
        assert_eq!((entry.rows_read, entry.rows_written), (5, 3));
        assert_eq!(entry.collection, "delta");
        assert!(journal.list("src-2").await.unwrap().is_empty());
    }
}
