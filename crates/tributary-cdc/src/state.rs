//! # Persisted State
//!
//! Structural state of a source is stored under deterministic string keys,
//! so any component can find it again from `(user, source)` or
//! `(user, source, table)` alone.
//!
//! | Key | Value |
//! |-----|-------|
//! | `user:{u}:source:{s}:tree` | [`StoredTree`] |
//! | `user:{u}:source:{s}:active_tables` | table names |
//! | `user:{u}:source:{s}:joins` | [`JoinEdge`] list |
//! | `user:{u}:source:{s}:table:{t}:descriptor` | [`TableDescriptor`] |
//! | `user:{u}:source:{s}:table:{t}:statistics` | [`StatisticsSnapshot`] |
//! | `user:{u}:source:{s}:cdc_strategy` | [`CdcStrategy`] |
//!
//! ## Backends
//!
//! - [`MemoryStateStore`]: in-process, for tests and single-node use
//! - [`FileStateStore`]: one JSON file per key with atomic replace
//!
//! ## Usage
//!
//! ```rust,ignore
//! let store = FileStateStore::new("/var/tributary/state").await?;
//! let state = SourceState::new(Arc::new(store), StateKeys::new("42", "7"));
//!
//! state.save_tree(&tree).await?;
//! let tree = state.load_tree().await?.unwrap_or_default();
//! ```

use crate::capture::CdcStrategy;
use crate::error::{CdcError, Result};
use crate::join_tree::{JoinEdge, JoinTree, TableRef, TreeStructure};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use tributary_rdbc::schema::{StatisticsSnapshot, TableDescriptor};

// ============================================================================
// Keys
// ============================================================================

/// Key builder for one (user, source)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKeys {
    user: String,
    source: String,
}

impl StateKeys {
    /// Keys of `source` as seen by `user`
    pub fn new(user: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            source: source.into(),
        }
    }

    /// Source id
    pub fn source(&self) -> &str {
        &self.source
    }

    fn prefix(&self) -> String {
        format!("user:{}:source:{}", self.user, self.source)
    }

    /// Join tree key
    pub fn tree(&self) -> String {
        format!("{}:tree", self.prefix())
    }

    /// Active table list key
    pub fn active_tables(&self) -> String {
        format!("{}:active_tables", self.prefix())
    }

    /// Join edge list key
    pub fn joins(&self) -> String {
        format!("{}:joins", self.prefix())
    }

    /// Table descriptor key
    pub fn table_descriptor(&self, table: &str) -> String {
        format!("{}:table:{}:descriptor", self.prefix(), table)
    }

    /// Table statistics key
    pub fn table_statistics(&self, table: &str) -> String {
        format!("{}:table:{}:statistics", self.prefix(), table)
    }

    /// CDC strategy key
    pub fn cdc_strategy(&self) -> String {
        format!("{}:cdc_strategy", self.prefix())
    }

    /// Name of the distributed lock guarding tree edits
    pub fn tree_lock(&self) -> String {
        format!("{}:tree_lock", self.prefix())
    }
}

// ============================================================================
// Store trait and backends
// ============================================================================

/// Key-value store for structural state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Write a value, replacing any previous one
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Remove a value; missing keys are not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory state store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStateStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .values
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// JSON-file state store.
///
/// Each key is one `{key}.json` file under the base directory, written to a
/// temporary file and renamed into place. Keys may contain `:` but not path
/// separators. Existing files are loaded into the cache on open.
pub struct FileStateStore {
    base_dir: PathBuf,
    cache: RwLock<HashMap<String, serde_json::Value>>,
    fsync: bool,
}

impl FileStateStore {
    /// Open a store, creating the directory if needed
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(base_dir, true).await
    }

    /// Open a store, choosing whether writes are fsynced
    pub async fn with_options(base_dir: impl AsRef<Path>, fsync: bool) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        let store = Self {
            base_dir,
            cache: RwLock::new(HashMap::new()),
            fsync,
        };
        store.load_all().await?;
        Ok(store)
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
            return Err(CdcError::validation(format!("invalid state key: {:?}", key)));
        }
        Ok(())
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", key))
    }

    async fn load_all(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.base_dir).await?;
        let mut cache = self.cache.write().await;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let contents = fs::read_to_string(&path).await?;
            match serde_json::from_str(&contents) {
                Ok(value) => {
                    cache.insert(key.to_string(), value);
                }
                Err(e) => warn!("Skipping unreadable state file {}: {}", path.display(), e),
            }
        }
        if !cache.is_empty() {
            info!("Loaded {} state entries from {}", cache.len(), self.base_dir.display());
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Self::validate_key(key)?;
        Ok(self.cache.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        Self::validate_key(key)?;
        let file_path = self.file_path(key);
        let temp_path = file_path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(&value)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(&json).await?;
        if self.fsync {
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &file_path).await?;

        self.cache.write().await.insert(key.to_string(), value);
        debug!("Saved state {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Self::validate_key(key)?;
        match fs::remove_file(self.file_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.cache.write().await.remove(key);
        debug!("Deleted state {}", key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .cache
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// Typed access
// ============================================================================

/// Persisted join tree together with its remainder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTree {
    /// Tree layout, `None` when empty
    pub structure: Option<TreeStructure>,
    /// Tables not attached to the tree
    #[serde(default)]
    pub remainder: Vec<TableRef>,
}

impl StoredTree {
    /// Snapshot of `tree`
    pub fn from_tree(tree: &JoinTree) -> Self {
        Self {
            structure: tree.structure(),
            remainder: tree.remainder().to_vec(),
        }
    }

    /// Rebuild the tree
    pub fn into_tree(self) -> Result<JoinTree> {
        let tree = match &self.structure {
            Some(structure) => JoinTree::from_structure(structure)?,
            None => JoinTree::default(),
        };
        Ok(tree.with_remainder(self.remainder))
    }
}

/// Typed view of the state of one source
#[derive(Clone)]
pub struct SourceState {
    store: Arc<dyn StateStore>,
    keys: StateKeys,
}

impl SourceState {
    /// State of `keys` in `store`
    pub fn new(store: Arc<dyn StateStore>, keys: StateKeys) -> Self {
        Self { store, keys }
    }

    /// Key builder
    pub fn keys(&self) -> &StateKeys {
        &self.keys
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| CdcError::serialization(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.store.put(key, serde_json::to_value(value)?).await
    }

    /// Persist the tree and its edge list
    pub async fn save_tree(&self, tree: &JoinTree) -> Result<()> {
        self.save(&self.keys.tree(), &StoredTree::from_tree(tree)).await?;
        self.save(&self.keys.joins(), &tree.edges()).await
    }

    /// Load the tree, `None` if never saved
    pub async fn load_tree(&self) -> Result<Option<JoinTree>> {
        match self.load::<StoredTree>(&self.keys.tree()).await? {
            Some(stored) => stored.into_tree().map(Some),
            None => Ok(None),
        }
    }

    /// Flattened edges of the last saved tree
    pub async fn load_joins(&self) -> Result<Vec<JoinEdge>> {
        Ok(self.load(&self.keys.joins()).await?.unwrap_or_default())
    }

    /// Persist the user's table selection
    pub async fn save_active_tables(&self, tables: &[String]) -> Result<()> {
        self.save(&self.keys.active_tables(), &tables).await
    }

    /// Load the user's table selection
    pub async fn load_active_tables(&self) -> Result<Vec<String>> {
        Ok(self.load(&self.keys.active_tables()).await?.unwrap_or_default())
    }

    /// Persist a table descriptor, and its statistics when present
    pub async fn save_descriptor(&self, table: &TableDescriptor) -> Result<()> {
        self.save(&self.keys.table_descriptor(&table.name), table).await?;
        if let Some(stats) = &table.statistics {
            self.save(&self.keys.table_statistics(&table.name), stats).await?;
        }
        Ok(())
    }

    /// Load a table descriptor
    pub async fn load_descriptor(&self, table: &str) -> Result<Option<TableDescriptor>> {
        self.load(&self.keys.table_descriptor(table)).await
    }

    /// Load a statistics snapshot
    pub async fn load_statistics(&self, table: &str) -> Result<Option<StatisticsSnapshot>> {
        self.load(&self.keys.table_statistics(table)).await
    }

    /// Load descriptors of every active table, skipping missing ones
    pub async fn load_active_descriptors(&self) -> Result<Vec<TableDescriptor>> {
        let mut descriptors = Vec::new();
        for table in self.load_active_tables().await? {
            match self.load_descriptor(&table).await? {
                Some(d) => descriptors.push(d),
                None => warn!(table = %table, "Active table has no stored descriptor"),
            }
        }
        Ok(descriptors)
    }

    /// Persist the CDC strategy
    pub async fn save_strategy(&self, strategy: CdcStrategy) -> Result<()> {
        self.save(&self.keys.cdc_strategy(), &strategy).await
    }

    /// Load the CDC strategy, defaulting to checksum
    pub async fn load_strategy(&self) -> Result<CdcStrategy> {
        Ok(self.load(&self.keys.cdc_strategy()).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = StateKeys::new("42", "7");
        assert_eq!(keys.tree(), "user:42:source:7:tree");
        assert_eq!(keys.active_tables(), "user:42:source:7:active_tables");
        assert_eq!(keys.joins(), "user:42:source:7:joins");
        assert_eq!(keys.table_descriptor("orders"), "user:42:source:7:table:orders:descriptor");
        assert_eq!(keys.table_statistics("orders"), "user:42:source:7:table:orders:statistics");
        assert_eq!(keys.cdc_strategy(), "user:42:source:7:cdc_strategy");
    }

    #[test]
    fn test_file_keys_validated() {
        assert!(FileStateStore::validate_key("user:1:source:2:tree").is_ok());
        assert!(FileStateStore::validate_key("").is_err());
        assert!(FileStateStore::validate_key("a/b").is_err());
        assert!(FileStateStore::validate_key("..").is_err());
    }

    #[tokio::test]
    async fn test_memory_list_by_prefix() {
        let store = MemoryStateStore::new();
        store.put("user:1:source:2:tree", serde_json::json!({})).await.unwrap();
        store.put("user:1:source:3:tree", serde_json::json!({})).await.unwrap();
        assert_eq!(store.list("user:1:source:2").await.unwrap(), vec!["user:1:source:2:tree"]);
        store.delete("user:1:source:2:tree").await.unwrap();
        store.delete("user:1:source:2:tree").await.unwrap();
        assert!(store.get("user:1:source:2:tree").await.unwrap().is_none());
    }
}
