//! # tributary-cdc
//!
//! Extraction and change data capture for BI source databases.
//!
//! Given a user's table selection, this crate infers how the tables join,
//! pulls the joined rows into a document staging store, and keeps that
//! snapshot current with either database triggers or checksum
//! reconciliation.
//!
//! ## Features
//!
//! - **Join Inference**: edges from foreign keys, `{table}_{column}` naming and shared columns
//! - **Join Trees**: breadth-first spanning trees with in-place user edits and JSON persistence
//! - **Row Identity**: SHA-256 keys from primary keys, stable across pages and cycles
//! - **Staging**: LOADED / NEW / SYNCED / DELETED record lifecycle over four collections per selection
//! - **Durable Stores**: file and PostgreSQL staging / journal stores that survive restarts
//! - **Trigger CDC**: shadow tables drained up to a watermark, journaled per table
//! - **Checksum CDC**: diff / merge / redundancy cycles, idempotent by row key
//! - **Jobs**: background jobs with monotonic progress events and pollable status
//! - **Tree Locks**: lease-based locks serializing structural edits per source
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tributary_cdc::prelude::*;
//!
//! let tree = JoinTree::build_best(&descriptors)?;
//! let query = ExtractionQuery::all_columns(&tree, &descriptors, dialect.as_ref())?;
//!
//! let collections = CollectionNames::derive("db.internal", 5432, "bi", &selection);
//! let ctx = SyncContext::new(conn, dialect, staging, collections).with_config(&config);
//!
//! BulkLoader::new(ctx.clone(), query.clone()).run(None).await?;
//!
//! let engine = CdcEngine::new(ctx, config.strategy, query, descriptors, journal, "sales-db");
//! engine.prepare().await?;
//! let report = engine.run(None).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL connection in `tributary-rdbc`, plus PostgreSQL-backed staging and journal stores

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod capture;
pub mod config;
pub mod error;
pub mod extraction;
pub mod inference;
pub mod jobs;
pub mod join_tree;
pub mod lock;
pub mod row_identity;
pub mod staging;
pub mod state;
pub mod stores;

/// Prelude module for convenient imports
pub mod prelude {
    // Errors and configuration
    pub use crate::config::{LockConfig, SyncConfig};
    pub use crate::error::{CdcError, ErrorCategory, Result};

    // Join trees
    pub use crate::inference::{check_join_types, propose_edge, ErrorJoin, JoinTypeCheck};
    pub use crate::join_tree::{ColumnPair, JoinKind, JoinOperator, JoinTree, TableRef, TreeStructure};

    // Rows and staging
    pub use crate::row_identity::{RowKey, RowKeyer};
    pub use crate::staging::{
        ChangeOp, CollectionNames, MemoryStagingStore, RecordId, RecordState, StagingRecord,
        StagingStore,
    };
    pub use crate::stores::{FileJournalStore, FileStagingStore};
    #[cfg(feature = "postgres")]
    pub use crate::stores::{PgJournalStore, PgStagingStore};

    // Extraction and capture
    pub use crate::capture::{
        merge_delta, CdcEngine, CdcStrategy, ChecksumCapture, JournalStore, MemoryJournalStore,
        SyncContext, SyncReport, TriggerCapture,
    };
    pub use crate::extraction::{BulkLoader, ExtractionQuery};

    // Jobs, locks and state
    pub use crate::jobs::{run_job, spawn_job, JobRegistry, JobStatus, ProgressEvent, ProgressReporter};
    pub use crate::lock::{acquire_with_retry, LockManager, MemoryLockManager, TreeEditor};
    pub use crate::state::{FileStateStore, MemoryStateStore, SourceState, StateKeys, StateStore};
}

// Re-export commonly used items at crate root
pub use error::{CdcError, Result};
