//! # Change Data Capture
//!
//! Two interchangeable strategies keep the staged snapshot current:
//!
//! - [`TriggerCapture`] - shadow tables filled by AFTER INSERT/UPDATE/DELETE
//!   triggers, drained into the delta collection
//! - [`ChecksumCapture`] - periodic diff / merge / redundancy reconciliation
//!   against the live join query
//!
//! Both produce the same delta records (state NEW with a [`ChangeOp`]) and
//! share the merge step. [`CdcEngine`] picks the strategy stored for a source.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  triggers   ┌──────────────┐   drain   ┌─────────────┐
//! │ source table │ ──────────► │ _etl_ shadow │ ────────► │             │
//! └──────────────┘             └──────────────┘           │  delta (NEW)│
//!        │          checksum diff                         │             │
//!        └──────────────────────────────────────────────► └──────┬──────┘
//!                                                                │ merge
//!                                                         ┌──────▼──────┐
//!                                                         │  canonical  │
//!                                                         └─────────────┘
//! ```
//!
//! [`ChangeOp`]: crate::staging::ChangeOp

mod checksum;
mod journal;
mod trigger;

pub use checksum::{ChecksumCapture, CycleReport, RedundancyReport};
pub use journal::{CdcJournalEntry, JournalStore, MemoryJournalStore};
pub use trigger::{DrainReport, TriggerCapture};

use crate::config::SyncConfig;
use crate::error::{CdcError, Result};
use crate::extraction::ExtractionQuery;
use crate::jobs::ProgressReporter;
use crate::row_identity::RowKey;
use crate::staging::{ChangeOp, CollectionNames, RecordId, RecordState, StagingRecord, StagingStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use tributary_rdbc::connection::ConnectionHandle;
use tributary_rdbc::dialect::SqlDialect;
use tributary_rdbc::resilience::RetryPolicy;
use tributary_rdbc::schema::TableDescriptor;

/// Change-detection strategy of a source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdcStrategy {
    /// Shadow tables and triggers
    Triggers,
    /// Periodic checksum reconciliation
    #[default]
    Checksum,
}

impl fmt::Display for CdcStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Triggers => f.write_str("triggers"),
            Self::Checksum => f.write_str("checksum"),
        }
    }
}

impl FromStr for CdcStrategy {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "triggers" | "trigger" => Ok(Self::Triggers),
            "checksum" => Ok(Self::Checksum),
            other => Err(CdcError::validation(format!("unknown CDC strategy: {}", other))),
        }
    }
}

/// Everything a sync job needs, owned by that job
#[derive(Clone)]
pub struct SyncContext {
    /// Source connection, never shared across jobs
    pub conn: ConnectionHandle,
    /// Source dialect
    pub dialect: Arc<dyn SqlDialect>,
    /// Retry policy for source calls
    pub retry: RetryPolicy,
    /// Staging store
    pub staging: Arc<dyn StagingStore>,
    /// Collection set of this (source, table selection)
    pub collections: CollectionNames,
    /// Rows per page
    pub page_size: usize,
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("dialect", &self.dialect.name())
            .field("collections", &self.collections)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl SyncContext {
    /// Context with default page size and the dialect's retry codes
    pub fn new(
        conn: ConnectionHandle,
        dialect: Box<dyn SqlDialect>,
        staging: Arc<dyn StagingStore>,
        collections: CollectionNames,
    ) -> Self {
        let retry = RetryPolicy::for_dialect(dialect.as_ref());
        Self {
            conn,
            dialect: Arc::from(dialect),
            retry,
            staging,
            collections,
            page_size: crate::config::DEFAULT_PAGE_SIZE,
        }
    }

    /// Apply page size and retry settings
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.page_size = config.page_size.max(1);
        self.retry = config.retry_for(self.dialect.as_ref());
        self
    }

    /// Set the page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Merge NEW delta records into the canonical collection.
///
/// Pages in sequence order. Within a page the changes of one row fold into
/// the last one: inserts and updates are written as LOADED, a delete purges
/// the canonical row. Merged delta records become SYNCED and are kept. Safe
/// to rerun after a failure: canonical writes replace by row key.
pub async fn merge_delta(ctx: &SyncContext, progress: Option<&ProgressReporter>) -> Result<u64> {
    let delta = ctx.collections.delta();
    let canonical = ctx.collections.canonical();
    if let Some(progress) = progress {
        progress.set_total(ctx.staging.count_by_state(&delta, RecordState::New).await?);
    }

    let mut merged = 0u64;
    loop {
        // merged records leave the NEW index, so the next page starts at 0
        let page = ctx
            .staging
            .page_by_state(&delta, RecordState::New, ctx.page_size, 0)
            .await?;
        if page.is_empty() {
            break;
        }

        let ids: Vec<RecordId> = page.iter().map(StagingRecord::id).collect();
        let mut effects: HashMap<RowKey, StagingRecord> = HashMap::with_capacity(page.len());
        for record in page {
            effects.insert(record.key.clone(), record);
        }
        let (deletes, upserts): (Vec<StagingRecord>, Vec<StagingRecord>) = effects
            .into_values()
            .partition(|r| r.op == ChangeOp::Delete);

        if !deletes.is_empty() {
            let doomed: Vec<_> = deletes.into_iter().map(|r| r.key).collect();
            ctx.staging.delete_keys(&canonical, &doomed).await?;
        }
        let loaded: Vec<StagingRecord> = upserts
            .into_iter()
            .map(|r| {
                StagingRecord::new(r.key, RecordState::Loaded, r.data)
                    .with_op(r.op)
                    .with_captured_at(r.captured_at)
            })
            .collect();
        ctx.staging.insert_many(&canonical, loaded).await?;
        let marked = ctx.staging.set_state(&delta, &ids, RecordState::Synced).await?;
        if marked == 0 {
            return Err(CdcError::staging(format!(
                "delta records of {} did not leave NEW state",
                delta
            )));
        }

        merged += ids.len() as u64;
        debug!(merged, "Merge page applied");
        if let Some(progress) = progress {
            progress.processing(merged);
        }
    }

    info!(collection = %canonical, merged, "Merge finished");
    Ok(merged)
}

/// Outcome of one engine run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum SyncReport {
    /// Trigger drain per table, then merge
    Triggers {
        /// Per-table drain results
        drained: Vec<DrainReport>,
        /// Delta records merged
        merged: u64,
    },
    /// One checksum cycle
    Checksum(CycleReport),
}

/// Runs the configured strategy for one source
pub struct CdcEngine {
    ctx: SyncContext,
    strategy: CdcStrategy,
    query: ExtractionQuery,
    tables: Vec<TableDescriptor>,
    journal: Arc<dyn JournalStore>,
    source_id: String,
}

impl CdcEngine {
    /// Engine over the tables of `query`
    pub fn new(
        ctx: SyncContext,
        strategy: CdcStrategy,
        query: ExtractionQuery,
        tables: Vec<TableDescriptor>,
        journal: Arc<dyn JournalStore>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            strategy,
            query,
            tables,
            journal,
            source_id: source_id.into(),
        }
    }

    /// Active strategy
    pub fn strategy(&self) -> CdcStrategy {
        self.strategy
    }

    fn trigger_capture(&self) -> TriggerCapture {
        TriggerCapture::new(
            self.ctx.clone(),
            self.query.clone(),
            self.journal.clone(),
            self.source_id.clone(),
        )
    }

    /// Install capture for every table when the strategy uses triggers
    pub async fn prepare(&self) -> Result<()> {
        if self.strategy != CdcStrategy::Triggers {
            return Ok(());
        }
        let capture = self.trigger_capture();
        for table in &self.tables {
            capture.setup(table).await?;
        }
        Ok(())
    }

    /// One incremental sync
    pub async fn run(&self, progress: Option<&ProgressReporter>) -> Result<SyncReport> {
        info!(strategy = %self.strategy, source_id = %self.source_id, "CDC run started");
        match self.strategy {
            CdcStrategy::Triggers => {
                let capture = self.trigger_capture();
                let mut drained = Vec::with_capacity(self.tables.len());
                for table in &self.tables {
                    drained.push(capture.drain(table).await?);
                }
                let merged = merge_delta(&self.ctx, progress).await?;
                Ok(SyncReport::Triggers { drained, merged })
            }
            CdcStrategy::Checksum => {
                let capture = ChecksumCapture::new(self.ctx.clone(), self.query.clone());
                Ok(SyncReport::Checksum(capture.run_cycle(progress).await?))
            }
        }
    }
}
