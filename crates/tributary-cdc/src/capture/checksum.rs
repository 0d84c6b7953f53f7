//! Checksum-based reconciliation
//!
//! A cycle runs three phases against the staging collections:
//!
//! - **Diff**: page the live join query; every row whose key is missing from
//!   the canonical collection goes to the delta collection as NEW.
//! - **Merge**: apply NEW delta records to the canonical collection, then
//!   mark them SYNCED (see [`merge_delta`](super::merge_delta)).
//! - **Redundancy**: detect rows deleted upstream.
//!   1. purge all-keys records left DELETED by the previous cycle
//!   2. stage every canonical LOADED key into all-keys as NEW
//!   3. rebuild the current-keys collection from the live query
//!   4. all-keys records absent from current keys become DELETED and their
//!      canonical rows are purged; the rest become SYNCED
//!
//! Every phase is idempotent by row key, so a failed cycle can simply be
//! rerun from the first page.

use super::{merge_delta, SyncContext};
use crate::error::Result;
use crate::extraction::{ensure_total, ExtractionQuery, KeyedPager};
use crate::jobs::ProgressReporter;
use crate::row_identity::RowKey;
use crate::staging::{RecordId, RecordState, StagingRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Result of the redundancy phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundancyReport {
    /// All-keys records purged from the previous cycle
    pub purged: u64,
    /// Keys found deleted upstream in this cycle
    pub deleted: u64,
    /// Keys confirmed present
    pub kept: u64,
}

/// Result of one full cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// New delta records found by diff
    pub detected: u64,
    /// Delta records merged
    pub merged: u64,
    /// Deletion detection
    pub redundancy: RedundancyReport,
}

/// Checksum reconciliation for one (source, table selection)
pub struct ChecksumCapture {
    ctx: SyncContext,
    query: ExtractionQuery,
}

impl ChecksumCapture {
    /// Reconcile the collections of `ctx` against `query`
    pub fn new(ctx: SyncContext, query: ExtractionQuery) -> Self {
        Self { ctx, query }
    }

    /// Diff phase; returns the number of rows written to the delta collection
    pub async fn diff(&self, progress: Option<&ProgressReporter>) -> Result<u64> {
        let canonical = self.ctx.collections.canonical();
        let delta = self.ctx.collections.delta();
        ensure_total(&self.ctx, &self.query, progress).await;
        let mut pager = KeyedPager::new(&self.ctx, &self.query);
        let mut detected = 0u64;

        while let Some(page) = pager.next_page().await? {
            let keys: Vec<RowKey> = page.iter().map(|(k, _)| k.clone()).collect();
            let missing: HashSet<RowKey> = self
                .ctx
                .staging
                .filter_missing(&canonical, &keys)
                .await?
                .into_iter()
                .collect();

            if !missing.is_empty() {
                let records: Vec<StagingRecord> = page
                    .into_iter()
                    .filter(|(k, _)| missing.contains(k))
                    .map(|(k, row)| StagingRecord::new(k, RecordState::New, row.into_document()))
                    .collect();
                detected += self.ctx.staging.append_many(&delta, records).await?;
            }
            debug!(read = pager.offset(), detected, "Diff page compared");
            if let Some(progress) = progress {
                progress.processing(pager.offset());
            }
        }

        info!(collection = %delta, detected, "Diff finished");
        Ok(detected)
    }

    /// Merge phase
    pub async fn merge(&self, progress: Option<&ProgressReporter>) -> Result<u64> {
        merge_delta(&self.ctx, progress).await
    }

    /// Redundancy phase
    pub async fn redundancy(&self) -> Result<RedundancyReport> {
        let canonical = self.ctx.collections.canonical();
        let keys = self.ctx.collections.keys();
        let all_keys = self.ctx.collections.all_keys();
        let page_size = self.ctx.page_size;
        let staging = &self.ctx.staging;
        let mut report = RedundancyReport {
            purged: staging.delete_by_state(&all_keys, RecordState::Deleted).await?,
            ..RedundancyReport::default()
        };

        let mut offset = 0;
        loop {
            let page = staging
                .page_by_state(&canonical, RecordState::Loaded, page_size, offset)
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            let staged = page
                .into_iter()
                .map(|r| StagingRecord::key_only(r.key, RecordState::New))
                .collect();
            staging.insert_many(&all_keys, staged).await?;
        }

        staging.drop_collection(&keys).await?;
        let mut pager = KeyedPager::new(&self.ctx, &self.query);
        while let Some(page) = pager.next_page().await? {
            let current = page
                .into_iter()
                .map(|(k, _)| StagingRecord::key_only(k, RecordState::Loaded))
                .collect();
            staging.insert_many(&keys, current).await?;
        }

        loop {
            // every key leaves NEW below, so the next page starts at 0
            let page = staging
                .page_by_state(&all_keys, RecordState::New, page_size, 0)
                .await?;
            if page.is_empty() {
                break;
            }
            let page_keys: Vec<RowKey> = page.into_iter().map(|r| r.key).collect();
            let gone = staging.filter_missing(&keys, &page_keys).await?;
            let gone_set: HashSet<&RowKey> = gone.iter().collect();
            let present: Vec<RowKey> = page_keys
                .iter()
                .filter(|k| !gone_set.contains(k))
                .cloned()
                .collect();

            if !gone.is_empty() {
                let ids: Vec<RecordId> = gone.iter().cloned().map(RecordId::from).collect();
                staging.set_state(&all_keys, &ids, RecordState::Deleted).await?;
                staging.delete_keys(&canonical, &gone).await?;
            }
            if !present.is_empty() {
                let ids: Vec<RecordId> = present.iter().cloned().map(RecordId::from).collect();
                staging.set_state(&all_keys, &ids, RecordState::Synced).await?;
            }
            report.deleted += gone.len() as u64;
            report.kept += present.len() as u64;
        }

        info!(
            collection = %canonical,
            purged = report.purged,
            deleted = report.deleted,
            kept = report.kept,
            "Redundancy check finished"
        );
        Ok(report)
    }

    /// Diff, merge and redundancy in order
    pub async fn run_cycle(&self, progress: Option<&ProgressReporter>) -> Result<CycleReport> {
        let detected = self.diff(progress).await?;
        let merged = self.merge(None).await?;
        let redundancy = self.redundancy().await?;
        Ok(CycleReport {
            detected,
            merged,
            redundancy,
        })
    }
}
