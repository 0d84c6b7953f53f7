//! Trigger-based capture
//!
//! Setup installs a `_etl_{table}` shadow table and the dialect's triggers.
//! The drain moves pending shadow rows into the delta collection:
//!
//! 1. take the watermark, the highest pending `cdc_id`
//! 2. page pending rows by `cdc_id` keyset, up to the watermark
//! 3. turn each page into delta records keyed like the extraction query
//! 4. mark exactly the drained ids synced
//! 5. bump the journal counters
//!
//! Rows whose ids exceed the watermark, or that commit after a page passed
//! their id, stay pending for the next drain.
//!
//! ## Keying
//!
//! Delta records must carry the same row keys and `{table}__{column}`
//! fields as the canonical collection. A query over one table keys the
//! shadow image directly. For a join, every changed primary key is looked up
//! twice: canonical records holding that key are the stale rows, and the
//! join re-run for that key (and for the root keys of the stale rows) gives
//! the current rows. Current rows become inserts or updates, stale rows with
//! no current counterpart become deletes.
//!
//! Every captured table must be projected and have a primary key; anything
//! else is rejected at setup and drain in favor of checksum capture.

use super::journal::{CdcJournalEntry, JournalStore};
use super::SyncContext;
use crate::error::{CdcError, Result};
use crate::extraction::ExtractionQuery;
use crate::row_identity::{field_alias, hash_text, RowKey};
use crate::staging::{ChangeOp, Document, RecordState, StagingRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tributary_rdbc::dialect::{shadow_table_name, CDC_CREATED_AT, CDC_DELTA_FLAG, CDC_ID};
use tributary_rdbc::resilience::retry_db_call;
use tributary_rdbc::schema::TableDescriptor;
use tributary_rdbc::types::{Row, Value};

/// Result of draining one shadow table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Tracked table
    pub table: String,
    /// Shadow rows read
    pub rows_read: u64,
    /// Delta records written
    pub rows_written: u64,
}

/// One decoded shadow row
struct ShadowChange {
    op: ChangeOp,
    captured_at: DateTime<Utc>,
    row: Row,
}

/// Shadow-table capture for one source
pub struct TriggerCapture {
    ctx: SyncContext,
    query: ExtractionQuery,
    journal: Arc<dyn JournalStore>,
    source_id: String,
}

impl TriggerCapture {
    /// Capture of the tables of `query`, writing to `ctx`'s delta collection
    pub fn new(
        ctx: SyncContext,
        query: ExtractionQuery,
        journal: Arc<dyn JournalStore>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            query,
            journal,
            source_id: source_id.into(),
        }
    }

    /// Projected descriptor of a capturable table
    fn capturable(&self, table: &str) -> Result<&TableDescriptor> {
        let projected = self.query.projected(table).ok_or_else(|| {
            CdcError::validation(format!(
                "table {} has no selected columns; use checksum capture",
                table
            ))
        })?;
        let all_keyed = self
            .query
            .tables()
            .iter()
            .all(|t| !t.primary_key_columns().is_empty());
        if projected.primary_key_columns().is_empty() || !all_keyed {
            return Err(CdcError::validation(format!(
                "trigger capture of {} needs a primary key on every joined table; use checksum capture",
                table
            )));
        }
        Ok(projected)
    }

    async fn execute_all(&self, operation: &str, statements: &[String]) -> Result<()> {
        for sql in statements {
            debug!(operation, sql = %sql, "Capture DDL");
            retry_db_call(&self.ctx.retry, operation, || self.ctx.conn.execute(sql, &[])).await?;
        }
        Ok(())
    }

    /// Create the shadow table and triggers, and record the journal entry
    pub async fn setup(&self, table: &TableDescriptor) -> Result<CdcJournalEntry> {
        self.capturable(&table.name)?;
        let dialect = self.ctx.dialect.as_ref();
        self.execute_all("create shadow table", &dialect.shadow_table_ddl(table)?)
            .await?;
        self.execute_all("create capture triggers", &dialect.trigger_ddl(table)?)
            .await?;

        let entry = CdcJournalEntry::new(&table.name, self.ctx.collections.delta());
        self.journal.upsert(&self.source_id, entry.clone()).await?;
        info!(table = %table.name, shadow = %entry.name, "Trigger capture installed");
        Ok(entry)
    }

    /// Remove triggers, the shadow table and the journal entry
    pub async fn teardown(&self, table: &str) -> Result<()> {
        let ddl = self.ctx.dialect.drop_capture_ddl(table)?;
        self.execute_all("drop capture", &ddl).await?;
        self.journal
            .remove(&self.source_id, &shadow_table_name(table))
            .await?;
        info!(table, "Trigger capture removed");
        Ok(())
    }

    /// Drain pending shadow rows of `table` into the delta collection
    pub async fn drain(&self, table: &TableDescriptor) -> Result<DrainReport> {
        let projected = self.capturable(&table.name)?;
        let shadow = shadow_table_name(&table.name);
        let entry = self
            .journal
            .get(&self.source_id, &shadow)
            .await?
            .ok_or_else(|| CdcError::staging(format!("no capture installed for {}", table.name)))?;

        let dialect = self.ctx.dialect.as_ref();
        let mut report = DrainReport {
            table: table.name.clone(),
            rows_read: 0,
            rows_written: 0,
        };

        let watermark_sql = dialect.shadow_watermark_sql(&shadow);
        let watermark = retry_db_call(&self.ctx.retry, "shadow watermark", || {
            self.ctx.conn.query_one(&watermark_sql, &[])
        })
        .await?
        .and_then(|row| row.get_i64("watermark"));

        let Some(watermark) = watermark else {
            debug!(shadow = %shadow, "Nothing to drain");
            return Ok(report);
        };

        let columns = table.column_names();
        let limit = self.ctx.page_size as u64;
        let page_sql = dialect.shadow_page_sql(&shadow, &columns, limit);
        let mut last_id = 0i64;

        loop {
            let params = [Value::Int64(last_id), Value::Int64(watermark)];
            let rows = retry_db_call(&self.ctx.retry, "shadow page", || {
                self.ctx.conn.query(&page_sql, &params)
            })
            .await?;
            let fetched = rows.len() as u64;
            if fetched == 0 {
                break;
            }

            let ids: Vec<i64> = rows.iter().filter_map(|r| r.get_i64(CDC_ID)).collect();
            if ids.len() as u64 != fetched {
                return Err(CdcError::staging(format!(
                    "{} returned rows without {}",
                    shadow, CDC_ID
                )));
            }
            let changes: Vec<ShadowChange> = rows.into_iter().filter_map(decode_change).collect();
            let records = if self.query.tables().len() == 1 {
                self.single_table_records(projected, changes)
            } else {
                self.joined_records(projected, changes).await?
            };

            report.rows_read += fetched;
            if !records.is_empty() {
                report.rows_written += self
                    .ctx
                    .staging
                    .append_many(&entry.collection, records)
                    .await?;
            }

            // skipped rows are marked too, they would never decode
            let mark_sql = dialect.shadow_mark_synced_sql(&shadow, &ids);
            retry_db_call(&self.ctx.retry, "mark shadow synced", || {
                self.ctx.conn.execute(&mark_sql, &[])
            })
            .await?;

            last_id = ids.iter().copied().max().unwrap_or(last_id);
            if fetched < limit || last_id >= watermark {
                break;
            }
        }

        self.journal
            .bump(&self.source_id, &shadow, report.rows_read, report.rows_written)
            .await?;
        info!(
            shadow = %shadow,
            rows_read = report.rows_read,
            rows_written = report.rows_written,
            "Shadow table drained"
        );
        Ok(report)
    }

    /// Shadow images re-aliased and keyed like the extraction query
    fn single_table_records(&self, projected: &TableDescriptor, changes: Vec<ShadowChange>) -> Vec<StagingRecord> {
        let keyer = self.query.keyer();
        changes
            .into_iter()
            .map(|change| {
                let aliased = alias_row(projected, &change.row);
                let key = keyer.key(&aliased, 0);
                StagingRecord::new(key, RecordState::New, aliased.into_document())
                    .with_op(change.op)
                    .with_captured_at(change.captured_at)
            })
            .collect()
    }

    /// Current and stale join rows around each changed primary key
    async fn joined_records(
        &self,
        projected: &TableDescriptor,
        changes: Vec<ShadowChange>,
    ) -> Result<Vec<StagingRecord>> {
        let canonical = self.ctx.collections.canonical();
        let root = self
            .query
            .root()
            .ok_or_else(|| CdcError::validation("query projects no table"))?;
        let pk_columns: Vec<String> = projected
            .primary_key_columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        let root_pk: Vec<String> = root
            .primary_key_columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();

        let mut seen_pks = HashSet::new();
        let mut records = Vec::new();
        for change in changes {
            let pk: Vec<Value> = pk_columns
                .iter()
                .map(|c| change.row.get_by_name(c).cloned().unwrap_or(Value::Null))
                .collect();
            let pk_text: Vec<String> = pk.iter().map(hash_text).collect();
            if !seen_pks.insert(pk_text) {
                continue;
            }

            let fields: Document = pk_columns
                .iter()
                .zip(&pk)
                .map(|(c, v)| (field_alias(&projected.name, c), v.clone()))
                .collect();
            let stale = self.ctx.staging.find_by_fields(&canonical, &fields).await?;
            let stale_keys: HashSet<RowKey> = stale.iter().map(|r| r.key.clone()).collect();

            let mut current: Vec<Row> = self.rows_for(&projected.name, &pk).await?;
            let mut root_keys_done = HashSet::new();
            for record in &stale {
                let root_values: Vec<Value> = root_pk
                    .iter()
                    .map(|c| {
                        record
                            .data
                            .get(&field_alias(&root.name, c))
                            .cloned()
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                if root_values.iter().any(Value::is_null) {
                    continue;
                }
                let root_text: Vec<String> = root_values.iter().map(hash_text).collect();
                if root_keys_done.insert(root_text) {
                    current.extend(self.rows_for(&root.name, &root_values).await?);
                }
            }

            let keyer = self.query.keyer();
            let mut current_keys = HashSet::new();
            for row in current {
                let key = keyer.key(&row, 0);
                if !current_keys.insert(key.clone()) {
                    continue;
                }
                let op = if stale_keys.contains(&key) {
                    ChangeOp::Update
                } else {
                    ChangeOp::Insert
                };
                records.push(
                    StagingRecord::new(key, RecordState::New, row.into_document())
                        .with_op(op)
                        .with_captured_at(change.captured_at),
                );
            }
            for record in stale {
                if current_keys.contains(&record.key) {
                    continue;
                }
                records.push(
                    StagingRecord::new(record.key, RecordState::New, record.data)
                        .with_op(ChangeOp::Delete)
                        .with_captured_at(change.captured_at),
                );
            }
            debug!(
                table = %projected.name,
                op = ?change.op,
                stale = stale_keys.len(),
                current = current_keys.len(),
                "Join rows re-keyed"
            );
        }
        Ok(records)
    }

    /// The extraction query restricted to one primary key of `table`
    async fn rows_for(&self, table: &str, pk: &[Value]) -> Result<Vec<Row>> {
        let sql = self.query.restricted_sql(self.ctx.dialect.as_ref(), table)?;
        Ok(retry_db_call(&self.ctx.retry, "re-key join rows", || {
            self.ctx.conn.query(&sql, pk)
        })
        .await?)
    }
}

fn decode_change(row: Row) -> Option<ShadowChange> {
    let flag = row.get_i64(CDC_DELTA_FLAG);
    let Some(op) = flag.and_then(ChangeOp::from_delta_flag) else {
        warn!(flag = ?flag, "Skipping shadow row with unknown delta flag");
        return None;
    };
    let captured_at = row
        .get_by_name(CDC_CREATED_AT)
        .and_then(capture_time)
        .unwrap_or_else(Utc::now);
    Some(ShadowChange {
        op,
        captured_at,
        row,
    })
}

/// Projected columns of a shadow image under their extraction aliases
fn alias_row(projected: &TableDescriptor, row: &Row) -> Row {
    Row::from_pairs(projected.columns.iter().map(|c| {
        (
            field_alias(&projected.name, &c.name),
            row.get_by_name(&c.name).cloned().unwrap_or(Value::Null),
        )
    }))
}

fn capture_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::DateTimeTz(dt) => Some(*dt),
        Value::DateTime(dt) => Some(dt.and_utc()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                    .ok()
                    .map(|dt| dt.and_utc())
            }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_capture_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(capture_time(&Value::from("2024-03-01 12:30:00")), Some(expected));
        assert_eq!(capture_time(&Value::from("2024-03-01T12:30:00Z")), Some(expected));
        assert_eq!(capture_time(&Value::DateTimeTz(expected)), Some(expected));
        assert_eq!(capture_time(&Value::Int64(1)), None);
    }

    #[test]
    fn test_alias_row_keeps_projected_columns() {
        use tributary_rdbc::schema::{CanonicalType, ColumnDescriptor};
        let projected = TableDescriptor::new("orders", "1")
            .with_column(ColumnDescriptor::new("id", CanonicalType::Integer).primary())
            .with_column(ColumnDescriptor::new("total", CanonicalType::DoublePrecision));
        let shadow = Row::from_pairs([
            ("id", Value::from(4i64)),
            ("total", Value::from(2.5)),
            ("customer_id", Value::from(9i64)),
            ("cdc_id", Value::from(11i64)),
        ]);
        let aliased = alias_row(&projected, &shadow);
        assert_eq!(aliased.columns(), &["orders__id".to_string(), "orders__total".to_string()]);
    }
}
