//! Dialect catalog: schema introspection for one source
//!
//! [`DialectCatalog`] turns a connection plus a [`SqlDialect`] into
//! [`TableDescriptor`]s. Column, index and constraint metadata come from three
//! separate round trips and are merged client-side; no product exposes all
//! three portably in one query.
//!
//! Every metadata call goes through [`retry_db_call`] with the dialect's
//! deadlock / lock-wait codes. Connection failures surface unchanged.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

use crate::connection::{ConnectionHandle, SourceDescriptor};
use crate::dialect::{dialect_for, shadow_table_name, SqlDialect};
use crate::error::{Error, Result};
use crate::resilience::{retry_db_call, RetryPolicy};
use crate::schema::{
    ColumnDescriptor, ConstraintDescriptor, ConstraintKind, DateInterval, ForeignKeyDescriptor,
    IndexDescriptor, StatisticsSnapshot, TableDescriptor,
};
use crate::security::validate_identifier;
use crate::types::{Row, Value};

/// Planner estimates below this are replaced by an exact count
pub const DEFAULT_ESTIMATE_THRESHOLD: u64 = 100_000;

/// Schema introspection for one source connection
pub struct DialectCatalog {
    conn: ConnectionHandle,
    dialect: Box<dyn SqlDialect>,
    source: SourceDescriptor,
    source_id: String,
    retry: RetryPolicy,
    estimate_threshold: u64,
}

impl DialectCatalog {
    /// Create a catalog; the dialect follows the source's product
    pub fn new(conn: ConnectionHandle, source: SourceDescriptor, source_id: impl Into<String>) -> Self {
        let dialect = dialect_for(source.product);
        let retry = RetryPolicy::for_dialect(dialect.as_ref());
        Self {
            conn,
            dialect,
            source,
            source_id: source_id.into(),
            retry,
            estimate_threshold: DEFAULT_ESTIMATE_THRESHOLD,
        }
    }

    /// Override the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the exact-count threshold for row estimates
    pub fn with_estimate_threshold(mut self, threshold: u64) -> Self {
        self.estimate_threshold = threshold;
        self
    }

    /// Dialect in use
    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Source descriptor
    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    /// Source id stamped on produced descriptors
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Retry policy used for every call
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Connection handle
    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    async fn fetch(&self, operation: &str, sql: &str) -> Result<Vec<Row>> {
        self.fetch_with(operation, sql, &[]).await
    }

    async fn fetch_with(&self, operation: &str, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(operation, sql, "Catalog query");
        retry_db_call(&self.retry, operation, || self.conn.query(sql, params)).await
    }

    /// List base tables, leaving out tables recorded as CDC shadow tables
    /// and any `_etl_` shadow derived from another listed table
    pub async fn list_tables(&self, shadow_tables: &[String]) -> Result<Vec<String>> {
        let rows = self
            .fetch("list_tables", &self.dialect.list_tables_sql(&self.source.db))
            .await?;
        let names: Vec<String> = rows
            .iter()
            .filter_map(|r| r.get_string("table_name"))
            .collect();

        let mut excluded: HashSet<String> = shadow_tables.iter().cloned().collect();
        for name in &names {
            excluded.insert(shadow_table_name(name));
        }
        Ok(names.into_iter().filter(|n| !excluded.contains(n)).collect())
    }

    /// Describe columns of the given tables, with index/key flags derived
    /// from the index and constraint metadata.
    ///
    /// Returns one descriptor per requested table that exists, in request
    /// order, carrying columns, indexes and foreign keys.
    pub async fn describe_columns(&self, tables: &[String]) -> Result<Vec<TableDescriptor>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }
        for table in tables {
            validate_identifier(table)?;
        }
        let db = &self.source.db;

        let column_rows = self
            .fetch("describe_columns", &self.dialect.columns_sql(db, tables))
            .await?;
        let index_rows = self
            .fetch("describe_indexes", &self.dialect.indexes_sql(db, tables))
            .await?;
        let constraint_rows = self
            .fetch("describe_constraints", &self.dialect.constraints_sql(db, tables))
            .await?;

        let mut columns: HashMap<String, Vec<ColumnDescriptor>> = HashMap::new();
        for row in &column_rows {
            let (Some(table), Some(column)) = (row.get_string("table_name"), self.column_from_row(row))
            else {
                continue;
            };
            columns.entry(table).or_default().push(column);
        }

        let indexes = group_indexes(&index_rows);
        let constraints = group_constraints(&constraint_rows);

        let mut out = Vec::with_capacity(tables.len());
        for name in tables {
            let Some(cols) = columns.remove(name) else {
                debug!(table = %name, "Table not found during describe");
                continue;
            };
            let mut table = TableDescriptor::new(name.clone(), self.source_id.clone());
            table.columns = cols;
            table.indexes = indexes.get(name).cloned().unwrap_or_default();
            let table_constraints = constraints.get(name).map(Vec::as_slice).unwrap_or(&[]);
            apply_key_flags(&mut table, table_constraints);
            table.foreign_keys = foreign_keys(table_constraints);
            out.push(table);
        }
        Ok(out)
    }

    fn column_from_row(&self, row: &Row) -> Option<ColumnDescriptor> {
        let name = row.get_string("column_name")?;
        let native = row.get_string("data_type").unwrap_or_default();
        let mut column = ColumnDescriptor::new(name, self.dialect.canonical_type(&native))
            .with_native_type(native);
        column.nullable = row
            .get_string("is_nullable")
            .map(|v| v.eq_ignore_ascii_case("YES"))
            .unwrap_or(true);
        column.max_length = row
            .get_i64("max_length")
            .and_then(|n| u32::try_from(n).ok());
        column.extra = row.get_string("extra").filter(|e| !e.is_empty());
        Some(column)
    }

    /// Row estimate for a table or a join query.
    ///
    /// `target` is either a bare table name or a full SELECT. The planner
    /// estimate is used when it reaches the threshold; below it (or when the
    /// dialect has no estimate) an exact count is taken.
    pub async fn estimate_row_count(&self, target: &str) -> Result<u64> {
        let query = if target.trim_start().to_uppercase().starts_with("SELECT") {
            target.to_string()
        } else {
            validate_identifier(target)?;
            format!("SELECT * FROM {}", self.dialect.quote_identifier(target))
        };
        estimate_query_rows(
            &self.conn,
            self.dialect.as_ref(),
            &self.retry,
            &query,
            self.estimate_threshold,
        )
        .await
    }

    /// Row count and storage size per table; tables without usable
    /// statistics are absent from the result
    pub async fn statistics(&self, tables: &[String]) -> Result<HashMap<String, StatisticsSnapshot>> {
        if tables.is_empty() {
            return Ok(HashMap::new());
        }
        for table in tables {
            validate_identifier(table)?;
        }
        let rows = self
            .fetch("statistics", &self.dialect.statistics_sql(&self.source.db, tables))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                let table = r.get_string("table_name")?;
                let snapshot =
                    StatisticsSnapshot::from_parts(r.get_i64("row_count"), r.get_i64("size_bytes"))?;
                Some((table, snapshot))
            })
            .collect())
    }

    /// Min/max of each timestamp column of a table
    pub async fn date_intervals(&self, table: &TableDescriptor) -> Result<Vec<DateInterval>> {
        validate_identifier(&table.name)?;
        let mut intervals = Vec::new();
        for column in table.timestamp_columns() {
            let sql = self.dialect.date_interval_sql(&table.name, &column.name);
            let rows = self.fetch("date_interval", &sql).await?;
            let row = rows.first();
            intervals.push(DateInterval {
                column: column.name.clone(),
                start: row.and_then(|r| r.get_string("start_date")),
                end: row.and_then(|r| r.get_string("end_date")),
            });
        }
        Ok(intervals)
    }

    /// Full inspection: columns, keys, statistics and date intervals
    pub async fn inspect(&self, tables: &[String]) -> Result<Vec<TableDescriptor>> {
        info!(
            source = %self.source_id,
            dialect = self.dialect.name(),
            tables = tables.len(),
            "Inspecting source tables"
        );
        let mut described = self.describe_columns(tables).await?;
        let stats = self.statistics(tables).await?;
        for table in &mut described {
            table.statistics = stats.get(&table.name).copied();
            table.date_intervals = self.date_intervals(table).await?;
        }
        Ok(described)
    }

    /// First rows of a table, for previews
    pub async fn preview_rows(&self, table: &str, limit: u64) -> Result<Vec<Row>> {
        validate_identifier(table)?;
        let sql = self.dialect.select_page(table, &[], limit, 0);
        self.fetch("preview_rows", &sql).await
    }
}

fn group_indexes(rows: &[Row]) -> HashMap<String, Vec<IndexDescriptor>> {
    let mut grouped: HashMap<String, BTreeMap<String, IndexDescriptor>> = HashMap::new();
    for row in rows {
        let (Some(table), Some(index), Some(column)) = (
            row.get_string("table_name"),
            row.get_string("index_name"),
            row.get_string("column_name"),
        ) else {
            continue;
        };
        let flag = |name: &str| row.get_by_name(name).and_then(Value::as_bool).unwrap_or(false);
        let entry = grouped
            .entry(table)
            .or_default()
            .entry(index.clone())
            .or_insert_with(|| IndexDescriptor {
                name: index,
                columns: Vec::new(),
                is_unique: flag("is_unique"),
                is_primary: flag("is_primary"),
            });
        entry.columns.push(column);
    }
    grouped
        .into_iter()
        .map(|(table, indexes)| (table, indexes.into_values().collect()))
        .collect()
}

fn group_constraints(rows: &[Row]) -> HashMap<String, Vec<ConstraintDescriptor>> {
    let mut grouped: HashMap<String, Vec<ConstraintDescriptor>> = HashMap::new();
    for row in rows {
        let (Some(table), Some(name), Some(column)) = (
            row.get_string("table_name"),
            row.get_string("constraint_name"),
            row.get_string("column_name"),
        ) else {
            continue;
        };
        let Some(kind) = row
            .get_string("constraint_type")
            .and_then(|t| ConstraintKind::parse(&t))
        else {
            continue;
        };
        grouped.entry(table).or_default().push(ConstraintDescriptor {
            name,
            kind,
            column,
            ref_table: row.get_string("ref_table"),
            ref_column: row.get_string("ref_column"),
            on_update: row.get_string("on_update"),
            on_delete: row.get_string("on_delete"),
        });
    }
    grouped
}

fn apply_key_flags(table: &mut TableDescriptor, constraints: &[ConstraintDescriptor]) {
    let indexes = table.indexes.clone();
    for column in &mut table.columns {
        let covering: Vec<&IndexDescriptor> = indexes
            .iter()
            .filter(|i| i.columns.iter().any(|c| c == &column.name))
            .collect();
        let constrained = |kind: ConstraintKind| {
            constraints
                .iter()
                .any(|c| c.kind == kind && c.column == column.name)
        };

        column.is_index = !covering.is_empty();
        column.is_primary = constrained(ConstraintKind::PrimaryKey);
        column.is_unique = column.is_primary
            || constrained(ConstraintKind::Unique)
            || covering.iter().any(|i| i.is_unique);
    }
}

fn foreign_keys(constraints: &[ConstraintDescriptor]) -> Vec<ForeignKeyDescriptor> {
    constraints
        .iter()
        .filter(|c| c.kind == ConstraintKind::ForeignKey)
        .filter_map(|c| {
            Some(ForeignKeyDescriptor {
                name: c.name.clone(),
                source_column: c.column.clone(),
                target_table: c.ref_table.clone()?,
                target_column: c.ref_column.clone()?,
                on_update: c.on_update.clone(),
                on_delete: c.on_delete.clone(),
            })
        })
        .collect()
}

/// Row estimate of a SELECT: the planner's figure when it reaches
/// `threshold`, an exact count otherwise
pub async fn estimate_query_rows(
    conn: &ConnectionHandle,
    dialect: &dyn SqlDialect,
    retry: &RetryPolicy,
    query: &str,
    threshold: u64,
) -> Result<u64> {
    if let Some(explain) = dialect.explain_sql(query) {
        debug!(sql = %explain, "Catalog query");
        let rows = retry_db_call(retry, "explain", || conn.query(&explain, &[])).await?;
        if let Some(estimate) = dialect.parse_row_estimate(&rows) {
            if estimate >= threshold {
                debug!(estimate, "Using planner row estimate");
                return Ok(estimate);
            }
        }
    }

    let count = dialect.count_sql(query);
    debug!(sql = %count, "Catalog query");
    let rows = retry_db_call(retry, "exact_count", || conn.query(&count, &[])).await?;
    rows.first()
        .and_then(|r| r.get_i64("cnt"))
        .map(|n| n.max(0) as u64)
        .ok_or_else(|| Error::schema("count query returned no rows"))
}
