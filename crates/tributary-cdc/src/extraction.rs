//! Extraction query and bulk load
//!
//! [`ExtractionQuery`] turns a join tree plus a column selection into one
//! SELECT whose columns are aliased `{table}__{column}`. The same query feeds
//! the initial bulk load and every checksum cycle, so row keys computed by
//! both agree.

use crate::capture::SyncContext;
use crate::error::{CdcError, Result};
use crate::jobs::ProgressReporter;
use crate::join_tree::JoinTree;
use crate::row_identity::{field_alias, RowKey, RowKeyer};
use crate::staging::{RecordState, StagingRecord};
use tracing::{debug, info, warn};
use tributary_rdbc::catalog::{estimate_query_rows, DEFAULT_ESTIMATE_THRESHOLD};
use tributary_rdbc::dialect::SqlDialect;
use tributary_rdbc::resilience::retry_db_call;
use tributary_rdbc::schema::TableDescriptor;
use tributary_rdbc::types::Row;

/// SELECT over a join tree with aliased columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionQuery {
    sql: String,
    order_by: String,
    aliases: Vec<String>,
    keyer: RowKeyer,
    tables: Vec<TableDescriptor>,
    projected: Vec<TableDescriptor>,
}

impl ExtractionQuery {
    /// Select every column of every table in the tree
    pub fn all_columns(tree: &JoinTree, tables: &[TableDescriptor], dialect: &dyn SqlDialect) -> Result<Self> {
        Self::build(tree, tables, dialect, None)
    }

    /// Select the given `(table, column)` pairs.
    ///
    /// Primary key columns of each table are added when missing so row keys
    /// can be computed. Tables of the tree with no selected column still take
    /// part in the join.
    pub fn with_selection(
        tree: &JoinTree,
        tables: &[TableDescriptor],
        dialect: &dyn SqlDialect,
        selection: &[(String, String)],
    ) -> Result<Self> {
        Self::build(tree, tables, dialect, Some(selection))
    }

    fn build(
        tree: &JoinTree,
        tables: &[TableDescriptor],
        dialect: &dyn SqlDialect,
        selection: Option<&[(String, String)]>,
    ) -> Result<Self> {
        let from = tree.join_sql(dialect)?;
        let mut projection = Vec::new();
        let mut aliases = Vec::new();
        let mut ordering = Vec::new();
        let mut joined = Vec::new();
        let mut projected = Vec::new();

        for table_name in tree.ordered_tables() {
            let table = tables
                .iter()
                .find(|t| t.name == table_name)
                .ok_or_else(|| CdcError::validation(format!("no descriptor for table {}", table_name)))?;
            let narrowed = narrow(table, selection)?;
            for column in &narrowed.columns {
                let alias = field_alias(&table.name, &column.name);
                projection.push(format!(
                    "{} AS {}",
                    dialect.qualified_column(&table.name, &column.name),
                    dialect.quote_identifier(&alias)
                ));
                aliases.push(alias);
            }
            // key columns, or every projected column when there is no key
            let pk = narrowed.primary_key_columns();
            let order_columns: Vec<&str> = if pk.is_empty() {
                narrowed.columns.iter().map(|c| c.name.as_str()).collect()
            } else {
                pk.iter().map(|c| c.name.as_str()).collect()
            };
            ordering.extend(
                order_columns
                    .iter()
                    .map(|c| dialect.qualified_column(&table.name, c)),
            );
            joined.push(table.clone());
            if !narrowed.columns.is_empty() {
                projected.push(narrowed);
            }
        }

        if projection.is_empty() {
            return Err(CdcError::validation("no columns selected"));
        }

        Ok(Self {
            sql: format!("SELECT {} FROM {}", projection.join(", "), from),
            order_by: ordering.join(", "),
            aliases,
            keyer: RowKeyer::for_tables(&projected),
            tables: joined,
            projected,
        })
    }

    /// SQL text without ordering, as used for row estimates
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// SQL text with a total order over the key columns
    pub fn ordered_sql(&self) -> String {
        format!("{} ORDER BY {}", self.sql, self.order_by)
    }

    /// Output column aliases in projection order
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Keyer matching the projection
    pub fn keyer(&self) -> &RowKeyer {
        &self.keyer
    }

    /// Descriptors of every joined table, in tree order
    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    /// Projected part of a table, `None` when it only takes part in the join
    pub fn projected(&self, table: &str) -> Option<&TableDescriptor> {
        self.projected.iter().find(|t| t.name == table)
    }

    /// First projected table in tree order
    pub fn root(&self) -> Option<&TableDescriptor> {
        self.projected.first()
    }

    /// One page of the query
    pub fn page_sql(&self, dialect: &dyn SqlDialect, limit: u64, offset: u64) -> String {
        dialect.paginate(&self.ordered_sql(), limit, offset)
    }

    /// The query restricted to one row of `table`.
    ///
    /// Placeholders 1..n bind the table's primary key columns in key order.
    pub fn restricted_sql(&self, dialect: &dyn SqlDialect, table: &str) -> Result<String> {
        let descriptor = self
            .tables
            .iter()
            .find(|t| t.name == table)
            .ok_or_else(|| CdcError::validation(format!("table {} is not part of the query", table)))?;
        let pk = descriptor.primary_key_columns();
        if pk.is_empty() {
            return Err(CdcError::validation(format!("table {} has no primary key", table)));
        }
        let filter: Vec<String> = pk
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "{} = {}",
                    dialect.qualified_column(table, &c.name),
                    dialect.placeholder(i + 1)
                )
            })
            .collect();
        Ok(format!(
            "{} WHERE {} ORDER BY {}",
            self.sql,
            filter.join(" AND "),
            self.order_by
        ))
    }

    /// Row estimate used as the progress total; `None` when it cannot be had
    pub async fn estimate_rows(&self, ctx: &SyncContext) -> Option<u64> {
        match estimate_query_rows(
            &ctx.conn,
            ctx.dialect.as_ref(),
            &ctx.retry,
            &self.sql,
            DEFAULT_ESTIMATE_THRESHOLD,
        )
        .await
        {
            Ok(estimate) => Some(estimate),
            Err(e) => {
                warn!(error = %e, "Row estimate failed, progress stays at 0%");
                None
            }
        }
    }
}

/// Give `progress` a total from the query estimate unless it already has one
pub(crate) async fn ensure_total(ctx: &SyncContext, query: &ExtractionQuery, progress: Option<&ProgressReporter>) {
    let Some(progress) = progress else {
        return;
    };
    if progress.total().is_some() {
        return;
    }
    if let Some(estimate) = query.estimate_rows(ctx).await {
        debug!(estimate, "Progress total from row estimate");
        progress.set_total(estimate);
    }
}

/// Copy of `table` reduced to the selected columns plus its primary key
fn narrow(table: &TableDescriptor, selection: Option<&[(String, String)]>) -> Result<TableDescriptor> {
    let Some(selection) = selection else {
        return Ok(table.clone());
    };
    let wanted: Vec<&str> = selection
        .iter()
        .filter(|(t, _)| *t == table.name)
        .map(|(_, c)| c.as_str())
        .collect();
    for column in &wanted {
        if table.column(column).is_none() {
            return Err(CdcError::validation(format!(
                "unknown column {}.{}",
                table.name, column
            )));
        }
    }

    let mut narrowed = table.clone();
    if wanted.is_empty() {
        narrowed.columns.clear();
        return Ok(narrowed);
    }
    let pk: Vec<String> = table
        .primary_key_columns()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    narrowed
        .columns
        .retain(|c| wanted.contains(&c.name.as_str()) || pk.contains(&c.name));
    Ok(narrowed)
}

/// Sequential pager over an extraction query, keying each row
pub struct KeyedPager<'a> {
    ctx: &'a SyncContext,
    query: &'a ExtractionQuery,
    offset: u64,
    done: bool,
}

impl<'a> KeyedPager<'a> {
    /// Start at the first row
    pub fn new(ctx: &'a SyncContext, query: &'a ExtractionQuery) -> Self {
        Self {
            ctx,
            query,
            offset: 0,
            done: false,
        }
    }

    /// Rows read so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next page with row keys, `None` once exhausted.
    ///
    /// Ordinals are 1-based across the whole query.
    pub async fn next_page(&mut self) -> Result<Option<Vec<(RowKey, Row)>>> {
        if self.done {
            return Ok(None);
        }
        let limit = self.ctx.page_size as u64;
        let sql = self.query.page_sql(self.ctx.dialect.as_ref(), limit, self.offset);
        let rows = retry_db_call(&self.ctx.retry, "extraction page", || self.ctx.conn.query(&sql, &[])).await?;

        if (rows.len() as u64) < limit {
            self.done = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let start = self.offset;
        self.offset += rows.len() as u64;
        let keyer = self.query.keyer();
        Ok(Some(
            rows.into_iter()
                .enumerate()
                .map(|(i, row)| (keyer.key(&row, start + i as u64 + 1), row))
                .collect(),
        ))
    }
}

/// Initial extraction into the canonical collection
pub struct BulkLoader {
    ctx: SyncContext,
    query: ExtractionQuery,
}

impl BulkLoader {
    /// Loader for `query`
    pub fn new(ctx: SyncContext, query: ExtractionQuery) -> Self {
        Self { ctx, query }
    }

    /// Page through the query and write every row as LOADED.
    ///
    /// Returns the number of rows written. Progress is reported after each
    /// page against the row estimate of the query, taken up front unless the
    /// reporter already has a total.
    pub async fn run(&self, progress: Option<&ProgressReporter>) -> Result<u64> {
        let canonical = self.ctx.collections.canonical();
        info!(collection = %canonical, "Bulk load started");
        ensure_total(&self.ctx, &self.query, progress).await;

        let mut pager = KeyedPager::new(&self.ctx, &self.query);
        let mut loaded = 0u64;
        while let Some(page) = pager.next_page().await? {
            let records: Vec<StagingRecord> = page
                .into_iter()
                .map(|(key, row)| StagingRecord::new(key, RecordState::Loaded, row.into_document()))
                .collect();
            loaded += self.ctx.staging.insert_many(&canonical, records).await?;
            debug!(loaded, "Bulk load page written");
            if let Some(progress) = progress {
                progress.processing(loaded);
            }
        }

        info!(collection = %canonical, loaded, "Bulk load finished");
        Ok(loaded)
    }
}
