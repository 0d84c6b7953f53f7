//! SQL dialect abstraction for tributary-rdbc
//!
//! One [`SqlDialect`] implementation per database product, selected through
//! [`dialect_for`]. A dialect owns everything product-specific:
//! - Identifier quoting, placeholders and pagination
//! - Metadata queries (tables, columns, indexes, constraints, statistics)
//! - Planner row estimates
//! - Native → canonical type mapping
//! - Shadow-table and trigger DDL for trigger-based capture
//! - Deadlock / lock-wait error codes
//!
//! Metadata queries return uniformly aliased columns so the catalog can read
//! them without knowing which product produced them.
//!
//! Single-table SELECTs are built with sea-query for PostgreSQL and MySQL;
//! SQL Server and Oracle have no sea-query backend and are rendered by hand.

use sea_query::{Alias, Asterisk, MysqlQueryBuilder, PostgresQueryBuilder, Query};

use crate::connection::DatabaseType;
use crate::error::{Result, RetryKind};
use crate::schema::{CanonicalType, ColumnDescriptor, ColumnType, TableDescriptor};
use crate::security::{escape_string_literal, literal_list, validate_identifier, validate_native_type};
use crate::types::Row;

/// Prefix of shadow tables created for trigger-based capture
pub const SHADOW_PREFIX: &str = "_etl_";
/// Capture timestamp column of a shadow table
pub const CDC_CREATED_AT: &str = "cdc_created_at";
/// Source-update timestamp column of a shadow table
pub const CDC_UPDATED_AT: &str = "cdc_updated_at";
/// Change kind column (1 insert, 2 update, 3 delete)
pub const CDC_DELTA_FLAG: &str = "cdc_delta_flag";
/// Drain marker column (0 pending, 1 drained)
pub const CDC_SYNCED: &str = "cdc_synced";
/// Identity column of a shadow table; ascending ids are capture order
pub const CDC_ID: &str = "cdc_id";

/// Shadow table name for a tracked table
pub fn shadow_table_name(table: &str) -> String {
    format!("{}{}", SHADOW_PREFIX, table)
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Product this dialect speaks
    fn database_type(&self) -> DatabaseType;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a 1-based parameter index
    fn placeholder(&self, index: usize) -> String;

    /// Current timestamp expression
    fn current_timestamp(&self) -> &'static str;

    /// Quote `table.column`
    fn qualified_column(&self, table: &str, column: &str) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }

    /// Wrap a query with LIMIT/OFFSET semantics
    fn paginate(&self, sql: &str, limit: u64, offset: u64) -> String {
        format!("{} LIMIT {} OFFSET {}", sql, limit, offset)
    }

    /// SELECT a page of one table's rows
    fn select_page(&self, table: &str, columns: &[&str], limit: u64, offset: u64) -> String;

    // ---------------------------------------------------------------------
    // Metadata
    // ---------------------------------------------------------------------

    /// List base tables, one `table_name` column
    fn list_tables_sql(&self, db: &str) -> String;

    /// Columns: `table_name, column_name, data_type, is_nullable, extra, max_length`
    fn columns_sql(&self, db: &str, tables: &[String]) -> String;

    /// Index columns: `table_name, index_name, column_name, is_primary, is_unique`,
    /// ordered by position within each index
    fn indexes_sql(&self, db: &str, tables: &[String]) -> String;

    /// Constraint columns: `table_name, constraint_name, constraint_type,
    /// column_name, ref_table, ref_column, on_update, on_delete`
    fn constraints_sql(&self, db: &str, tables: &[String]) -> String;

    /// Statistics: `table_name, row_count, size_bytes`
    fn statistics_sql(&self, db: &str, tables: &[String]) -> String;

    /// Planner EXPLAIN of a query, if the product offers a textual estimate
    fn explain_sql(&self, query: &str) -> Option<String>;

    /// Extract the row estimate from EXPLAIN output
    fn parse_row_estimate(&self, rows: &[Row]) -> Option<u64>;

    /// Exact row count of a query, one `cnt` column
    fn count_sql(&self, query: &str) -> String {
        format!("SELECT COUNT(1) AS cnt FROM ({}) cnt_q", query)
    }

    /// Min/max of a timestamp column: `start_date, end_date`
    fn date_interval_sql(&self, table: &str, column: &str) -> String {
        let col = self.quote_identifier(column);
        format!(
            "SELECT MIN({col}) AS start_date, MAX({col}) AS end_date FROM {}",
            self.quote_identifier(table)
        )
    }

    // ---------------------------------------------------------------------
    // Types
    // ---------------------------------------------------------------------

    /// Native type names (lowercase, no modifiers) and their canonical type
    fn type_map(&self) -> &'static [(&'static str, CanonicalType)];

    /// Map a native type to a canonical type.
    ///
    /// Length/precision modifiers are stripped before lookup
    /// (`bigint(20)` → `bigint`). Unknown types pass through unchanged.
    fn canonical_type(&self, native: &str) -> ColumnType {
        let lowered = native.trim().to_lowercase();
        let base = match lowered.find('(') {
            Some(idx) => lowered[..idx].trim_end(),
            None => lowered.as_str(),
        };
        let base = base.strip_suffix(" unsigned").unwrap_or(base);
        self.type_map()
            .iter()
            .find(|(name, _)| *name == base)
            .map(|(_, t)| ColumnType::Canonical(*t))
            .unwrap_or_else(|| ColumnType::Native(native.to_string()))
    }

    /// Native type used for a tracked column inside its shadow table
    fn shadow_column_type(&self, column: &ColumnDescriptor) -> String {
        column.native_type.clone()
    }

    // ---------------------------------------------------------------------
    // Trigger-based capture
    // ---------------------------------------------------------------------

    /// DDL creating the shadow table and its indexes
    fn shadow_table_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>>;

    /// DDL installing AFTER INSERT/UPDATE/DELETE triggers on the tracked table
    fn trigger_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>>;

    /// DDL removing triggers and the shadow table
    fn drop_capture_ddl(&self, table: &str) -> Result<Vec<String>>;

    /// Highest pending shadow id: one `watermark` column
    fn shadow_watermark_sql(&self, shadow: &str) -> String {
        format!(
            "SELECT MAX({}) AS {} FROM {} WHERE {} = 0",
            self.quote_identifier(CDC_ID),
            self.quote_identifier("watermark"),
            self.quote_identifier(shadow),
            self.quote_identifier(CDC_SYNCED)
        )
    }

    /// Next page of pending shadow rows in id order.
    ///
    /// Keyset paging: parameter 1 is the last id already read, parameter 2
    /// the watermark. Rows committed later with a lower id stay pending and
    /// are read by the next drain.
    fn shadow_page_sql(&self, shadow: &str, columns: &[&str], limit: u64) -> String {
        let mut projection: Vec<String> =
            columns.iter().map(|c| self.quote_identifier(c)).collect();
        projection.push(self.quote_identifier(CDC_ID));
        projection.push(self.quote_identifier(CDC_CREATED_AT));
        projection.push(self.quote_identifier(CDC_DELTA_FLAG));
        let id = self.quote_identifier(CDC_ID);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = 0 AND {id} > {} AND {id} <= {} ORDER BY {id}",
            projection.join(", "),
            self.quote_identifier(shadow),
            self.quote_identifier(CDC_SYNCED),
            self.placeholder(1),
            self.placeholder(2),
        );
        self.paginate(&sql, limit, 0)
    }

    /// Mark exactly the drained shadow ids
    fn shadow_mark_synced_sql(&self, shadow: &str, ids: &[i64]) -> String {
        let list = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
        format!(
            "UPDATE {} SET {} = 1 WHERE {} IN ({})",
            self.quote_identifier(shadow),
            self.quote_identifier(CDC_SYNCED),
            self.quote_identifier(CDC_ID),
            list
        )
    }

    // ---------------------------------------------------------------------
    // Errors
    // ---------------------------------------------------------------------

    /// Vendor error codes that signal transient lock contention
    fn retry_codes(&self) -> &'static [(&'static str, RetryKind)];

    /// Classify a vendor error code
    fn classify_error_code(&self, code: &str) -> Option<RetryKind> {
        self.retry_codes()
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, kind)| *kind)
    }
}

fn column_list(dialect: &dyn SqlDialect, table: &TableDescriptor) -> Vec<String> {
    table
        .columns
        .iter()
        .map(|c| dialect.quote_identifier(&c.name))
        .collect()
}

fn check_capture_names(table: &TableDescriptor) -> Result<()> {
    validate_identifier(&table.name)?;
    for column in &table.columns {
        validate_native_type(&column.native_type)?;
    }
    Ok(())
}

fn capture_columns(dialect: &dyn SqlDialect) -> String {
    [CDC_CREATED_AT, CDC_UPDATED_AT, CDC_DELTA_FLAG, CDC_SYNCED]
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

const POSTGRES_TYPES: &[(&str, CanonicalType)] = &[
    ("smallint", CanonicalType::Integer),
    ("integer", CanonicalType::Integer),
    ("bigint", CanonicalType::Integer),
    ("smallserial", CanonicalType::Integer),
    ("serial", CanonicalType::Integer),
    ("bigserial", CanonicalType::Integer),
    ("decimal", CanonicalType::DoublePrecision),
    ("numeric", CanonicalType::DoublePrecision),
    ("real", CanonicalType::DoublePrecision),
    ("double precision", CanonicalType::DoublePrecision),
    ("character varying", CanonicalType::Text),
    ("character", CanonicalType::Text),
    ("char", CanonicalType::Text),
    ("text", CanonicalType::Text),
    ("timestamp", CanonicalType::Timestamp),
    ("timestamp without time zone", CanonicalType::Timestamp),
    ("timestamp with time zone", CanonicalType::Timestamp),
    ("date", CanonicalType::Timestamp),
    ("time", CanonicalType::Timestamp),
    ("time without time zone", CanonicalType::Timestamp),
    ("time with time zone", CanonicalType::Timestamp),
    ("interval", CanonicalType::Timestamp),
    ("bytea", CanonicalType::Binary),
    ("boolean", CanonicalType::Boolean),
];

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn current_timestamp(&self) -> &'static str {
        "now()"
    }

    fn select_page(&self, table: &str, columns: &[&str], limit: u64, offset: u64) -> String {
        let mut stmt = Query::select();
        stmt.from(Alias::new(table));
        if columns.is_empty() {
            stmt.column(Asterisk);
        } else {
            for col in columns {
                stmt.column(Alias::new(*col));
            }
        }
        stmt.limit(limit).offset(offset);
        stmt.to_string(PostgresQueryBuilder)
    }

    fn list_tables_sql(&self, _db: &str) -> String {
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
         ORDER BY table_name"
            .to_string()
    }

    fn columns_sql(&self, _db: &str, tables: &[String]) -> String {
        format!(
            "SELECT table_name, column_name, data_type, is_nullable, \
             CASE WHEN column_default LIKE 'nextval%' THEN 'serial' ELSE '' END AS extra, \
             character_maximum_length AS max_length \
             FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name IN ({}) \
             ORDER BY table_name, ordinal_position",
            literal_list(tables)
        )
    }

    fn indexes_sql(&self, _db: &str, tables: &[String]) -> String {
        format!(
            "SELECT t.relname AS table_name, i.relname AS index_name, a.attname AS column_name, \
             ix.indisprimary AS is_primary, ix.indisunique AS is_unique \
             FROM pg_class t \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             JOIN pg_index ix ON ix.indrelid = t.oid \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) ON true \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
             WHERE n.nspname = 'public' AND t.relname IN ({}) \
             ORDER BY t.relname, i.relname, k.ord",
            literal_list(tables)
        )
    }

    fn constraints_sql(&self, _db: &str, tables: &[String]) -> String {
        format!(
            "SELECT c.conrelid::regclass::text AS table_name, c.conname AS constraint_name, \
             c.contype::text AS constraint_type, a.attname AS column_name, \
             CASE WHEN c.contype = 'f' THEN c.confrelid::regclass::text END AS ref_table, \
             fa.attname AS ref_column, \
             CASE c.confupdtype WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL' \
                  WHEN 'd' THEN 'SET DEFAULT' WHEN 'r' THEN 'RESTRICT' WHEN 'a' THEN 'NO ACTION' END AS on_update, \
             CASE c.confdeltype WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL' \
                  WHEN 'd' THEN 'SET DEFAULT' WHEN 'r' THEN 'RESTRICT' WHEN 'a' THEN 'NO ACTION' END AS on_delete \
             FROM pg_constraint c \
             JOIN pg_namespace n ON n.oid = c.connamespace \
             JOIN LATERAL unnest(c.conkey) WITH ORDINALITY AS k(attnum, ord) ON true \
             JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum \
             LEFT JOIN pg_attribute fa ON fa.attrelid = c.confrelid AND fa.attnum = c.confkey[k.ord] \
             WHERE n.nspname = 'public' AND c.conrelid::regclass::text IN ({}) \
             ORDER BY table_name, constraint_name, k.ord",
            literal_list(tables)
        )
    }

    fn statistics_sql(&self, _db: &str, tables: &[String]) -> String {
        format!(
            "SELECT relname AS table_name, reltuples::bigint AS row_count, \
             relpages::bigint * 8192 AS size_bytes \
             FROM pg_class WHERE relkind = 'r' AND relname IN ({})",
            literal_list(tables)
        )
    }

    fn explain_sql(&self, query: &str) -> Option<String> {
        Some(format!("EXPLAIN {}", query))
    }

    fn parse_row_estimate(&self, rows: &[Row]) -> Option<u64> {
        let plan = rows.first()?.get(0)?.as_str()?.to_string();
        let start = plan.find("rows=")? + "rows=".len();
        let digits: String = plan[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    fn type_map(&self) -> &'static [(&'static str, CanonicalType)] {
        POSTGRES_TYPES
    }

    fn shadow_table_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        check_capture_names(table)?;
        let shadow = shadow_table_name(&table.name);
        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", self.quote_identifier(&c.name), self.shadow_column_type(c)))
            .collect();
        defs.insert(0, format!("{} bigserial PRIMARY KEY", self.quote_identifier(CDC_ID)));
        defs.push(format!("{} timestamp NOT NULL", self.quote_identifier(CDC_CREATED_AT)));
        defs.push(format!("{} timestamp", self.quote_identifier(CDC_UPDATED_AT)));
        defs.push(format!("{} smallint NOT NULL", self.quote_identifier(CDC_DELTA_FLAG)));
        defs.push(format!("{} smallint NOT NULL", self.quote_identifier(CDC_SYNCED)));

        let quoted = self.quote_identifier(&shadow);
        Ok(vec![
            format!("CREATE TABLE IF NOT EXISTS {} ({})", quoted, defs.join(", ")),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                self.quote_identifier(&format!("{}_created", shadow)),
                quoted,
                self.quote_identifier(CDC_CREATED_AT)
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                self.quote_identifier(&format!("{}_synced", shadow)),
                quoted,
                self.quote_identifier(CDC_SYNCED)
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({}, {})",
                self.quote_identifier(&format!("{}_syn_upd", shadow)),
                quoted,
                self.quote_identifier(CDC_SYNCED),
                self.quote_identifier(CDC_UPDATED_AT)
            ),
        ])
    }

    fn trigger_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        check_capture_names(table)?;
        let shadow = shadow_table_name(&table.name);
        let function = self.quote_identifier(&format!("process_{}_audit", shadow));
        let trigger = self.quote_identifier(&format!("{}_audit", shadow));
        let targets = format!(
            "{}, {}",
            column_list(self, table).join(", "),
            capture_columns(self)
        );
        let row_values = |alias: &str| {
            table
                .columns
                .iter()
                .map(|c| format!("{}.{}", alias, self.quote_identifier(&c.name)))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let insert = |alias: &str, updated: &str, flag: u8| {
            format!(
                "INSERT INTO {} ({}) SELECT {}, now(), {}, {}, 0;",
                self.quote_identifier(&shadow),
                targets,
                row_values(alias),
                updated,
                flag
            )
        };

        let body = format!(
            "CREATE OR REPLACE FUNCTION {function}() RETURNS TRIGGER AS $body$\n\
             BEGIN\n\
             IF (TG_OP = 'DELETE') THEN\n    {del}\n    RETURN OLD;\n\
             ELSIF (TG_OP = 'UPDATE') THEN\n    {upd}\n    RETURN NEW;\n\
             ELSIF (TG_OP = 'INSERT') THEN\n    {ins}\n    RETURN NEW;\n\
             END IF;\n\
             RETURN NULL;\n\
             END;\n\
             $body$ LANGUAGE plpgsql",
            del = insert("OLD", "NULL", 3),
            upd = insert("NEW", "now()", 2),
            ins = insert("NEW", "NULL", 1),
        );

        let source = self.quote_identifier(&table.name);
        Ok(vec![
            body,
            format!("DROP TRIGGER IF EXISTS {} ON {}", trigger, source),
            format!(
                "CREATE TRIGGER {} AFTER INSERT OR UPDATE OR DELETE ON {} \
                 FOR EACH ROW EXECUTE PROCEDURE {}()",
                trigger, source, function
            ),
        ])
    }

    fn drop_capture_ddl(&self, table: &str) -> Result<Vec<String>> {
        validate_identifier(table)?;
        let shadow = shadow_table_name(table);
        Ok(vec![
            format!(
                "DROP TRIGGER IF EXISTS {} ON {}",
                self.quote_identifier(&format!("{}_audit", shadow)),
                self.quote_identifier(table)
            ),
            format!(
                "DROP FUNCTION IF EXISTS {}()",
                self.quote_identifier(&format!("process_{}_audit", shadow))
            ),
            format!("DROP TABLE IF EXISTS {}", self.quote_identifier(&shadow)),
        ])
    }

    fn retry_codes(&self) -> &'static [(&'static str, RetryKind)] {
        &[("40P01", RetryKind::Deadlock), ("55P03", RetryKind::LockWait)]
    }
}

// ===========================================================================
// MySQL
// ===========================================================================

const MYSQL_TYPES: &[(&str, CanonicalType)] = &[
    ("int", CanonicalType::Integer),
    ("integer", CanonicalType::Integer),
    ("tinyint", CanonicalType::Integer),
    ("smallint", CanonicalType::Integer),
    ("mediumint", CanonicalType::Integer),
    ("bigint", CanonicalType::Integer),
    ("float", CanonicalType::DoublePrecision),
    ("double", CanonicalType::DoublePrecision),
    ("decimal", CanonicalType::DoublePrecision),
    ("char", CanonicalType::Text),
    ("varchar", CanonicalType::Text),
    ("text", CanonicalType::Text),
    ("tinytext", CanonicalType::Text),
    ("mediumtext", CanonicalType::Text),
    ("longtext", CanonicalType::Text),
    ("enum", CanonicalType::Text),
    ("date", CanonicalType::Timestamp),
    ("datetime", CanonicalType::Timestamp),
    ("timestamp", CanonicalType::Timestamp),
    ("time", CanonicalType::Timestamp),
    ("year", CanonicalType::Timestamp),
    ("blob", CanonicalType::Binary),
    ("tinyblob", CanonicalType::Binary),
    ("mediumblob", CanonicalType::Binary),
    ("longblob", CanonicalType::Binary),
    ("varbinary", CanonicalType::Binary),
    ("binary", CanonicalType::Binary),
    ("bool", CanonicalType::Boolean),
    ("boolean", CanonicalType::Boolean),
];

/// MySQL dialect
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn current_timestamp(&self) -> &'static str {
        "NOW()"
    }

    fn select_page(&self, table: &str, columns: &[&str], limit: u64, offset: u64) -> String {
        let mut stmt = Query::select();
        stmt.from(Alias::new(table));
        if columns.is_empty() {
            stmt.column(Asterisk);
        } else {
            for col in columns {
                stmt.column(Alias::new(*col));
            }
        }
        stmt.limit(limit).offset(offset);
        stmt.to_string(MysqlQueryBuilder)
    }

    fn list_tables_sql(&self, db: &str) -> String {
        format!(
            "SELECT TABLE_NAME AS table_name FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
            escape_string_literal(db)
        )
    }

    fn columns_sql(&self, db: &str, tables: &[String]) -> String {
        format!(
            "SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name, \
             COLUMN_TYPE AS data_type, IS_NULLABLE AS is_nullable, EXTRA AS extra, \
             CHARACTER_MAXIMUM_LENGTH AS max_length \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME IN ({}) \
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
            escape_string_literal(db),
            literal_list(tables)
        )
    }

    fn indexes_sql(&self, db: &str, tables: &[String]) -> String {
        format!(
            "SELECT TABLE_NAME AS table_name, INDEX_NAME AS index_name, \
             COLUMN_NAME AS column_name, INDEX_NAME = 'PRIMARY' AS is_primary, \
             NON_UNIQUE = 0 AS is_unique \
             FROM INFORMATION_SCHEMA.STATISTICS \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME IN ({}) \
             ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX",
            escape_string_literal(db),
            literal_list(tables)
        )
    }

    fn constraints_sql(&self, db: &str, tables: &[String]) -> String {
        format!(
            "SELECT tc.TABLE_NAME AS table_name, tc.CONSTRAINT_NAME AS constraint_name, \
             tc.CONSTRAINT_TYPE AS constraint_type, kcu.COLUMN_NAME AS column_name, \
             kcu.REFERENCED_TABLE_NAME AS ref_table, kcu.REFERENCED_COLUMN_NAME AS ref_column, \
             rc.UPDATE_RULE AS on_update, rc.DELETE_RULE AS on_delete \
             FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
             JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
               ON kcu.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA \
              AND kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
              AND kcu.TABLE_NAME = tc.TABLE_NAME \
             LEFT JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc \
               ON rc.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA \
              AND rc.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
             WHERE tc.TABLE_SCHEMA = '{}' AND tc.TABLE_NAME IN ({}) \
             ORDER BY tc.TABLE_NAME, tc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION",
            escape_string_literal(db),
            literal_list(tables)
        )
    }

    fn statistics_sql(&self, db: &str, tables: &[String]) -> String {
        format!(
            "SELECT TABLE_NAME AS table_name, TABLE_ROWS AS row_count, \
             DATA_LENGTH AS size_bytes FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME IN ({})",
            escape_string_literal(db),
            literal_list(tables)
        )
    }

    fn explain_sql(&self, query: &str) -> Option<String> {
        Some(format!("EXPLAIN {}", query))
    }

    /// Nested-loop estimate: product of the per-table `rows` column
    fn parse_row_estimate(&self, rows: &[Row]) -> Option<u64> {
        if rows.is_empty() {
            return None;
        }
        let mut total: u64 = 1;
        for row in rows {
            let n = row.get_i64("rows")?;
            total = total.saturating_mul(n.max(0) as u64);
        }
        Some(total)
    }

    fn type_map(&self) -> &'static [(&'static str, CanonicalType)] {
        MYSQL_TYPES
    }

    fn shadow_column_type(&self, column: &ColumnDescriptor) -> String {
        let native = column.native_type.to_lowercase();
        let sized = matches!(native.as_str(), "varchar" | "char" | "varbinary" | "binary");
        if sized {
            format!("{}({})", native, column.max_length.unwrap_or(255))
        } else {
            column.native_type.clone()
        }
    }

    fn shadow_table_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        check_capture_names(table)?;
        let shadow = shadow_table_name(&table.name);
        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", self.quote_identifier(&c.name), self.shadow_column_type(c)))
            .collect();
        defs.insert(
            0,
            format!("{} bigint NOT NULL AUTO_INCREMENT PRIMARY KEY", self.quote_identifier(CDC_ID)),
        );
        defs.push(format!("{} datetime(6) NOT NULL", self.quote_identifier(CDC_CREATED_AT)));
        defs.push(format!("{} datetime(6) NULL", self.quote_identifier(CDC_UPDATED_AT)));
        defs.push(format!("{} smallint NOT NULL", self.quote_identifier(CDC_DELTA_FLAG)));
        defs.push(format!("{} smallint NOT NULL", self.quote_identifier(CDC_SYNCED)));
        defs.push(format!(
            "INDEX {} ({})",
            self.quote_identifier(&format!("{}_created", shadow)),
            self.quote_identifier(CDC_CREATED_AT)
        ));
        defs.push(format!(
            "INDEX {} ({})",
            self.quote_identifier(&format!("{}_synced", shadow)),
            self.quote_identifier(CDC_SYNCED)
        ));
        defs.push(format!(
            "INDEX {} ({}, {})",
            self.quote_identifier(&format!("{}_syn_upd", shadow)),
            self.quote_identifier(CDC_SYNCED),
            self.quote_identifier(CDC_UPDATED_AT)
        ));

        Ok(vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quote_identifier(&shadow),
            defs.join(", ")
        )])
    }

    fn trigger_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        check_capture_names(table)?;
        let shadow = self.quote_identifier(&shadow_table_name(&table.name));
        let source = self.quote_identifier(&table.name);
        let targets = format!(
            "{}, {}",
            column_list(self, table).join(", "),
            capture_columns(self)
        );

        let mut statements = Vec::with_capacity(6);
        for (event, alias, updated, flag) in [
            ("insert", "NEW", "NULL", 1),
            ("update", "NEW", "NOW(6)", 2),
            ("delete", "OLD", "NULL", 3),
        ] {
            let trigger = self.quote_identifier(&format!("cdc_{}_{}", table.name, event));
            let values = table
                .columns
                .iter()
                .map(|c| format!("{}.{}", alias, self.quote_identifier(&c.name)))
                .collect::<Vec<_>>()
                .join(", ");
            statements.push(format!("DROP TRIGGER IF EXISTS {}", trigger));
            statements.push(format!(
                "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW \
                 INSERT INTO {} ({}) VALUES ({}, NOW(6), {}, {}, 0)",
                trigger,
                event.to_uppercase(),
                source,
                shadow,
                targets,
                values,
                updated,
                flag
            ));
        }
        Ok(statements)
    }

    fn drop_capture_ddl(&self, table: &str) -> Result<Vec<String>> {
        validate_identifier(table)?;
        let mut statements: Vec<String> = ["insert", "update", "delete"]
            .iter()
            .map(|event| {
                format!(
                    "DROP TRIGGER IF EXISTS {}",
                    self.quote_identifier(&format!("cdc_{}_{}", table, event))
                )
            })
            .collect();
        statements.push(format!(
            "DROP TABLE IF EXISTS {}",
            self.quote_identifier(&shadow_table_name(table))
        ));
        Ok(statements)
    }

    fn retry_codes(&self) -> &'static [(&'static str, RetryKind)] {
        &[("1213", RetryKind::Deadlock), ("1205", RetryKind::LockWait)]
    }
}

// ===========================================================================
// SQL Server - manual SQL (no sea-query backend)
// ===========================================================================

const SQLSERVER_TYPES: &[(&str, CanonicalType)] = &[
    ("int", CanonicalType::Integer),
    ("tinyint", CanonicalType::Integer),
    ("smallint", CanonicalType::Integer),
    ("bigint", CanonicalType::Integer),
    ("float", CanonicalType::DoublePrecision),
    ("decimal", CanonicalType::DoublePrecision),
    ("numeric", CanonicalType::DoublePrecision),
    ("real", CanonicalType::DoublePrecision),
    ("money", CanonicalType::DoublePrecision),
    ("char", CanonicalType::Text),
    ("varchar", CanonicalType::Text),
    ("text", CanonicalType::Text),
    ("nchar", CanonicalType::Text),
    ("nvarchar", CanonicalType::Text),
    ("ntext", CanonicalType::Text),
    ("time", CanonicalType::Timestamp),
    ("date", CanonicalType::Timestamp),
    ("smalldatetime", CanonicalType::Timestamp),
    ("datetime", CanonicalType::Timestamp),
    ("datetime2", CanonicalType::Timestamp),
    ("datetimeoffset", CanonicalType::Timestamp),
    ("binary", CanonicalType::Binary),
    ("varbinary", CanonicalType::Binary),
    ("image", CanonicalType::Binary),
    ("bit", CanonicalType::Boolean),
];

/// SQL Server dialect
#[derive(Debug, Clone, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn current_timestamp(&self) -> &'static str {
        "SYSDATETIME()"
    }

    /// OFFSET-FETCH requires ORDER BY; an arbitrary order is supplied when absent
    fn paginate(&self, sql: &str, limit: u64, offset: u64) -> String {
        let ordered = if sql.to_uppercase().contains("ORDER BY") {
            sql.to_string()
        } else {
            format!("{} ORDER BY (SELECT NULL)", sql)
        };
        format!(
            "{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            ordered, offset, limit
        )
    }

    fn select_page(&self, table: &str, columns: &[&str], limit: u64, offset: u64) -> String {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        self.paginate(
            &format!("SELECT {} FROM {}", projection, self.quote_identifier(table)),
            limit,
            offset,
        )
    }

    fn list_tables_sql(&self, db: &str) -> String {
        format!(
            "SELECT TABLE_NAME AS table_name FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_CATALOG = '{}' AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
            escape_string_literal(db)
        )
    }

    fn columns_sql(&self, db: &str, tables: &[String]) -> String {
        format!(
            "SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name, \
             DATA_TYPE AS data_type, IS_NULLABLE AS is_nullable, \
             CASE WHEN COLUMNPROPERTY(OBJECT_ID(TABLE_SCHEMA + '.' + TABLE_NAME), COLUMN_NAME, 'IsIdentity') = 1 \
                  THEN 'identity' ELSE '' END AS extra, \
             CHARACTER_MAXIMUM_LENGTH AS max_length \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_CATALOG = '{}' AND TABLE_NAME IN ({}) \
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
            escape_string_literal(db),
            literal_list(tables)
        )
    }

    fn indexes_sql(&self, _db: &str, tables: &[String]) -> String {
        format!(
            "SELECT t.name AS table_name, i.name AS index_name, c.name AS column_name, \
             i.is_primary_key AS is_primary, i.is_unique AS is_unique \
             FROM sys.indexes i \
             JOIN sys.tables t ON t.object_id = i.object_id \
             JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
             JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
             WHERE i.name IS NOT NULL AND t.name IN ({}) \
             ORDER BY t.name, i.name, ic.key_ordinal",
            literal_list(tables)
        )
    }

    fn constraints_sql(&self, db: &str, tables: &[String]) -> String {
        format!(
            "SELECT tc.TABLE_NAME AS table_name, tc.CONSTRAINT_NAME AS constraint_name, \
             tc.CONSTRAINT_TYPE AS constraint_type, kcu.COLUMN_NAME AS column_name, \
             ccu.TABLE_NAME AS ref_table, ccu.COLUMN_NAME AS ref_column, \
             rc.UPDATE_RULE AS on_update, rc.DELETE_RULE AS on_delete \
             FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
             JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
               ON kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME AND kcu.TABLE_NAME = tc.TABLE_NAME \
             LEFT JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc \
               ON rc.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
             LEFT JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ccu \
               ON ccu.CONSTRAINT_NAME = rc.UNIQUE_CONSTRAINT_NAME \
              AND ccu.ORDINAL_POSITION = kcu.ORDINAL_POSITION \
             WHERE tc.TABLE_CATALOG = '{}' AND tc.TABLE_NAME IN ({}) \
             ORDER BY tc.TABLE_NAME, tc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION",
            escape_string_literal(db),
            literal_list(tables)
        )
    }

    fn statistics_sql(&self, _db: &str, tables: &[String]) -> String {
        format!(
            "SELECT t.name AS table_name, \
             SUM(CASE WHEN p.index_id IN (0, 1) THEN p.row_count ELSE 0 END) AS row_count, \
             SUM(p.used_page_count) * 8192 AS size_bytes \
             FROM sys.dm_db_partition_stats p \
             JOIN sys.tables t ON t.object_id = p.object_id \
             WHERE t.name IN ({}) GROUP BY t.name",
            literal_list(tables)
        )
    }

    fn explain_sql(&self, _query: &str) -> Option<String> {
        None
    }

    fn parse_row_estimate(&self, _rows: &[Row]) -> Option<u64> {
        None
    }

    fn count_sql(&self, query: &str) -> String {
        format!("SELECT COUNT_BIG(1) AS cnt FROM ({}) AS cnt_q", query)
    }

    fn type_map(&self) -> &'static [(&'static str, CanonicalType)] {
        SQLSERVER_TYPES
    }

    fn shadow_column_type(&self, column: &ColumnDescriptor) -> String {
        let native = column.native_type.to_lowercase();
        let sized = matches!(
            native.as_str(),
            "varchar" | "nvarchar" | "char" | "nchar" | "varbinary" | "binary"
        );
        match (sized, column.max_length) {
            (true, Some(len)) if len > 0 && len <= 8000 => format!("{}({})", native, len),
            (true, _) => format!("{}(max)", native),
            (false, _) => column.native_type.clone(),
        }
    }

    fn shadow_table_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        check_capture_names(table)?;
        let shadow = shadow_table_name(&table.name);
        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", self.quote_identifier(&c.name), self.shadow_column_type(c)))
            .collect();
        defs.insert(
            0,
            format!("{} bigint IDENTITY(1,1) NOT NULL PRIMARY KEY", self.quote_identifier(CDC_ID)),
        );
        defs.push(format!("{} datetime2 NOT NULL", self.quote_identifier(CDC_CREATED_AT)));
        defs.push(format!("{} datetime2 NULL", self.quote_identifier(CDC_UPDATED_AT)));
        defs.push(format!("{} smallint NOT NULL", self.quote_identifier(CDC_DELTA_FLAG)));
        defs.push(format!("{} smallint NOT NULL", self.quote_identifier(CDC_SYNCED)));
        defs.push(format!(
            "INDEX {} ({})",
            self.quote_identifier(&format!("{}_created", shadow)),
            self.quote_identifier(CDC_CREATED_AT)
        ));
        defs.push(format!(
            "INDEX {} ({})",
            self.quote_identifier(&format!("{}_synced", shadow)),
            self.quote_identifier(CDC_SYNCED)
        ));
        defs.push(format!(
            "INDEX {} ({}, {})",
            self.quote_identifier(&format!("{}_syn_upd", shadow)),
            self.quote_identifier(CDC_SYNCED),
            self.quote_identifier(CDC_UPDATED_AT)
        ));

        Ok(vec![format!(
            "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {} ({})",
            escape_string_literal(&shadow),
            self.quote_identifier(&shadow),
            defs.join(", ")
        )])
    }

    fn trigger_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        check_capture_names(table)?;
        let shadow = self.quote_identifier(&shadow_table_name(&table.name));
        let trigger = self.quote_identifier(&format!("cdc_{}_audit", table.name));
        let targets = format!(
            "{}, {}",
            column_list(self, table).join(", "),
            capture_columns(self)
        );
        let values = |alias: &str| {
            table
                .columns
                .iter()
                .map(|c| format!("{}.{}", alias, self.quote_identifier(&c.name)))
                .collect::<Vec<_>>()
                .join(", ")
        };

        Ok(vec![format!(
            "CREATE OR ALTER TRIGGER {trigger} ON {source} AFTER INSERT, UPDATE, DELETE AS\n\
             BEGIN\n\
             SET NOCOUNT ON;\n\
             INSERT INTO {shadow} ({targets}) SELECT {ins}, SYSDATETIME(), \
             CASE WHEN EXISTS (SELECT 1 FROM deleted) THEN SYSDATETIME() ELSE NULL END, \
             CASE WHEN EXISTS (SELECT 1 FROM deleted) THEN 2 ELSE 1 END, 0 FROM inserted i;\n\
             INSERT INTO {shadow} ({targets}) SELECT {del}, SYSDATETIME(), NULL, 3, 0 \
             FROM deleted d WHERE NOT EXISTS (SELECT 1 FROM inserted);\n\
             END",
            source = self.quote_identifier(&table.name),
            ins = values("i"),
            del = values("d"),
        )])
    }

    fn drop_capture_ddl(&self, table: &str) -> Result<Vec<String>> {
        validate_identifier(table)?;
        Ok(vec![
            format!(
                "DROP TRIGGER IF EXISTS {}",
                self.quote_identifier(&format!("cdc_{}_audit", table))
            ),
            format!(
                "DROP TABLE IF EXISTS {}",
                self.quote_identifier(&shadow_table_name(table))
            ),
        ])
    }

    fn retry_codes(&self) -> &'static [(&'static str, RetryKind)] {
        &[("1205", RetryKind::Deadlock), ("1222", RetryKind::LockWait)]
    }
}

// ===========================================================================
// Oracle - manual SQL, dictionary views of the connected schema
// ===========================================================================

const ORACLE_TYPES: &[(&str, CanonicalType)] = &[
    ("integer", CanonicalType::Integer),
    ("shortinteger", CanonicalType::Integer),
    ("longinteger", CanonicalType::Integer),
    ("number", CanonicalType::DoublePrecision),
    ("decimal", CanonicalType::DoublePrecision),
    ("shortdecimal", CanonicalType::DoublePrecision),
    ("float", CanonicalType::DoublePrecision),
    ("binary_float", CanonicalType::DoublePrecision),
    ("binary_double", CanonicalType::DoublePrecision),
    ("char", CanonicalType::Text),
    ("varchar", CanonicalType::Text),
    ("varchar2", CanonicalType::Text),
    ("nchar", CanonicalType::Text),
    ("nvarchar2", CanonicalType::Text),
    ("clob", CanonicalType::Text),
    ("nclob", CanonicalType::Text),
    ("long", CanonicalType::Text),
    ("date", CanonicalType::Timestamp),
    ("timestamp", CanonicalType::Timestamp),
    ("blob", CanonicalType::Binary),
    ("raw", CanonicalType::Binary),
    ("long raw", CanonicalType::Binary),
    ("binary", CanonicalType::Binary),
    ("varbinary", CanonicalType::Binary),
    ("boolean", CanonicalType::Boolean),
];

/// Oracle dialect (12c or later).
///
/// Oracle folds unquoted aliases to upper case, so every metadata column is
/// aliased with a quoted lower-case name. Error codes are matched in their
/// `ORA-nnnnn` form.
#[derive(Debug, Clone, Default)]
pub struct OracleDialect;

impl OracleDialect {
    fn alias(&self, name: &str) -> String {
        self.quote_identifier(name)
    }

    /// PL/SQL block running `ddl` and swallowing one expected error code
    fn tolerant(&self, ddl: &str, ignored: i32) -> String {
        format!(
            "BEGIN EXECUTE IMMEDIATE '{}'; EXCEPTION WHEN OTHERS THEN IF SQLCODE != {} THEN RAISE; END IF; END;",
            escape_string_literal(ddl),
            ignored
        )
    }

    fn trigger_name(&self, table: &str, event: &str) -> String {
        self.quote_identifier(&format!("cdc_{}_{}", table, event))
    }
}

impl SqlDialect for OracleDialect {
    fn name(&self) -> &'static str {
        "Oracle"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Oracle
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!(":{}", index)
    }

    fn current_timestamp(&self) -> &'static str {
        "SYSTIMESTAMP"
    }

    fn paginate(&self, sql: &str, limit: u64, offset: u64) -> String {
        format!("{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", sql, offset, limit)
    }

    fn select_page(&self, table: &str, columns: &[&str], limit: u64, offset: u64) -> String {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        self.paginate(
            &format!("SELECT {} FROM {}", projection, self.quote_identifier(table)),
            limit,
            offset,
        )
    }

    fn list_tables_sql(&self, _db: &str) -> String {
        format!(
            "SELECT table_name AS {} FROM user_tables ORDER BY table_name",
            self.alias("table_name")
        )
    }

    fn columns_sql(&self, _db: &str, tables: &[String]) -> String {
        format!(
            "SELECT table_name AS {}, column_name AS {}, data_type AS {}, \
             CASE WHEN nullable = 'N' THEN 'NO' ELSE 'YES' END AS {}, \
             CASE WHEN identity_column = 'YES' THEN 'identity' END AS {}, \
             char_col_decl_length AS {} \
             FROM user_tab_columns WHERE table_name IN ({}) \
             ORDER BY table_name, column_id",
            self.alias("table_name"),
            self.alias("column_name"),
            self.alias("data_type"),
            self.alias("is_nullable"),
            self.alias("extra"),
            self.alias("max_length"),
            literal_list(tables)
        )
    }

    fn indexes_sql(&self, _db: &str, tables: &[String]) -> String {
        format!(
            "SELECT i.table_name AS {}, i.index_name AS {}, c.column_name AS {}, \
             CASE WHEN pk.constraint_name IS NULL THEN 0 ELSE 1 END AS {}, \
             CASE WHEN i.uniqueness = 'UNIQUE' THEN 1 ELSE 0 END AS {} \
             FROM user_indexes i \
             JOIN user_ind_columns c ON c.index_name = i.index_name \
             LEFT JOIN user_constraints pk ON pk.index_name = i.index_name AND pk.constraint_type = 'P' \
             WHERE i.table_name IN ({}) \
             ORDER BY i.table_name, i.index_name, c.column_position",
            self.alias("table_name"),
            self.alias("index_name"),
            self.alias("column_name"),
            self.alias("is_primary"),
            self.alias("is_unique"),
            literal_list(tables)
        )
    }

    fn constraints_sql(&self, _db: &str, tables: &[String]) -> String {
        format!(
            "SELECT ucc.table_name AS {}, uc.constraint_name AS {}, \
             CASE uc.constraint_type WHEN 'R' THEN 'F' ELSE uc.constraint_type END AS {}, \
             ucc.column_name AS {}, rcc.table_name AS {}, rcc.column_name AS {}, \
             'NO ACTION' AS {}, uc.delete_rule AS {} \
             FROM user_constraints uc \
             JOIN user_cons_columns ucc ON ucc.constraint_name = uc.constraint_name \
             LEFT JOIN user_cons_columns rcc \
               ON rcc.constraint_name = uc.r_constraint_name AND rcc.position = ucc.position \
             WHERE uc.constraint_type IN ('P', 'U', 'R') AND ucc.table_name IN ({}) \
             ORDER BY ucc.table_name, uc.constraint_name, ucc.position",
            self.alias("table_name"),
            self.alias("constraint_name"),
            self.alias("constraint_type"),
            self.alias("column_name"),
            self.alias("ref_table"),
            self.alias("ref_column"),
            self.alias("on_update"),
            self.alias("on_delete"),
            literal_list(tables)
        )
    }

    fn statistics_sql(&self, _db: &str, tables: &[String]) -> String {
        format!(
            "SELECT ut.table_name AS {}, ut.num_rows AS {}, s.bytes AS {} \
             FROM user_tables ut \
             LEFT JOIN user_segments s ON s.segment_name = ut.table_name AND s.segment_type = 'TABLE' \
             WHERE ut.table_name IN ({})",
            self.alias("table_name"),
            self.alias("row_count"),
            self.alias("size_bytes"),
            literal_list(tables)
        )
    }

    /// EXPLAIN PLAN writes into PLAN_TABLE instead of returning rows
    fn explain_sql(&self, _query: &str) -> Option<String> {
        None
    }

    fn parse_row_estimate(&self, _rows: &[Row]) -> Option<u64> {
        None
    }

    fn count_sql(&self, query: &str) -> String {
        format!("SELECT COUNT(1) AS {} FROM ({}) cnt_q", self.alias("cnt"), query)
    }

    fn date_interval_sql(&self, table: &str, column: &str) -> String {
        let col = self.quote_identifier(column);
        format!(
            "SELECT MIN({col}) AS {}, MAX({col}) AS {} FROM {}",
            self.alias("start_date"),
            self.alias("end_date"),
            self.quote_identifier(table)
        )
    }

    fn type_map(&self) -> &'static [(&'static str, CanonicalType)] {
        ORACLE_TYPES
    }

    fn shadow_column_type(&self, column: &ColumnDescriptor) -> String {
        let native = column.native_type.to_lowercase();
        let sized = matches!(
            native.as_str(),
            "varchar" | "varchar2" | "nvarchar2" | "char" | "nchar" | "raw"
        );
        match (sized, column.max_length) {
            (true, Some(len)) if len > 0 => format!("{}({})", native, len),
            (true, _) => format!("{}(2000)", native),
            (false, _) => column.native_type.clone(),
        }
    }

    /// One PL/SQL block; Oracle has no `CREATE TABLE IF NOT EXISTS`
    fn shadow_table_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        check_capture_names(table)?;
        let shadow = shadow_table_name(&table.name);
        let quoted = self.quote_identifier(&shadow);
        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", self.quote_identifier(&c.name), self.shadow_column_type(c)))
            .collect();
        defs.insert(
            0,
            format!("{} NUMBER GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY", self.quote_identifier(CDC_ID)),
        );
        defs.push(format!("{} TIMESTAMP NOT NULL", self.quote_identifier(CDC_CREATED_AT)));
        defs.push(format!("{} TIMESTAMP", self.quote_identifier(CDC_UPDATED_AT)));
        defs.push(format!("{} NUMBER(1) NOT NULL", self.quote_identifier(CDC_DELTA_FLAG)));
        defs.push(format!("{} NUMBER(1) NOT NULL", self.quote_identifier(CDC_SYNCED)));

        let mut statements = vec![format!("CREATE TABLE {} ({})", quoted, defs.join(", "))];
        for (suffix, columns) in [
            ("_created", vec![CDC_CREATED_AT]),
            ("_synced", vec![CDC_SYNCED]),
            ("_syn_upd", vec![CDC_SYNCED, CDC_UPDATED_AT]),
        ] {
            let columns: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
            statements.push(format!(
                "CREATE INDEX {} ON {} ({})",
                self.quote_identifier(&format!("{}{}", shadow, suffix)),
                quoted,
                columns.join(", ")
            ));
        }
        let body: Vec<String> = statements
            .iter()
            .map(|ddl| format!("EXECUTE IMMEDIATE '{}';", escape_string_literal(ddl)))
            .collect();

        Ok(vec![format!(
            "DECLARE cnt NUMBER; BEGIN \
             SELECT COUNT(*) INTO cnt FROM user_tables WHERE table_name = '{}'; \
             IF cnt = 0 THEN {} END IF; END;",
            escape_string_literal(&shadow),
            body.join(" ")
        )])
    }

    fn trigger_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        check_capture_names(table)?;
        let shadow = self.quote_identifier(&shadow_table_name(&table.name));
        let source = self.quote_identifier(&table.name);
        let targets = format!(
            "{}, {}",
            column_list(self, table).join(", "),
            capture_columns(self)
        );

        let mut statements = Vec::with_capacity(3);
        for (event, alias, updated, flag) in [
            ("insert", ":NEW", "NULL", 1),
            ("update", ":NEW", "SYSTIMESTAMP", 2),
            ("delete", ":OLD", "NULL", 3),
        ] {
            let values = table
                .columns
                .iter()
                .map(|c| format!("{}.{}", alias, self.quote_identifier(&c.name)))
                .collect::<Vec<_>>()
                .join(", ");
            statements.push(format!(
                "CREATE OR REPLACE TRIGGER {} AFTER {} ON {} FOR EACH ROW \
                 BEGIN INSERT INTO {} ({}) VALUES ({}, SYSTIMESTAMP, {}, {}, 0); END;",
                self.trigger_name(&table.name, event),
                event.to_uppercase(),
                source,
                shadow,
                targets,
                values,
                updated,
                flag
            ));
        }
        Ok(statements)
    }

    /// ORA-04080 (no such trigger) and ORA-00942 (no such table) are ignored
    fn drop_capture_ddl(&self, table: &str) -> Result<Vec<String>> {
        validate_identifier(table)?;
        let mut statements: Vec<String> = ["insert", "update", "delete"]
            .iter()
            .map(|event| {
                self.tolerant(
                    &format!("DROP TRIGGER {}", self.trigger_name(table, event)),
                    -4080,
                )
            })
            .collect();
        statements.push(self.tolerant(
            &format!("DROP TABLE {}", self.quote_identifier(&shadow_table_name(table))),
            -942,
        ));
        Ok(statements)
    }

    fn retry_codes(&self) -> &'static [(&'static str, RetryKind)] {
        &[
            ("ORA-00060", RetryKind::Deadlock),
            ("ORA-00054", RetryKind::LockWait),
            ("ORA-30006", RetryKind::LockWait),
        ]
    }
}

/// Get a dialect for a database product
pub fn dialect_for(product: DatabaseType) -> Box<dyn SqlDialect> {
    match product {
        DatabaseType::Postgres => Box::new(PostgresDialect),
        DatabaseType::MySql => Box::new(MySqlDialect),
        DatabaseType::SqlServer => Box::new(SqlServerDialect),
        DatabaseType::Oracle => Box::new(OracleDialect),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn orders() -> TableDescriptor {
        TableDescriptor::new("orders", "src")
            .with_column(ColumnDescriptor::new("id", CanonicalType::Integer).with_native_type("integer"))
            .with_column(
                ColumnDescriptor::new("note", CanonicalType::Text)
                    .with_native_type("character varying"),
            )
    }

    #[test]
    fn test_quoting() {
        assert_eq!(PostgresDialect.quote_identifier("users"), "\"users\"");
        assert_eq!(MySqlDialect.quote_identifier("users"), "`users`");
        assert_eq!(SqlServerDialect.quote_identifier("users"), "[users]");
        assert_eq!(PostgresDialect.quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_paginate() {
        assert_eq!(
            PostgresDialect.paginate("SELECT 1", 10, 20),
            "SELECT 1 LIMIT 10 OFFSET 20"
        );
        assert_eq!(
            SqlServerDialect.paginate("SELECT 1", 10, 20),
            "SELECT 1 ORDER BY (SELECT NULL) OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn test_canonical_type_strips_modifiers() {
        assert_eq!(
            MySqlDialect.canonical_type("bigint(20)"),
            ColumnType::Canonical(CanonicalType::Integer)
        );
        assert_eq!(
            MySqlDialect.canonical_type("int(10) unsigned"),
            ColumnType::Canonical(CanonicalType::Integer)
        );
        assert_eq!(
            PostgresDialect.canonical_type("timestamp with time zone"),
            ColumnType::Canonical(CanonicalType::Timestamp)
        );
        assert_eq!(
            PostgresDialect.canonical_type("tsvector"),
            ColumnType::Native("tsvector".into())
        );
    }

    #[test]
    fn test_postgres_row_estimate() {
        let rows = vec![Row::from_pairs([(
            "QUERY PLAN",
            Value::from("Seq Scan on orders  (cost=0.00..35.50 rows=2550 width=4)"),
        )])];
        assert_eq!(PostgresDialect.parse_row_estimate(&rows), Some(2550));
    }

    #[test]
    fn test_mysql_row_estimate_is_product() {
        let rows = vec![
            Row::from_pairs([("rows", Value::Int64(20))]),
            Row::from_pairs([("rows", Value::Int64(3))]),
        ];
        assert_eq!(MySqlDialect.parse_row_estimate(&rows), Some(60));
    }

    #[test]
    fn test_retry_code_classification() {
        assert_eq!(
            PostgresDialect.classify_error_code("40P01"),
            Some(RetryKind::Deadlock)
        );
        assert_eq!(
            MySqlDialect.classify_error_code("1205"),
            Some(RetryKind::LockWait)
        );
        assert_eq!(MySqlDialect.classify_error_code("1062"), None);
    }

    #[test]
    fn test_postgres_trigger_ddl() {
        let ddl = PostgresDialect.shadow_table_ddl(&orders()).unwrap();
        assert!(ddl[0].starts_with("CREATE TABLE IF NOT EXISTS \"_etl_orders\""));
        assert!(ddl[0].contains("\"cdc_delta_flag\" smallint NOT NULL"));
        assert!(ddl[0].contains("(\"cdc_id\" bigserial PRIMARY KEY, \"id\" integer"));
        assert_eq!(ddl.len(), 4);

        let triggers = PostgresDialect.trigger_ddl(&orders()).unwrap();
        assert!(triggers[0].contains("\"process__etl_orders_audit\""));
        assert!(triggers[0].contains("OLD.\"id\""));
        assert!(triggers[2].contains("AFTER INSERT OR UPDATE OR DELETE ON \"orders\""));
    }

    #[test]
    fn test_mysql_triggers_per_event() {
        let triggers = MySqlDialect.trigger_ddl(&orders()).unwrap();
        let creates: Vec<_> = triggers.iter().filter(|s| s.starts_with("CREATE")).collect();
        assert_eq!(creates.len(), 3);
        assert!(creates[2].contains("`cdc_orders_delete` AFTER DELETE"));
        assert!(creates[2].contains("OLD.`id`"));
    }

    #[test]
    fn test_oracle_capture_ddl() {
        let ddl = OracleDialect.shadow_table_ddl(&orders()).unwrap();
        assert_eq!(ddl.len(), 1);
        assert!(ddl[0].starts_with("DECLARE cnt NUMBER; BEGIN"));
        assert!(ddl[0].contains("WHERE table_name = '_etl_orders'"));
        assert!(ddl[0].contains("EXECUTE IMMEDIATE 'CREATE TABLE \"_etl_orders\" (\"cdc_id\" NUMBER GENERATED"));

        let triggers = OracleDialect.trigger_ddl(&orders()).unwrap();
        assert_eq!(triggers.len(), 3);
        assert!(triggers[2].contains("\"cdc_orders_delete\" AFTER DELETE"));
        assert!(triggers[2].contains("VALUES (:OLD.\"id\""));

        let drop = OracleDialect.drop_capture_ddl("orders").unwrap();
        assert!(drop[3].contains("'DROP TABLE \"_etl_orders\"'"));
        assert!(drop[3].contains("SQLCODE != -942"));
    }

    #[test]
    fn test_oracle_codes_and_paging() {
        assert_eq!(
            OracleDialect.classify_error_code("ORA-00060"),
            Some(RetryKind::Deadlock)
        );
        assert_eq!(
            OracleDialect.paginate("SELECT 1 FROM dual", 10, 20),
            "SELECT 1 FROM dual OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        assert_eq!(OracleDialect.placeholder(2), ":2");
        assert!(OracleDialect.list_tables_sql("x").contains("AS \"table_name\""));
    }

    #[test]
    fn test_capture_ddl_rejects_bad_names() {
        let table = TableDescriptor::new("orders; drop", "src");
        assert!(PostgresDialect.trigger_ddl(&table).is_err());
    }

    #[test]
    fn test_select_page_sea_query() {
        let sql = PostgresDialect.select_page("orders", &["id"], 5, 10);
        assert!(sql.contains("\"orders\""));
        assert!(sql.contains("LIMIT 5"));
        assert!(sql.contains("OFFSET 10"));
    }
}
