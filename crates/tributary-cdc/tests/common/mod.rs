//! Shared test fixtures: a paging in-memory connection and table builders

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tributary_cdc::capture::SyncContext;
use tributary_cdc::join_tree::{ColumnPair, JoinKind, JoinTree, TableRef};
use tributary_cdc::row_identity::field_alias;
use tributary_cdc::staging::{CollectionNames, MemoryStagingStore};
use tributary_rdbc::connection::Connection;
use tributary_rdbc::dialect::MySqlDialect;
use tributary_rdbc::schema::{CanonicalType, ColumnDescriptor, ForeignKeyDescriptor, TableDescriptor};
use tributary_rdbc::types::Row;
use tributary_rdbc::{Result, Value};

/// Connection answering by substring rules and honoring `LIMIT n OFFSET m`.
///
/// Rules are matched in registration order; rows can be replaced between
/// calls to simulate upstream changes. Simple `WHERE` conjunctions over
/// MySQL-quoted columns (`` `t`.`c` = ? ``, `` `c` > ? ``) filter the rows,
/// with `t.c` read from the `t__c` field. Marking shadow ids synced removes
/// those rows from every rule.
#[derive(Default)]
pub struct PagedConnection {
    rules: Mutex<Vec<(String, Vec<Row>)>>,
    log: Mutex<Vec<(String, Vec<Value>)>>,
}

impl PagedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements containing `pattern` with `rows`
    pub fn on(self, pattern: &str, rows: Vec<Row>) -> Self {
        self.rules.lock().push((pattern.to_string(), rows));
        self
    }

    /// Replace the rows of an existing rule
    pub fn set_rows(&self, pattern: &str, rows: Vec<Row>) {
        let mut rules = self.rules.lock();
        if let Some(rule) = rules.iter_mut().find(|(p, _)| p == pattern) {
            rule.1 = rows;
        } else {
            rules.push((pattern.to_string(), rows));
        }
    }

    /// Rows currently held by a rule
    pub fn rows(&self, pattern: &str) -> Vec<Row> {
        self.rules
            .lock()
            .iter()
            .find(|(p, _)| p == pattern)
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }

    /// Statements seen so far
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Parameters bound to the statements containing `pattern`
    pub fn params_for(&self, pattern: &str) -> Vec<Vec<Value>> {
        self.log
            .lock()
            .iter()
            .filter(|(sql, _)| sql.contains(pattern))
            .map(|(_, params)| params.clone())
            .collect()
    }

    fn answer(&self, sql: &str, params: &[Value]) -> Vec<Row> {
        self.log.lock().push((sql.to_string(), params.to_vec()));
        let rows = self
            .rules
            .lock()
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        let conditions = where_clause(sql);
        let rows: Vec<Row> = rows
            .into_iter()
            .filter(|row| conditions.iter().all(|c| c.holds(row, params)))
            .collect();
        match page_bounds(sql) {
            Some((limit, offset)) => rows.into_iter().skip(offset).take(limit).collect(),
            None => rows,
        }
    }

    fn mark_synced(&self, sql: &str) -> u64 {
        self.log.lock().push((sql.to_string(), Vec::new()));
        let Some((_, list)) = sql.rsplit_once("IN (") else {
            return 0;
        };
        let ids: Vec<i64> = list
            .trim_end_matches(')')
            .split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect();
        let mut removed = 0;
        for (_, rows) in self.rules.lock().iter_mut() {
            let before = rows.len();
            rows.retain(|r| !r.get_i64("cdc_id").is_some_and(|id| ids.contains(&id)));
            removed += (before - rows.len()) as u64;
        }
        removed
    }
}

/// One `field op operand` condition
struct Condition {
    field: String,
    op: &'static str,
    // placeholder index, or a literal
    operand: std::result::Result<usize, String>,
}

impl Condition {
    fn holds(&self, row: &Row, params: &[Value]) -> bool {
        let Some(value) = row.get_by_name(&self.field) else {
            // columns the fixture does not model
            return true;
        };
        let wanted = match &self.operand {
            Ok(index) => match params.get(*index) {
                Some(param) => param.clone(),
                None => return true,
            },
            Err(literal) => Value::from(literal.as_str()),
        };
        let ordering = match (value.as_i64(), wanted.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => value.to_text().cmp(&wanted.to_text()),
        };
        match self.op {
            "=" => ordering.is_eq(),
            ">" => ordering.is_gt(),
            "<" => ordering.is_lt(),
            ">=" => ordering.is_ge(),
            "<=" => ordering.is_le(),
            _ => true,
        }
    }
}

fn where_clause(sql: &str) -> Vec<Condition> {
    let Some((_, tail)) = sql.rsplit_once(" WHERE ") else {
        return Vec::new();
    };
    let clause = [" ORDER BY ", " LIMIT "]
        .iter()
        .filter_map(|end| tail.find(end))
        .min()
        .map_or(tail, |end| &tail[..end]);

    let mut next_param = 0;
    let mut conditions = Vec::new();
    for part in clause.split(" AND ") {
        let Some((lhs, op, rhs)) = ["<=", ">=", "=", ">", "<"].iter().find_map(|op| {
            part.split_once(&format!(" {} ", op))
                .map(|(l, r)| (l.trim(), *op, r.trim()))
        }) else {
            continue;
        };
        let field = lhs.replace('`', "").replace('.', "__");
        let operand = if rhs == "?" {
            next_param += 1;
            Ok(next_param - 1)
        } else {
            Err(rhs.trim_matches('\'').to_string())
        };
        conditions.push(Condition { field, op, operand });
    }
    conditions
}

fn page_bounds(sql: &str) -> Option<(usize, usize)> {
    let (_, tail) = sql.rsplit_once(" LIMIT ")?;
    let mut parts = tail.split_whitespace();
    let limit = parts.next()?.parse().ok()?;
    let offset = match (parts.next(), parts.next()) {
        (Some("OFFSET"), Some(n)) => n.parse().ok()?,
        _ => 0,
    };
    Some((limit, offset))
}

#[async_trait]
impl Connection for PagedConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        Ok(self.answer(sql, params))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        if sql.contains("SET `cdc_synced` = 1") {
            return Ok(self.mark_synced(sql));
        }
        Ok(self.answer(sql, params).len() as u64)
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// MySQL sync context over `conn` with fresh in-memory staging
pub fn mysql_context(
    conn: Arc<PagedConnection>,
    tables: &[&str],
    page_size: usize,
) -> (SyncContext, Arc<MemoryStagingStore>) {
    let staging = Arc::new(MemoryStagingStore::new());
    let names: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
    let collections = CollectionNames::derive("db.test", 3306, "bi", &names);
    let ctx = SyncContext::new(conn, Box::new(MySqlDialect), staging.clone(), collections)
        .with_page_size(page_size);
    (ctx, staging)
}

pub fn col(name: &str, ty: CanonicalType) -> ColumnDescriptor {
    ColumnDescriptor::new(name, ty)
}

pub fn pk(name: &str) -> ColumnDescriptor {
    ColumnDescriptor::new(name, CanonicalType::Integer).primary()
}

pub fn fk(source: &str, table: &str, target: &str) -> ForeignKeyDescriptor {
    ForeignKeyDescriptor::new(source, table, target)
}

/// `auth_group_permissions`, `auth_group`, `auth_permission` and `datasources`.
///
/// The link table has foreign keys to both auth tables; `datasources`
/// shares no usable column with any of them.
pub fn auth_fixture() -> Vec<TableDescriptor> {
    vec![
        TableDescriptor::new("auth_group_permissions", "1")
            .with_column(pk("id"))
            .with_column(col("group_id", CanonicalType::Integer))
            .with_column(col("permission_id", CanonicalType::Integer))
            .with_foreign_key(fk("group_id", "auth_group", "id"))
            .with_foreign_key(fk("permission_id", "auth_permission", "id")),
        TableDescriptor::new("auth_group", "1")
            .with_column(pk("id"))
            .with_column(col("name", CanonicalType::Text)),
        TableDescriptor::new("auth_permission", "1")
            .with_column(pk("id"))
            .with_column(col("name", CanonicalType::Text))
            .with_column(col("codename", CanonicalType::Text)),
        TableDescriptor::new("datasources", "1")
            .with_column(pk("id"))
            .with_column(col("db", CanonicalType::Text))
            .with_column(col("created", CanonicalType::Timestamp)),
    ]
}

/// `orders(id, customer_id, total)` and `customers(id, name)`
pub fn orders_fixture() -> Vec<TableDescriptor> {
    vec![
        TableDescriptor::new("orders", "1")
            .with_column(pk("id"))
            .with_column(col("customer_id", CanonicalType::Integer))
            .with_column(col("total", CanonicalType::DoublePrecision)),
        TableDescriptor::new("customers", "1")
            .with_column(pk("id"))
            .with_column(col("name", CanonicalType::Text)),
    ]
}

/// Join tree `orders` -> `customers` over `customer_id = id`
pub fn orders_join_tree(tables: &[TableDescriptor]) -> JoinTree {
    let mut tree = JoinTree::single(&tables[0]).with_remainder(vec![TableRef::from(&tables[1])]);
    tree.attach_remainder(
        "orders",
        "customers",
        JoinKind::Inner,
        vec![ColumnPair::eq("customer_id", "id")],
    )
    .unwrap();
    tree
}

/// Aliased row of the `orders` / `customers` join
pub fn joined_row(order: i64, customer: i64, total: f64, name: &str) -> Row {
    Row::from_pairs([
        (field_alias("orders", "id"), Value::from(order)),
        (field_alias("orders", "customer_id"), Value::from(customer)),
        (field_alias("orders", "total"), Value::from(total)),
        (field_alias("customers", "id"), Value::from(customer)),
        (field_alias("customers", "name"), Value::from(name)),
    ])
}

/// `events(kind, payload)`, no primary key
pub fn events_fixture() -> TableDescriptor {
    TableDescriptor::new("events", "1")
        .with_column(col("kind", CanonicalType::Text))
        .with_column(col("payload", CanonicalType::Text))
}

/// Aliased row as returned by an extraction query over `orders` alone
pub fn order_row(id: i64, total: f64) -> Row {
    Row::from_pairs([
        ("orders__id", Value::from(id)),
        ("orders__customer_id", Value::from(1i64)),
        ("orders__total", Value::from(total)),
    ])
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tributary_cdc=debug")
        .with_test_writer()
        .try_init();
}
