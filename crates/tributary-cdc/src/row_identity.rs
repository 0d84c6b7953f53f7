//! Row identity
//!
//! Every extracted row gets a [`RowKey`]: a SHA-256 hex digest that stays
//! the same across runs for the same logical row. Change detection compares
//! keys computed on different days, so the inputs to the digest are fixed:
//!
//! - table with a primary key: the key column values, in key order
//! - table without one: every column value, then the 1-based extraction ordinal
//! - joined row: the per-table keys, in tree order, hashed again
//!
//! Values are rendered with [`Value::to_text`], prefixed with their length
//! in characters (`3:abc`) and joined with a unit separator (0x1F). NULL and
//! absent values hash as `~`, so NULL and the empty string (`0:`) differ.
//! Binary values are base64 encoded first.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tributary_rdbc::schema::TableDescriptor;
use tributary_rdbc::types::{Row, Value};

/// Separator between table and column in extraction aliases
pub const FIELD_NAME_SEP: &str = "__";

const VALUE_SEP: char = '\u{1f}';

const NULL_TEXT: &str = "~";

/// Extraction alias of a column: `{table}__{column}`
pub fn field_alias(table: &str, column: &str) -> String {
    format!("{}{}{}", table, FIELD_NAME_SEP, column)
}

/// Deterministic identity of one logical source row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(String);

impl RowKey {
    /// Wrap an existing hex digest
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Digest of arbitrary text
    pub fn digest(text: &str) -> Self {
        Self(hex::encode(Sha256::digest(text.as_bytes())))
    }

    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of a joined row built from its per-table keys
    pub fn composite<'a>(keys: impl IntoIterator<Item = &'a RowKey>) -> Self {
        let joined: String = keys.into_iter().map(|k| k.0.as_str()).collect();
        Self::digest(&joined)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Text fed to the digest for one value
pub fn hash_text(value: &Value) -> String {
    let text = match value {
        Value::Null => return NULL_TEXT.to_string(),
        Value::Bytes(bytes) => BASE64.encode(bytes),
        other => match other.to_text() {
            Some(text) => text,
            None => return NULL_TEXT.to_string(),
        },
    };
    format!("{}:{}", text.chars().count(), text)
}

/// Computes keys for the rows of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableKeyer {
    table: String,
    key_fields: Vec<String>,
    has_primary_key: bool,
}

impl TableKeyer {
    /// Keyer reading plain column names (`id`, `name`)
    pub fn new(table: &TableDescriptor) -> Self {
        Self::build(table, |c| c.to_string())
    }

    /// Keyer reading extraction aliases (`orders__id`)
    pub fn aliased(table: &TableDescriptor) -> Self {
        Self::build(table, |c| field_alias(&table.name, c))
    }

    fn build(table: &TableDescriptor, field: impl Fn(&str) -> String) -> Self {
        let pk = table.primary_key_columns();
        let has_primary_key = !pk.is_empty();
        let key_fields = if has_primary_key {
            pk.iter().map(|c| field(&c.name)).collect()
        } else {
            table.columns.iter().map(|c| field(&c.name)).collect()
        };
        Self {
            table: table.name.clone(),
            key_fields,
            has_primary_key,
        }
    }

    /// Table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether keys come from a declared primary key
    pub fn has_primary_key(&self) -> bool {
        self.has_primary_key
    }

    /// Key of `row`, the `ordinal`-th row extracted (1-based).
    ///
    /// The ordinal only contributes when the table has no primary key.
    /// Missing fields hash like NULL.
    pub fn key(&self, row: &Row, ordinal: u64) -> RowKey {
        let mut text = String::new();
        for (i, field) in self.key_fields.iter().enumerate() {
            if i > 0 {
                text.push(VALUE_SEP);
            }
            match row.get_by_name(field) {
                Some(value) => text.push_str(&hash_text(value)),
                None => text.push_str(NULL_TEXT),
            }
        }
        if !self.has_primary_key {
            text.push(VALUE_SEP);
            text.push_str(&ordinal.to_string());
        }
        RowKey::digest(&text)
    }
}

/// Keys rows of a join across several tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKeyer {
    tables: Vec<TableKeyer>,
}

impl RowKeyer {
    /// Keyer over aliased columns of `tables`, in tree order
    pub fn for_tables<'a>(tables: impl IntoIterator<Item = &'a TableDescriptor>) -> Self {
        Self {
            tables: tables.into_iter().map(TableKeyer::aliased).collect(),
        }
    }

    /// Keyer for a single table read with plain column names
    pub fn plain(table: &TableDescriptor) -> Self {
        Self {
            tables: vec![TableKeyer::new(table)],
        }
    }

    /// Per-table keyers
    pub fn tables(&self) -> &[TableKeyer] {
        &self.tables
    }

    /// Key of one row; a single table's key is used as is
    pub fn key(&self, row: &Row, ordinal: u64) -> RowKey {
        match self.tables.as_slice() {
            [single] => single.key(row, ordinal),
            many => {
                let keys: Vec<RowKey> = many.iter().map(|t| t.key(row, ordinal)).collect();
                RowKey::composite(&keys)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_rdbc::schema::{CanonicalType, ColumnDescriptor};

    fn pk_table() -> TableDescriptor {
        TableDescriptor::new("t", "1")
            .with_column(ColumnDescriptor::new("id", CanonicalType::Integer).primary())
            .with_column(ColumnDescriptor::new("v", CanonicalType::Text))
    }

    fn row(id: i64, v: &str) -> Row {
        Row::from_pairs([("id", Value::from(id)), ("v", Value::from(v))])
    }

    #[test]
    fn test_digest_is_sha256_hex() {
        let key = RowKey::digest("abc");
        assert_eq!(
            key.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_primary_key_ignores_other_columns() {
        let keyer = TableKeyer::new(&pk_table());
        assert!(keyer.has_primary_key());
        assert_eq!(keyer.key(&row(1, "a"), 1), keyer.key(&row(1, "b"), 9));
        assert_ne!(keyer.key(&row(1, "a"), 1), keyer.key(&row(2, "a"), 1));
    }

    #[test]
    fn test_binary_values_are_base64_encoded() {
        assert_eq!(hash_text(&Value::Bytes(vec![0xff, 0x00])), "4:/wA=");
        assert_eq!(hash_text(&Value::Null), "~");
    }

    #[test]
    fn test_null_differs_from_empty_string() {
        assert_eq!(hash_text(&Value::from("")), "0:");
        let keyer = TableKeyer::new(
            &TableDescriptor::new("t", "1")
                .with_column(ColumnDescriptor::new("a", CanonicalType::Text).primary())
                .with_column(ColumnDescriptor::new("b", CanonicalType::Text).primary()),
        );
        let empty = Row::from_pairs([("a", Value::from("")), ("b", Value::from("x"))]);
        let null = Row::from_pairs([("a", Value::Null), ("b", Value::from("x"))]);
        let missing = Row::from_pairs([("b", Value::from("x"))]);
        assert_ne!(keyer.key(&empty, 1), keyer.key(&null, 1));
        assert_eq!(keyer.key(&null, 1), keyer.key(&missing, 1));
    }

    #[test]
    fn test_separator_inside_value_does_not_collide() {
        let keyer = TableKeyer::new(
            &TableDescriptor::new("t", "1")
                .with_column(ColumnDescriptor::new("a", CanonicalType::Text).primary())
                .with_column(ColumnDescriptor::new("b", CanonicalType::Text).primary()),
        );
        let split = Row::from_pairs([("a", Value::from("x\u{1f}y")), ("b", Value::from("z"))]);
        let shifted = Row::from_pairs([("a", Value::from("x")), ("b", Value::from("y\u{1f}z"))]);
        assert_ne!(keyer.key(&split, 1), keyer.key(&shifted, 1));
    }

    #[test]
    fn test_aliased_fields() {
        let keyer = TableKeyer::aliased(&pk_table());
        let aliased = Row::from_pairs([("t__id", Value::from(1i64))]);
        assert_eq!(keyer.key(&aliased, 1), TableKeyer::new(&pk_table()).key(&row(1, "x"), 1));
    }

    #[test]
    fn test_composite_key_depends_on_order() {
        let a = RowKey::digest("a");
        let b = RowKey::digest("b");
        assert_ne!(RowKey::composite([&a, &b]), RowKey::composite([&b, &a]));
    }
}
