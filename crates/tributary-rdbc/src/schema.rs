//! Table descriptors produced by schema introspection
//!
//! A [`TableDescriptor`] is an immutable snapshot of one source table: its
//! columns (with canonical types), indexes, foreign keys, size statistics and
//! the value ranges of its timestamp columns. Descriptors are replaced
//! wholesale on every inspection, never patched.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform-wide logical column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalType {
    /// Whole numbers
    #[serde(rename = "integer")]
    Integer,
    /// Floating point and fixed-point numbers
    #[serde(rename = "double precision")]
    DoublePrecision,
    /// Character data
    #[serde(rename = "text")]
    Text,
    /// Dates, times, timestamps and intervals
    #[serde(rename = "timestamp")]
    Timestamp,
    /// Booleans
    #[serde(rename = "boolean")]
    Boolean,
    /// Raw bytes
    #[serde(rename = "binary")]
    Binary,
}

impl CanonicalType {
    /// All canonical types
    pub const ALL: [CanonicalType; 6] = [
        Self::Integer,
        Self::DoublePrecision,
        Self::Text,
        Self::Timestamp,
        Self::Boolean,
        Self::Binary,
    ];

    /// Canonical name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::DoublePrecision => "double precision",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
        }
    }

    /// Parse a canonical name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column type after canonical mapping.
///
/// Mapping is best effort: a native type with no canonical counterpart is
/// carried through unchanged, and consumers must tolerate it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    /// Mapped to a canonical type
    Canonical(CanonicalType),
    /// Unmapped native type, passed through as-is
    Native(String),
}

impl ColumnType {
    /// Canonical type, if mapped
    pub fn canonical(&self) -> Option<CanonicalType> {
        match self {
            Self::Canonical(t) => Some(*t),
            Self::Native(_) => None,
        }
    }

    /// Type name as exposed to consumers
    pub fn as_str(&self) -> &str {
        match self {
            Self::Canonical(t) => t.as_str(),
            Self::Native(s) => s.as_str(),
        }
    }

    /// Whether this column holds timestamps
    pub fn is_timestamp(&self) -> bool {
        self.canonical() == Some(CanonicalType::Timestamp)
    }

    /// Whether this column holds raw bytes
    pub fn is_binary(&self) -> bool {
        self.canonical() == Some(CanonicalType::Binary)
    }
}

impl From<CanonicalType> for ColumnType {
    fn from(t: CanonicalType) -> Self {
        Self::Canonical(t)
    }
}

impl From<String> for ColumnType {
    fn from(s: String) -> Self {
        match CanonicalType::from_name(&s) {
            Some(t) => Self::Canonical(t),
            None => Self::Native(s),
        }
    }
}

impl From<ColumnType> for String {
    fn from(t: ColumnType) -> Self {
        match t {
            ColumnType::Canonical(c) => c.as_str().to_string(),
            ColumnType::Native(s) => s,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column description with derived index/key flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Canonical (or passed-through) type
    pub column_type: ColumnType,
    /// Vendor type name as reported by the source
    pub native_type: String,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Maximum length for character/binary types
    pub max_length: Option<u32>,
    /// Extra marker such as `serial` or `auto_increment`
    pub extra: Option<String>,
    /// Column appears in at least one index
    pub is_index: bool,
    /// Covered by a UNIQUE constraint or unique index
    pub is_unique: bool,
    /// Covered by the PRIMARY KEY constraint
    pub is_primary: bool,
}

impl ColumnDescriptor {
    /// Create a nullable, unindexed column
    pub fn new(name: impl Into<String>, column_type: impl Into<ColumnType>) -> Self {
        let column_type = column_type.into();
        Self {
            name: name.into(),
            native_type: column_type.as_str().to_string(),
            column_type,
            nullable: true,
            max_length: None,
            extra: None,
            is_index: false,
            is_unique: false,
            is_primary: false,
        }
    }

    /// Mark as primary key column
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.is_unique = true;
        self.is_index = true;
        self.nullable = false;
        self
    }

    /// Set the native type
    pub fn with_native_type(mut self, native: impl Into<String>) -> Self {
        self.native_type = native.into();
        self
    }
}

/// Index on a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name
    pub name: String,
    /// Column names (in order)
    pub columns: Vec<String>,
    /// Whether the index is unique
    pub is_unique: bool,
    /// Whether this is the primary key index
    pub is_primary: bool,
}

/// Kind of table constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// PRIMARY KEY
    PrimaryKey,
    /// UNIQUE
    Unique,
    /// FOREIGN KEY
    ForeignKey,
    /// CHECK
    Check,
}

impl ConstraintKind {
    /// Parse from `information_schema` style names or PostgreSQL `contype` letters
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PRIMARY KEY" | "P" => Some(Self::PrimaryKey),
            "UNIQUE" | "U" => Some(Self::Unique),
            "FOREIGN KEY" | "F" => Some(Self::ForeignKey),
            "CHECK" | "C" => Some(Self::Check),
            _ => None,
        }
    }
}

/// One column's participation in a table constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    /// Constraint name
    pub name: String,
    /// Constraint kind
    pub kind: ConstraintKind,
    /// Constrained column
    pub column: String,
    /// Referenced table (foreign keys only)
    pub ref_table: Option<String>,
    /// Referenced column (foreign keys only)
    pub ref_column: Option<String>,
    /// ON UPDATE action (foreign keys only)
    pub on_update: Option<String>,
    /// ON DELETE action (foreign keys only)
    pub on_delete: Option<String>,
}

/// Foreign key from one column to another table's column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    /// Constraint name
    pub name: String,
    /// Referencing column
    pub source_column: String,
    /// Referenced table
    pub target_table: String,
    /// Referenced column
    pub target_column: String,
    /// ON UPDATE action
    pub on_update: Option<String>,
    /// ON DELETE action
    pub on_delete: Option<String>,
}

impl ForeignKeyDescriptor {
    /// Create a foreign key with default actions
    pub fn new(
        source_column: impl Into<String>,
        target_table: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        let source_column = source_column.into();
        let target_table = target_table.into();
        Self {
            name: format!("fk_{}_{}", source_column, target_table),
            source_column,
            target_table,
            target_column: target_column.into(),
            on_update: None,
            on_delete: None,
        }
    }
}

/// Row count and on-disk size of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// Estimated number of rows
    pub row_count: u64,
    /// Storage size in bytes
    pub size_bytes: u64,
}

impl StatisticsSnapshot {
    /// Build a snapshot; zero or missing values mean statistics are unavailable
    pub fn from_parts(row_count: Option<i64>, size_bytes: Option<i64>) -> Option<Self> {
        match (row_count, size_bytes) {
            (Some(rows), Some(size)) if rows > 0 && size > 0 => Some(Self {
                row_count: rows as u64,
                size_bytes: size as u64,
            }),
            _ => None,
        }
    }
}

/// Value range of a timestamp column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateInterval {
    /// Column name
    pub column: String,
    /// Earliest value (textual, as returned by the source)
    pub start: Option<String>,
    /// Latest value
    pub end: Option<String>,
}

/// Immutable snapshot of one introspected table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name
    pub name: String,
    /// Owning source id
    pub source_id: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnDescriptor>,
    /// Indexes
    pub indexes: Vec<IndexDescriptor>,
    /// Outgoing foreign keys
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    /// Size statistics, when the source reports them
    pub statistics: Option<StatisticsSnapshot>,
    /// Ranges of timestamp columns
    pub date_intervals: Vec<DateInterval>,
}

impl TableDescriptor {
    /// Create an empty descriptor
    pub fn new(name: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_id: source_id.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            statistics: None,
            date_intervals: Vec::new(),
        }
    }

    /// Builder-style column append
    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Builder-style foreign key append
    pub fn with_foreign_key(mut self, fk: ForeignKeyDescriptor) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Get column by name
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key columns in declaration order
    pub fn primary_key_columns(&self) -> Vec<&ColumnDescriptor> {
        if let Some(pk) = self.indexes.iter().find(|i| i.is_primary) {
            let cols: Vec<_> = pk.columns.iter().filter_map(|c| self.column(c)).collect();
            if !cols.is_empty() {
                return cols;
            }
        }
        self.columns.iter().filter(|c| c.is_primary).collect()
    }

    /// Column names in ordinal order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Timestamp columns
    pub fn timestamp_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns
            .iter()
            .filter(|c| c.column_type.is_timestamp())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_serde() {
        let t: ColumnType = serde_json::from_str("\"double precision\"").unwrap();
        assert_eq!(t, ColumnType::Canonical(CanonicalType::DoublePrecision));

        let t: ColumnType = serde_json::from_str("\"geometry\"").unwrap();
        assert_eq!(t, ColumnType::Native("geometry".into()));
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"geometry\"");
    }

    #[test]
    fn test_constraint_kind_parse() {
        assert_eq!(ConstraintKind::parse("p"), Some(ConstraintKind::PrimaryKey));
        assert_eq!(
            ConstraintKind::parse("FOREIGN KEY"),
            Some(ConstraintKind::ForeignKey)
        );
        assert_eq!(ConstraintKind::parse("x"), None);
    }

    #[test]
    fn test_statistics_unavailable() {
        assert!(StatisticsSnapshot::from_parts(Some(0), Some(8192)).is_none());
        assert!(StatisticsSnapshot::from_parts(None, Some(8192)).is_none());
        let s = StatisticsSnapshot::from_parts(Some(10), Some(8192)).unwrap();
        assert_eq!(s.row_count, 10);
    }

    #[test]
    fn test_primary_key_columns_follow_index_order() {
        let mut table = TableDescriptor::new("order_lines", "src")
            .with_column(ColumnDescriptor::new("line", CanonicalType::Integer).primary())
            .with_column(ColumnDescriptor::new("order_id", CanonicalType::Integer).primary())
            .with_column(ColumnDescriptor::new("qty", CanonicalType::Integer));
        table.indexes.push(IndexDescriptor {
            name: "order_lines_pkey".into(),
            columns: vec!["order_id".into(), "line".into()],
            is_unique: true,
            is_primary: true,
        });

        let pk: Vec<_> = table
            .primary_key_columns()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(pk, vec!["order_id", "line"]);
    }
}
