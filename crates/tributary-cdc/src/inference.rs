//! # Join Inference
//!
//! Proposes how two introspected tables join when the source does not say so.
//!
//! ## Proposal Priority
//!
//! For a pair of tables (A, B), the first rule that matches wins:
//!
//! 1. **Foreign key**: a declared foreign key from A to B or from B to A
//! 2. **Naming convention**: a column in A named `{B}_{col}` with the same type
//!    as column `col` of B (and symmetrically). A plural table name also
//!    matches without its trailing `s`, so `customer_id` refers to `customers.id`.
//! 3. **Shared column**: a column with the same name and type in both tables
//!
//! Surrogate keys never take part in rule 3: a primary-key column, or a
//! column literally named `id`, only joins through rules 1 and 2. Two
//! unrelated tables both carrying `id integer` is the norm, not a relation.
//!
//! At most one edge is proposed per pair. Its column pairs are deduplicated
//! on the sorted pair, so a foreign key reported from both sides, or a naming
//! match found in both directions, contributes a single condition.
//!
//! ## Type Checking
//!
//! User-supplied join conditions are split by [`check_join_types`] into valid
//! conditions and [`ErrorJoin`]s. Error joins are surfaced to the caller and
//! never applied.

use crate::join_tree::{ColumnPair, JoinOperator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tributary_rdbc::schema::{ColumnDescriptor, ColumnType, TableDescriptor};

/// Which rule produced an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOrigin {
    /// Declared foreign key
    ForeignKey,
    /// `{table}_{column}` naming convention
    NamingConvention,
    /// Same column name and type on both sides
    SharedColumn,
}

/// An inferred edge from `parent` to `child`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedEdge {
    /// Table already placed in the tree
    pub parent: String,
    /// Table to attach
    pub child: String,
    /// Rule that matched
    pub origin: EdgeOrigin,
    /// Conditions, parent column on the left
    pub pairs: Vec<ColumnPair>,
}

/// Propose at most one edge between `parent` and `child`.
///
/// Returns `None` when no rule matches, or when both descriptors name the
/// same table.
pub fn propose_edge(parent: &TableDescriptor, child: &TableDescriptor) -> Option<ProposedEdge> {
    if parent.name == child.name {
        return None;
    }

    let rules: [(EdgeOrigin, fn(&TableDescriptor, &TableDescriptor) -> Vec<ColumnPair>); 3] = [
        (EdgeOrigin::ForeignKey, foreign_key_pairs),
        (EdgeOrigin::NamingConvention, naming_convention_pairs),
        (EdgeOrigin::SharedColumn, shared_column_pairs),
    ];

    rules.into_iter().find_map(|(origin, rule)| {
        let pairs = rule(parent, child);
        (!pairs.is_empty()).then(|| ProposedEdge {
            parent: parent.name.clone(),
            child: child.name.clone(),
            origin,
            pairs,
        })
    })
}

fn foreign_key_pairs(parent: &TableDescriptor, child: &TableDescriptor) -> Vec<ColumnPair> {
    let mut pairs = PairSet::default();
    for fk in &parent.foreign_keys {
        if fk.target_table == child.name {
            pairs.push(&fk.source_column, &fk.target_column);
        }
    }
    for fk in &child.foreign_keys {
        if fk.target_table == parent.name {
            pairs.push(&fk.target_column, &fk.source_column);
        }
    }
    pairs.into_pairs()
}

fn naming_convention_pairs(parent: &TableDescriptor, child: &TableDescriptor) -> Vec<ColumnPair> {
    let mut pairs = PairSet::default();
    for p in &parent.columns {
        for c in &child.columns {
            if !same_type(p, c) {
                continue;
            }
            if refers_to(&p.name, &child.name, &c.name) || refers_to(&c.name, &parent.name, &p.name) {
                pairs.push(&p.name, &c.name);
            }
        }
    }
    pairs.into_pairs()
}

/// `column` is `{table}_{target}`, with `table` taken as is or without a plural `s`
fn refers_to(column: &str, table: &str, target: &str) -> bool {
    let Some(prefix) = column
        .strip_suffix(target)
        .and_then(|rest| rest.strip_suffix('_'))
    else {
        return false;
    };
    prefix == table || table.strip_suffix('s') == Some(prefix)
}

fn shared_column_pairs(parent: &TableDescriptor, child: &TableDescriptor) -> Vec<ColumnPair> {
    let mut pairs = PairSet::default();
    for p in parent.columns.iter().filter(|c| !is_surrogate(c)) {
        if let Some(c) = child.column(&p.name) {
            if !is_surrogate(c) && same_type(p, c) {
                pairs.push(&p.name, &c.name);
            }
        }
    }
    pairs.into_pairs()
}

fn is_surrogate(column: &ColumnDescriptor) -> bool {
    column.is_primary || column.name.eq_ignore_ascii_case("id")
}

fn same_type(a: &ColumnDescriptor, b: &ColumnDescriptor) -> bool {
    a.column_type == b.column_type
}

/// Equality conditions deduplicated on the sorted column pair
#[derive(Default)]
struct PairSet {
    seen: BTreeSet<(String, String)>,
    pairs: Vec<ColumnPair>,
}

impl PairSet {
    fn push(&mut self, left: &str, right: &str) {
        let key = if left <= right {
            (left.to_string(), right.to_string())
        } else {
            (right.to_string(), left.to_string())
        };
        if self.seen.insert(key) {
            self.pairs.push(ColumnPair::eq(left, right));
        }
    }

    fn into_pairs(self) -> Vec<ColumnPair> {
        self.pairs
    }
}

// ============================================================================
// Type checking of user-supplied joins
// ============================================================================

/// A join condition whose sides cannot be compared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorJoin {
    /// Parent table
    pub left_table: String,
    /// Parent column
    pub left_column: String,
    /// Parent column type, `None` if the column does not exist
    pub left_type: Option<ColumnType>,
    /// Comparison operator
    pub operator: JoinOperator,
    /// Child table
    pub right_table: String,
    /// Child column
    pub right_column: String,
    /// Child column type, `None` if the column does not exist
    pub right_type: Option<ColumnType>,
}

impl ErrorJoin {
    /// Human readable reason
    pub fn reason(&self) -> String {
        match (&self.left_type, &self.right_type) {
            (None, _) => format!("unknown column {}.{}", self.left_table, self.left_column),
            (_, None) => format!("unknown column {}.{}", self.right_table, self.right_column),
            (Some(l), Some(r)) => format!(
                "type mismatch: {}.{} is {}, {}.{} is {}",
                self.left_table, self.left_column, l, self.right_table, self.right_column, r
            ),
        }
    }
}

/// Result of [`check_join_types`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTypeCheck {
    /// Conditions safe to apply
    pub valid: Vec<ColumnPair>,
    /// Conditions rejected for unknown columns or mismatched types
    pub errors: Vec<ErrorJoin>,
}

impl JoinTypeCheck {
    /// True when every condition passed
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Split user-supplied conditions into valid ones and error joins.
///
/// Duplicate conditions are collapsed first, keeping the first occurrence.
pub fn check_join_types(
    parent: &TableDescriptor,
    child: &TableDescriptor,
    pairs: &[ColumnPair],
) -> JoinTypeCheck {
    let mut seen = BTreeSet::new();
    let mut check = JoinTypeCheck::default();

    for pair in pairs {
        if !seen.insert(pair.clone()) {
            continue;
        }
        let left_type = parent.column(&pair.left).map(|c| c.column_type.clone());
        let right_type = child.column(&pair.right).map(|c| c.column_type.clone());
        match (&left_type, &right_type) {
            (Some(l), Some(r)) if l == r => check.valid.push(pair.clone()),
            _ => check.errors.push(ErrorJoin {
                left_table: parent.name.clone(),
                left_column: pair.left.clone(),
                left_type,
                operator: pair.operator,
                right_table: child.name.clone(),
                right_column: pair.right.clone(),
                right_type,
            }),
        }
    }
    check
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_rdbc::schema::{CanonicalType, ForeignKeyDescriptor};

    fn col(name: &str, t: CanonicalType) -> ColumnDescriptor {
        ColumnDescriptor::new(name, t)
    }

    fn orders() -> TableDescriptor {
        TableDescriptor::new("orders", "1")
            .with_column(col("id", CanonicalType::Integer).primary())
            .with_column(col("customer_id", CanonicalType::Integer))
            .with_column(col("note", CanonicalType::Text))
    }

    fn customers() -> TableDescriptor {
        TableDescriptor::new("customers", "1")
            .with_column(col("id", CanonicalType::Integer).primary())
            .with_column(col("name", CanonicalType::Text))
            .with_column(col("note", CanonicalType::Text))
    }

    #[test]
    fn test_naming_convention_beats_shared_column() {
        let edge = propose_edge(&orders(), &customers()).unwrap();
        assert_eq!(edge.origin, EdgeOrigin::NamingConvention);
        assert_eq!(edge.pairs, vec![ColumnPair::eq("customer_id", "id")]);

        let reverse = propose_edge(&customers(), &orders()).unwrap();
        assert_eq!(reverse.pairs, vec![ColumnPair::eq("id", "customer_id")]);
    }

    #[test]
    fn test_foreign_key_first_and_deduplicated() {
        let fk = ForeignKeyDescriptor::new("customer_id", "customers", "id");
        let orders = orders().with_foreign_key(fk);
        let edge = propose_edge(&orders, &customers()).unwrap();
        assert_eq!(edge.origin, EdgeOrigin::ForeignKey);
        assert_eq!(edge.pairs.len(), 1);

        let mut customers = customers();
        customers
            .foreign_keys
            .push(ForeignKeyDescriptor::new("id", "orders", "customer_id"));
        let edge = propose_edge(&orders, &customers).unwrap();
        assert_eq!(edge.pairs, vec![ColumnPair::eq("customer_id", "id")]);
    }

    #[test]
    fn test_shared_column_skips_surrogates() {
        let a = TableDescriptor::new("a", "1")
            .with_column(col("id", CanonicalType::Integer).primary())
            .with_column(col("code", CanonicalType::Text));
        let b = TableDescriptor::new("b", "1")
            .with_column(col("id", CanonicalType::Integer))
            .with_column(col("code", CanonicalType::Text));
        let edge = propose_edge(&a, &b).unwrap();
        assert_eq!(edge.origin, EdgeOrigin::SharedColumn);
        assert_eq!(edge.pairs, vec![ColumnPair::eq("code", "code")]);

        let c = TableDescriptor::new("c", "1").with_column(col("id", CanonicalType::Integer));
        assert!(propose_edge(&a, &c).is_none());
    }

    #[test]
    fn test_refers_to() {
        assert!(refers_to("customer_id", "customers", "id"));
        assert!(refers_to("customers_id", "customers", "id"));
        assert!(refers_to("auth_group_id", "auth_group", "id"));
        assert!(!refers_to("group_id", "auth_group", "id"));
        assert!(!refers_to("customerid", "customers", "id"));
        assert!(!refers_to("id", "customers", "id"));
    }

    #[test]
    fn test_type_mismatch_blocks_proposal() {
        let a = TableDescriptor::new("a", "1").with_column(col("b_code", CanonicalType::Integer));
        let b = TableDescriptor::new("b", "1").with_column(col("code", CanonicalType::Text));
        assert!(propose_edge(&a, &b).is_none());
    }

    #[test]
    fn test_check_join_types_splits() {
        let pairs = vec![
            ColumnPair::eq("customer_id", "id"),
            ColumnPair::eq("customer_id", "id"),
            ColumnPair::new("note", JoinOperator::Neq, "name"),
            ColumnPair::eq("customer_id", "name"),
            ColumnPair::eq("missing", "id"),
        ];
        let check = check_join_types(&orders(), &customers(), &pairs);
        assert_eq!(check.valid.len(), 2);
        assert_eq!(check.errors.len(), 2);
        assert!(!check.is_clean());
        assert!(check.errors[0].reason().contains("type mismatch"));
        assert_eq!(check.errors[1].reason(), "unknown column orders.missing");
    }
}
