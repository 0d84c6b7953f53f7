//! # Join Tree
//!
//! The spanning structure describing how a user's table selection is joined
//! for extraction.
//!
//! ## Structure
//!
//! Nodes live in an arena addressed by index; parent and child links are
//! indexes into it. The root is always index 0. Each non-root node carries
//! the join kind and column conditions of its edge to the parent, with the
//! parent column on the left.
//!
//! Invariants held by every operation:
//!
//! - a table name occurs at most once in the tree
//! - every non-root node has exactly one parent edge
//! - the tree is acyclic
//!
//! Tables that could not be attached are kept in the remainder list.
//!
//! ## Building
//!
//! ```rust,ignore
//! let tree = JoinTree::build_best(&descriptors)?;
//! println!("levels: {:?}, remainder: {:?}", tree.level_counts(), tree.remainder());
//!
//! let sql = tree.join_sql(&PostgresDialect)?;
//! ```
//!
//! [`JoinTree::build`] grows a tree breadth-first from a chosen root using
//! [`propose_edge`]. [`JoinTree::build_best`] tries every table as root and
//! keeps the tree whose per-level node counts are lexicographically largest.
//!
//! ## Editing
//!
//! User edits patch the tree in place rather than rebuilding it; see
//! [`JoinTree::attach_remainder`], [`JoinTree::attach_anywhere`],
//! [`JoinTree::delete_subtree`], [`JoinTree::update_edge`] and
//! [`JoinTree::reparent`].

use crate::error::{CdcError, Result};
use crate::inference::propose_edge;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::debug;
use tributary_rdbc::dialect::SqlDialect;
use tributary_rdbc::schema::TableDescriptor;

/// SQL join kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    /// INNER JOIN
    Inner,
    /// LEFT JOIN
    Left,
    /// RIGHT JOIN
    Right,
}

impl JoinKind {
    /// SQL keyword
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
        }
    }

    /// Parse `inner`, `left` or `right`
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "inner" => Ok(Self::Inner),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(CdcError::validation(format!("unknown join kind: {}", other))),
        }
    }
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inner => "inner",
            Self::Left => "left",
            Self::Right => "right",
        };
        f.write_str(s)
    }
}

/// Comparison operator of a join condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinOperator {
    /// `=`
    Eq,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Lte,
    /// `>=`
    Gte,
    /// `<>`
    Neq,
}

impl JoinOperator {
    /// SQL symbol
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Lte => "<=",
            Self::Gte => ">=",
            Self::Neq => "<>",
        }
    }

    /// Parse the short name (`eq`, `lt`, ...)
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "eq" => Ok(Self::Eq),
            "lt" => Ok(Self::Lt),
            "gt" => Ok(Self::Gt),
            "lte" => Ok(Self::Lte),
            "gte" => Ok(Self::Gte),
            "neq" => Ok(Self::Neq),
            other => Err(CdcError::validation(format!("unknown join operator: {}", other))),
        }
    }
}

/// One join condition: parent column, operator, child column
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnPair {
    /// Column of the parent table
    pub left: String,
    /// Comparison operator
    pub operator: JoinOperator,
    /// Column of the child table
    pub right: String,
}

impl ColumnPair {
    /// Create a condition
    pub fn new(left: impl Into<String>, operator: JoinOperator, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            operator,
            right: right.into(),
        }
    }

    /// Equality condition
    pub fn eq(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::new(left, JoinOperator::Eq, right)
    }

    /// Parse a `[left, op, right]` triple as sent by clients
    pub fn from_triple(triple: &[String]) -> Result<Self> {
        match triple {
            [left, op, right] => Ok(Self::new(left.clone(), JoinOperator::parse(op)?, right.clone())),
            _ => Err(CdcError::validation(format!(
                "join condition needs 3 parts, got {}",
                triple.len()
            ))),
        }
    }
}

/// A flattened, directed join edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinEdge {
    /// Parent table
    pub left_table: String,
    /// Parent column
    pub left_column: String,
    /// Child table
    pub right_table: String,
    /// Child column
    pub right_column: String,
    /// Comparison operator
    pub operator: JoinOperator,
    /// Join kind of the child
    pub kind: JoinKind,
}

/// A table reference outside the tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Table name
    pub table: String,
    /// Owning source id
    pub source_id: String,
}

impl From<&TableDescriptor> for TableRef {
    fn from(t: &TableDescriptor) -> Self {
        Self {
            table: t.name.clone(),
            source_id: t.source_id.clone(),
        }
    }
}

/// Node index in the arena
pub type NodeId = usize;

/// One table in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinNode {
    /// Table name
    pub table: String,
    /// Owning source id
    pub source_id: String,
    /// Join kind to the parent; `None` for the root
    pub join_kind: Option<JoinKind>,
    /// Conditions to the parent, parent column on the left
    pub joins: Vec<ColumnPair>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl JoinNode {
    fn root(table: TableRef) -> Self {
        Self {
            table: table.table,
            source_id: table.source_id,
            join_kind: None,
            joins: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    /// Parent index
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child indexes in attachment order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Whether this is the root
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Serializable tree layout, the persisted handoff format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStructure {
    /// Table name
    pub table: String,
    /// Owning source id
    pub source_id: String,
    /// Join kind to the parent; `None` for the root
    pub join_kind: Option<JoinKind>,
    /// Conditions to the parent
    pub joins: Vec<JoinCondition>,
    /// Child subtrees
    pub children: Vec<TreeStructure>,
}

/// Persisted form of one condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCondition {
    /// Parent side
    pub left: ColumnRef,
    /// Child side
    pub right: ColumnRef,
    /// Comparison operator
    pub operator: JoinOperator,
}

/// Qualified column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Table name
    pub table: String,
    /// Column name
    pub column: String,
}

/// Join tree over a table selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinTree {
    nodes: Vec<JoinNode>,
    remainder: Vec<TableRef>,
}

impl JoinTree {
    /// Single-node tree
    pub fn single(root: impl Into<TableRef>) -> Self {
        Self {
            nodes: vec![JoinNode::root(root.into())],
            remainder: Vec::new(),
        }
    }

    /// Grow a tree breadth-first from `root` over `tables`.
    ///
    /// Candidates are tried in the order given; tables no edge reaches end up
    /// in the remainder, in the same order.
    pub fn build(root: &str, tables: &[TableDescriptor]) -> Result<Self> {
        let root_desc = descriptor(tables, root)?;
        let mut tree = Self::single(root_desc);
        let mut placed: HashSet<&str> = HashSet::from([root]);

        let mut queue = VecDeque::from([0usize]);
        while let Some(id) = queue.pop_front() {
            let parent_desc = descriptor(tables, &tree.nodes[id].table)?;
            for candidate in tables {
                if placed.contains(candidate.name.as_str()) {
                    continue;
                }
                if let Some(edge) = propose_edge(parent_desc, candidate) {
                    let child = tree.push_child(id, candidate.into(), JoinKind::Inner, edge.pairs);
                    placed.insert(candidate.name.as_str());
                    queue.push_back(child);
                }
            }
        }

        tree.remainder = tables
            .iter()
            .filter(|t| !placed.contains(t.name.as_str()))
            .map(TableRef::from)
            .collect();

        debug!(
            "Built join tree from {}: levels {:?}, {} in remainder",
            root,
            tree.level_counts(),
            tree.remainder.len()
        );
        Ok(tree)
    }

    /// Build from every candidate root and keep the bushiest.
    ///
    /// Level-count sequences are compared lexicographically; ties keep the
    /// earlier root.
    pub fn build_best(tables: &[TableDescriptor]) -> Result<Self> {
        let mut best: Option<(Vec<usize>, JoinTree)> = None;
        for candidate in tables {
            let tree = Self::build(&candidate.name, tables)?;
            let counts = tree.level_counts();
            let better = match &best {
                Some((best_counts, _)) => counts > *best_counts,
                None => true,
            };
            if better {
                best = Some((counts, tree));
            }
        }
        best.map(|(_, tree)| tree)
            .ok_or_else(|| CdcError::validation("cannot build a join tree from zero tables"))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Root node, `None` once the whole tree was deleted
    pub fn root(&self) -> Option<&JoinNode> {
        self.nodes.first()
    }

    /// Node by index
    pub fn node(&self, id: NodeId) -> Option<&JoinNode> {
        self.nodes.get(id)
    }

    /// Index of the node holding `table`
    pub fn find(&self, table: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.table == table)
    }

    /// Whether `table` is in the tree
    pub fn contains(&self, table: &str) -> bool {
        self.find(table).is_some()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the tree has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Tables not attached to the tree
    pub fn remainder(&self) -> &[TableRef] {
        &self.remainder
    }

    /// Replace the remainder list
    pub fn with_remainder(mut self, remainder: Vec<TableRef>) -> Self {
        self.remainder = remainder;
        self
    }

    /// Nodes in breadth-first order
    pub fn ordered_nodes(&self) -> Vec<&JoinNode> {
        self.bfs_from(0).into_iter().map(|id| &self.nodes[id]).collect()
    }

    /// Table names in breadth-first order
    pub fn ordered_tables(&self) -> Vec<&str> {
        self.ordered_nodes().into_iter().map(|n| n.table.as_str()).collect()
    }

    /// Node count per depth, root level first
    pub fn level_counts(&self) -> Vec<usize> {
        let mut counts = Vec::new();
        if self.nodes.is_empty() {
            return counts;
        }
        let mut level = vec![0usize];
        while !level.is_empty() {
            counts.push(level.len());
            level = level
                .iter()
                .flat_map(|&id| self.nodes[id].children.iter().copied())
                .collect();
        }
        counts
    }

    /// Flattened edges in breadth-first order
    pub fn edges(&self) -> Vec<JoinEdge> {
        let mut edges = Vec::new();
        for id in self.bfs_from(0) {
            let node = &self.nodes[id];
            let (Some(parent), Some(kind)) = (node.parent, node.join_kind) else {
                continue;
            };
            let parent = &self.nodes[parent];
            for pair in &node.joins {
                edges.push(JoinEdge {
                    left_table: parent.table.clone(),
                    left_column: pair.left.clone(),
                    right_table: node.table.clone(),
                    right_column: pair.right.clone(),
                    operator: pair.operator,
                    kind,
                });
            }
        }
        edges
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Attach a remainder table under `parent` with explicit conditions
    pub fn attach_remainder(
        &mut self,
        parent: &str,
        child: &str,
        kind: JoinKind,
        pairs: Vec<ColumnPair>,
    ) -> Result<NodeId> {
        if pairs.is_empty() {
            return Err(CdcError::validation(format!(
                "no join conditions given for {}",
                child
            )));
        }
        let parent_id = self.require(parent)?;
        let pos = self.remainder_position(child)?;
        let table = self.remainder.remove(pos);
        Ok(self.push_child(parent_id, table, kind, pairs))
    }

    /// Attach a remainder table under `parent` using an inferred edge.
    ///
    /// Returns `false` and leaves the table in the remainder when no edge is
    /// found.
    pub fn bind_remainder(
        &mut self,
        parent: &str,
        child: &str,
        tables: &[TableDescriptor],
    ) -> Result<bool> {
        let parent_id = self.require(parent)?;
        let pos = self.remainder_position(child)?;
        let edge = propose_edge(descriptor(tables, parent)?, descriptor(tables, child)?);
        match edge {
            Some(edge) => {
                let table = self.remainder.remove(pos);
                self.push_child(parent_id, table, JoinKind::Inner, edge.pairs);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Attach `table` under the first placed node, in breadth-first order,
    /// that an inferred edge connects it to.
    ///
    /// An empty tree takes the table as its root. Returns `false` when the
    /// table stays in the remainder.
    pub fn attach_anywhere(&mut self, table: &TableDescriptor, tables: &[TableDescriptor]) -> Result<bool> {
        if self.contains(&table.name) {
            return Err(CdcError::tree(format!("{} is already in the tree", table.name)));
        }
        self.remainder.retain(|r| r.table != table.name);

        if self.nodes.is_empty() {
            self.nodes.push(JoinNode::root(table.into()));
            return Ok(true);
        }

        for id in self.bfs_from(0) {
            let parent_desc = descriptor(tables, &self.nodes[id].table)?;
            if let Some(edge) = propose_edge(parent_desc, table) {
                self.push_child(id, table.into(), JoinKind::Inner, edge.pairs);
                return Ok(true);
            }
        }

        self.remainder.push(table.into());
        Ok(false)
    }

    /// Remove `table` and its descendants, moving them to the remainder.
    ///
    /// Deleting the root empties the tree. Returns the moved tables in
    /// breadth-first order.
    pub fn delete_subtree(&mut self, table: &str) -> Result<Vec<TableRef>> {
        let id = self.require(table)?;
        let doomed = self.bfs_from(id);
        let removed: Vec<TableRef> = doomed
            .iter()
            .map(|&i| TableRef {
                table: self.nodes[i].table.clone(),
                source_id: self.nodes[i].source_id.clone(),
            })
            .collect();

        if let Some(parent) = self.nodes[id].parent {
            self.nodes[parent].children.retain(|&c| c != id);
        }
        self.compact(&doomed.into_iter().collect());
        self.remainder.extend(removed.iter().cloned());

        debug!("Deleted subtree {} ({} tables)", table, removed.len());
        Ok(removed)
    }

    /// Replace the edge between `parent` and its child `child`.
    ///
    /// A `child` still in the remainder is attached instead, so a user can
    /// confirm joins for a table inference could not place.
    pub fn update_edge(
        &mut self,
        parent: &str,
        child: &str,
        kind: JoinKind,
        pairs: Vec<ColumnPair>,
    ) -> Result<()> {
        if self.remainder.iter().any(|r| r.table == child) {
            return self.attach_remainder(parent, child, kind, pairs).map(|_| ());
        }
        if pairs.is_empty() {
            return Err(CdcError::validation(format!(
                "no join conditions given for {}",
                child
            )));
        }
        let parent_id = self.require(parent)?;
        let child_id = self.require(child)?;
        if self.nodes[child_id].parent != Some(parent_id) {
            return Err(CdcError::tree(format!("{} is not a child of {}", child, parent)));
        }
        let node = &mut self.nodes[child_id];
        node.join_kind = Some(kind);
        node.joins = pairs;
        Ok(())
    }

    /// Move `table` and its subtree under `new_parent` using an inferred edge.
    ///
    /// Refuses to move the root or to move a node under its own descendant.
    /// Returns `false`, leaving the tree unchanged, when no edge is found.
    pub fn reparent(&mut self, new_parent: &str, table: &str, tables: &[TableDescriptor]) -> Result<bool> {
        let parent_id = self.require(new_parent)?;
        let child_id = self.require(table)?;
        let Some(old_parent) = self.nodes[child_id].parent else {
            return Err(CdcError::tree(format!("cannot reparent root {}", table)));
        };
        if self.bfs_from(child_id).contains(&parent_id) {
            return Err(CdcError::tree(format!(
                "moving {} under {} would create a cycle",
                table, new_parent
            )));
        }

        let Some(edge) = propose_edge(descriptor(tables, new_parent)?, descriptor(tables, table)?) else {
            return Ok(false);
        };

        self.nodes[old_parent].children.retain(|&c| c != child_id);
        self.nodes[parent_id].children.push(child_id);
        let node = &mut self.nodes[child_id];
        node.parent = Some(parent_id);
        node.join_kind = Some(JoinKind::Inner);
        node.joins = edge.pairs;
        Ok(true)
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Nested layout for persistence; `None` for an empty tree
    pub fn structure(&self) -> Option<TreeStructure> {
        // children before parents, so deep chains need no recursion
        let mut built: Vec<Option<TreeStructure>> = (0..self.nodes.len()).map(|_| None).collect();
        for id in self.bfs_from(0).into_iter().rev() {
            let children = self.nodes[id]
                .children
                .iter()
                .filter_map(|&c| built[c].take())
                .collect();
            built[id] = Some(self.node_structure(id, children));
        }
        built.into_iter().next().flatten()
    }

    fn node_structure(&self, id: NodeId, children: Vec<TreeStructure>) -> TreeStructure {
        let node = &self.nodes[id];
        let parent_table = node.parent.map(|p| self.nodes[p].table.as_str()).unwrap_or("");
        TreeStructure {
            table: node.table.clone(),
            source_id: node.source_id.clone(),
            join_kind: node.join_kind,
            joins: node
                .joins
                .iter()
                .map(|p| JoinCondition {
                    left: ColumnRef {
                        table: parent_table.to_string(),
                        column: p.left.clone(),
                    },
                    right: ColumnRef {
                        table: node.table.clone(),
                        column: p.right.clone(),
                    },
                    operator: p.operator,
                })
                .collect(),
            children,
        }
    }

    /// Rebuild a tree from its persisted layout, checking the invariants
    pub fn from_structure(structure: &TreeStructure) -> Result<Self> {
        let mut tree = Self::single(TableRef {
            table: structure.table.clone(),
            source_id: structure.source_id.clone(),
        });
        let mut seen: HashSet<&str> = HashSet::from([structure.table.as_str()]);
        let mut stack: Vec<(NodeId, &TreeStructure)> = vec![(0, structure)];

        while let Some((parent_id, parent)) = stack.pop() {
            for child in &parent.children {
                if !seen.insert(child.table.as_str()) {
                    return Err(CdcError::tree(format!("{} appears twice", child.table)));
                }
                let kind = child.join_kind.ok_or_else(|| {
                    CdcError::tree(format!("{} has no join kind", child.table))
                })?;
                let mut pairs = Vec::with_capacity(child.joins.len());
                for cond in &child.joins {
                    if cond.left.table != parent.table || cond.right.table != child.table {
                        return Err(CdcError::tree(format!(
                            "condition {}.{} / {}.{} does not join {} to {}",
                            cond.left.table,
                            cond.left.column,
                            cond.right.table,
                            cond.right.column,
                            parent.table,
                            child.table
                        )));
                    }
                    pairs.push(ColumnPair::new(
                        cond.left.column.clone(),
                        cond.operator,
                        cond.right.column.clone(),
                    ));
                }
                let id = tree.push_child(
                    parent_id,
                    TableRef {
                        table: child.table.clone(),
                        source_id: child.source_id.clone(),
                    },
                    kind,
                    pairs,
                );
                stack.push((id, child));
            }
        }
        Ok(tree)
    }

    /// `FROM`-clause body joining every node, children after their parent
    pub fn join_sql(&self, dialect: &dyn SqlDialect) -> Result<String> {
        let root = self
            .root()
            .ok_or_else(|| CdcError::tree("cannot emit SQL for an empty tree"))?;
        let mut sql = dialect.quote_identifier(&root.table);

        for id in self.bfs_from(0).into_iter().skip(1) {
            let node = &self.nodes[id];
            let (Some(parent), Some(kind)) = (node.parent, node.join_kind) else {
                continue;
            };
            if node.joins.is_empty() {
                return Err(CdcError::tree(format!("{} has no join conditions", node.table)));
            }
            let parent = &self.nodes[parent].table;
            let conditions: Vec<String> = node
                .joins
                .iter()
                .map(|p| {
                    format!(
                        "{} {} {}",
                        dialect.qualified_column(parent, &p.left),
                        p.operator.symbol(),
                        dialect.qualified_column(&node.table, &p.right)
                    )
                })
                .collect();
            sql.push_str(&format!(
                " {} {} ON ({})",
                kind.as_sql(),
                dialect.quote_identifier(&node.table),
                conditions.join(" AND ")
            ));
        }
        Ok(sql)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn push_child(&mut self, parent: NodeId, table: TableRef, kind: JoinKind, joins: Vec<ColumnPair>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(JoinNode {
            table: table.table,
            source_id: table.source_id,
            join_kind: Some(kind),
            joins,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn bfs_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        if start >= self.nodes.len() {
            return order;
        }
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.nodes[id].children.iter().copied());
        }
        order
    }

    fn require(&self, table: &str) -> Result<NodeId> {
        self.find(table)
            .ok_or_else(|| CdcError::tree(format!("{} is not in the tree", table)))
    }

    fn remainder_position(&self, table: &str) -> Result<usize> {
        if self.contains(table) {
            return Err(CdcError::tree(format!("{} is already in the tree", table)));
        }
        self.remainder
            .iter()
            .position(|r| r.table == table)
            .ok_or_else(|| CdcError::tree(format!("{} is not in the remainder", table)))
    }

    /// Drop the given nodes and renumber the survivors in arena order
    fn compact(&mut self, doomed: &HashSet<NodeId>) {
        let mut remap = vec![None; self.nodes.len()];
        let mut next = 0;
        for (old, slot) in remap.iter_mut().enumerate() {
            if !doomed.contains(&old) {
                *slot = Some(next);
                next += 1;
            }
        }

        let nodes = std::mem::take(&mut self.nodes);
        self.nodes = nodes
            .into_iter()
            .enumerate()
            .filter(|(old, _)| !doomed.contains(old))
            .map(|(_, mut node)| {
                node.parent = node.parent.and_then(|p| remap[p]);
                node.children = node.children.iter().filter_map(|&c| remap[c]).collect();
                node
            })
            .collect();
    }
}

fn descriptor<'a>(tables: &'a [TableDescriptor], name: &str) -> Result<&'a TableDescriptor> {
    tables
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| CdcError::validation(format!("no descriptor for table {}", name)))
}
