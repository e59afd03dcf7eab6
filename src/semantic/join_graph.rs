//! Join Graph Resolution
//!
//! Foreign keys are declared as data (always in the many-to-one direction) and
//! reachability between tables is computed once, when the catalog is built.
//!
//! Only many-to-one hops are ever followed, so a join path never fans out: each
//! row of the starting table matches at most one row of the target table.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A qualified column reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Many-to-one foreign key: each `from_table` row references one `to_table` row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl ForeignKey {
    pub fn new(from_table: &str, from_column: &str, to_table: &str, to_column: &str) -> Self {
        Self {
            from_table: from_table.to_string(),
            from_column: from_column.to_string(),
            to_table: to_table.to_string(),
            to_column: to_column.to_string(),
        }
    }

    /// `child.fk = parent.pk`
    pub fn join_condition(&self) -> String {
        format!(
            "{}.{} = {}.{}",
            self.from_table, self.from_column, self.to_table, self.to_column
        )
    }

    /// Whether `a.a_col = b.b_col` (in either orientation) is this key.
    pub fn matches(&self, a: &str, a_col: &str, b: &str, b_col: &str) -> bool {
        (self.from_table == a && self.from_column == a_col && self.to_table == b && self.to_column == b_col)
            || (self.from_table == b
                && self.from_column == b_col
                && self.to_table == a
                && self.to_column == a_col)
    }
}

/// Ordered list of foreign keys leading from one table to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPath {
    pub edges: Vec<ForeignKey>,
}

impl JoinPath {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Last table on the path, or `None` for the empty path.
    pub fn target(&self) -> Option<&str> {
        self.edges.last().map(|e| e.to_table.as_str())
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.edges.iter().map(|e| e.to_table.as_str())
    }
}

/// All many-to-one paths reachable from every table, keyed `(from, to)`.
///
/// BFS over edges sorted by `(from_table, from_column, ...)`, so the chosen path
/// is the shortest one and ties always break the same way.
pub fn compute_reachability(
    tables: &BTreeSet<String>,
    foreign_keys: &[ForeignKey],
) -> BTreeMap<(String, String), JoinPath> {
    let mut outgoing: BTreeMap<&str, Vec<&ForeignKey>> = BTreeMap::new();
    let mut sorted: Vec<&ForeignKey> = foreign_keys.iter().collect();
    sorted.sort();
    for fk in sorted {
        outgoing.entry(fk.from_table.as_str()).or_default().push(fk);
    }

    let mut paths = BTreeMap::new();

    for start in tables {
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<(&str, JoinPath)> = VecDeque::new();
        visited.insert(start.as_str());
        queue.push_back((start.as_str(), JoinPath::default()));

        while let Some((current, path)) = queue.pop_front() {
            paths.insert((start.clone(), current.to_string()), path.clone());

            for fk in outgoing.get(current).into_iter().flatten() {
                if visited.insert(fk.to_table.as_str()) {
                    let mut next = path.clone();
                    next.edges.push((*fk).clone());
                    queue.push_back((fk.to_table.as_str(), next));
                }
            }
        }
    }

    paths
}
