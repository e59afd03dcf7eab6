//! Schema Catalog
//!
//! Static description of what a streamer may ask about: queryable tables, their
//! columns and semantic types, foreign keys, metrics and dimensions. Built once
//! at startup and then shared read-only; reloads go through [`CatalogHandle`].

use crate::error::{NlqError, Result};
use crate::semantic::dimension::DimensionDef;
use crate::semantic::join_graph::{compute_reachability, ColumnRef, ForeignKey, JoinPath};
use crate::semantic::metric::MetricDef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

/// Tables that exist in the store but are never query targets: identities would
/// leak across tenants and OAuth tokens are not analytics.
pub const EXCLUDED_TABLES: [&str; 2] = ["users", "twitch_connections"];

/// A tenant is one user; every analytics query is scoped to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub i64);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Integer,
    Float,
    Text,
    Timestamp,
    Boolean,
    /// Enumerated label (game category, country, device).
    Category,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Integer => "integer",
            SemanticType::Float => "float",
            SemanticType::Text => "string",
            SemanticType::Timestamp => "timestamp",
            SemanticType::Boolean => "boolean",
            SemanticType::Category => "category",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, SemanticType::Integer | SemanticType::Float)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub semantic_type: SemanticType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl ColumnDef {
    pub fn new(name: &str, semantic_type: SemanticType, synonyms: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            semantic_type,
            nullable: true,
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    /// Plural label used in summaries ("streams", "chat messages").
    pub label: String,
    /// Words that name the entity in a prompt.
    #[serde(default)]
    pub nouns: Vec<String>,
    pub columns: Vec<ColumnDef>,
    /// Columns returned when the table itself is listed.
    #[serde(default)]
    pub list_columns: Vec<String>,
    /// Column that places a row in time; may live on a many-to-one parent.
    #[serde(default)]
    pub time_column: Option<ColumnRef>,
    /// Column holding the owning user id, when the table owns one directly.
    #[serde(default)]
    pub tenant_column: Option<String>,
    /// Metric answering "how many <nouns>".
    #[serde(default)]
    pub count_metric: Option<String>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Serializable catalog definition, as shipped built-in or loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSpec {
    pub tables: Vec<TableDef>,
    pub foreign_keys: Vec<ForeignKey>,
    pub metrics: Vec<MetricDef>,
    pub dimensions: Vec<DimensionDef>,
}

/// Validated catalog with precomputed reachability.
#[derive(Debug, Clone)]
pub struct Catalog {
    spec: CatalogSpec,
    tables: BTreeMap<String, TableDef>,
    metrics: BTreeMap<String, MetricDef>,
    dimensions: BTreeMap<String, DimensionDef>,
    paths: BTreeMap<(String, String), JoinPath>,
    tenant_paths: BTreeMap<String, JoinPath>,
}

impl Catalog {
    pub fn build(spec: CatalogSpec) -> Result<Self> {
        let unavailable = |msg: String| NlqError::CatalogUnavailable(msg);

        let mut tables = BTreeMap::new();
        for table in &spec.tables {
            if EXCLUDED_TABLES.contains(&table.name.as_str()) {
                return Err(unavailable(format!(
                    "table '{}' may not be exposed to queries",
                    table.name
                )));
            }
            if tables.insert(table.name.clone(), table.clone()).is_some() {
                return Err(unavailable(format!("table '{}' declared twice", table.name)));
            }
        }

        let column_exists = |col: &ColumnRef| {
            tables
                .get(&col.table)
                .map(|t: &TableDef| t.column(&col.column).is_some())
                .unwrap_or(false)
        };

        for table in tables.values() {
            for name in &table.list_columns {
                if table.column(name).is_none() {
                    return Err(unavailable(format!(
                        "list column '{}.{}' does not exist",
                        table.name, name
                    )));
                }
            }
            if let Some(tenant_col) = &table.tenant_column {
                if table.column(tenant_col).is_none() {
                    return Err(unavailable(format!(
                        "tenant column '{}.{}' does not exist",
                        table.name, tenant_col
                    )));
                }
            }
            if let Some(time_col) = &table.time_column {
                if !column_exists(time_col) {
                    return Err(unavailable(format!(
                        "time column '{}' of table '{}' does not exist",
                        time_col, table.name
                    )));
                }
            }
        }

        for fk in &spec.foreign_keys {
            let from = ColumnRef::new(&fk.from_table, &fk.from_column);
            let to = ColumnRef::new(&fk.to_table, &fk.to_column);
            if !column_exists(&from) || !column_exists(&to) {
                return Err(unavailable(format!(
                    "foreign key {} -> {} references an unknown column",
                    from, to
                )));
            }
        }

        let mut metrics = BTreeMap::new();
        for metric in &spec.metrics {
            if !column_exists(&metric.column_ref()) {
                return Err(unavailable(format!(
                    "metric '{}' references unknown column {}",
                    metric.name,
                    metric.column_ref()
                )));
            }
            metrics.insert(metric.name.clone(), metric.clone());
        }

        let mut dimensions = BTreeMap::new();
        for dimension in &spec.dimensions {
            if dimension.columns.is_empty() {
                return Err(unavailable(format!("dimension '{}' has no columns", dimension.name)));
            }
            for column in &dimension.columns {
                if !column_exists(&ColumnRef::new(&dimension.table, column)) {
                    return Err(unavailable(format!(
                        "dimension '{}' references unknown column {}.{}",
                        dimension.name, dimension.table, column
                    )));
                }
            }
            dimensions.insert(dimension.name.clone(), dimension.clone());
        }

        for table in tables.values() {
            if let Some(count_metric) = &table.count_metric {
                if !metrics.contains_key(count_metric) {
                    return Err(unavailable(format!(
                        "table '{}' names unknown count metric '{}'",
                        table.name, count_metric
                    )));
                }
            }
        }

        let names: BTreeSet<String> = tables.keys().cloned().collect();
        let paths = compute_reachability(&names, &spec.foreign_keys);

        let mut tenant_paths = BTreeMap::new();
        for name in &names {
            // Shortest many-to-one path to a table owning the tenant column.
            let best = paths
                .iter()
                .filter(|((from, to), _)| from == name && tables[to].tenant_column.is_some())
                .min_by_key(|((_, to), path)| (path.len(), to.clone()))
                .map(|(_, path)| path.clone());
            if let Some(path) = best {
                tenant_paths.insert(name.clone(), path);
            }
        }

        // Metric tables must be scoped, otherwise no query could ever run.
        for metric in metrics.values() {
            if !tenant_paths.contains_key(&metric.table) {
                return Err(unavailable(format!(
                    "metric '{}' is on table '{}' which cannot be scoped to a tenant",
                    metric.name, metric.table
                )));
            }
        }

        Ok(Self {
            spec,
            tables,
            metrics,
            dimensions,
            paths,
            tenant_paths,
        })
    }

    pub fn spec(&self) -> &CatalogSpec {
        &self.spec
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn column(&self, column: &ColumnRef) -> Option<&ColumnDef> {
        self.table(&column.table).and_then(|t| t.column(&column.column))
    }

    pub fn is_queryable(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricDef> {
        self.metrics.get(name)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &MetricDef> {
        self.metrics.values()
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionDef> {
        self.dimensions.get(name)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &DimensionDef> {
        self.dimensions.values()
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.spec.foreign_keys
    }

    /// Many-to-one join path from `from` to `to`; empty when they are equal.
    pub fn path(&self, from: &str, to: &str) -> Option<&JoinPath> {
        self.paths.get(&(from.to_string(), to.to_string()))
    }

    /// Path from `table` to the table holding its tenant column. `None` means the
    /// table can only be joined as a dimension of a scoped table.
    pub fn tenant_path(&self, table: &str) -> Option<&JoinPath> {
        self.tenant_paths.get(table)
    }

    /// The table whose tenant column scopes queries based on `table`.
    pub fn tenant_anchor(&self, table: &str) -> Option<ColumnRef> {
        let path = self.tenant_path(table)?;
        let anchor = path.target().unwrap_or(table);
        let column = self.tables.get(anchor)?.tenant_column.as_ref()?;
        Some(ColumnRef::new(anchor, column))
    }

    pub fn tenant_column(&self, table: &str) -> Option<&str> {
        self.tables.get(table).and_then(|t| t.tenant_column.as_deref())
    }

    /// Whether `a.a_col = b.b_col` is a declared foreign key.
    pub fn is_foreign_key(&self, a: &str, a_col: &str, b: &str, b_col: &str) -> bool {
        self.spec
            .foreign_keys
            .iter()
            .any(|fk| fk.matches(a, a_col, b, b_col))
    }

    /// Entity granularity: longer tenant paths mean finer-grained rows.
    pub fn granularity(&self, table: &str) -> usize {
        self.tenant_path(table).map(|p| p.len()).unwrap_or(0)
    }

    pub fn scoped(self: &Arc<Self>, tenant: TenantId) -> ScopedCatalog {
        ScopedCatalog {
            catalog: Arc::clone(self),
            tenant,
        }
    }
}

/// The catalog as seen by one tenant.
#[derive(Debug, Clone)]
pub struct ScopedCatalog {
    pub catalog: Arc<Catalog>,
    pub tenant: TenantId,
}

impl std::ops::Deref for ScopedCatalog {
    type Target = Catalog;

    fn deref(&self) -> &Catalog {
        &self.catalog
    }
}

/// Process-wide catalog holder.
///
/// Readers take an `Arc` snapshot; a reload swaps the whole `Arc`, so no reader
/// ever sees a half-updated catalog.
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn current(&self) -> Arc<Catalog> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the catalog; returns the previous one.
    pub fn swap(&self, catalog: Catalog) -> Arc<Catalog> {
        let next = Arc::new(catalog);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }
}
