//! Query Plan
//!
//! Structured intermediate form between a prompt and SQL. Every name in a plan
//! is a catalog name; the synthesizer never sees prompt text.

use crate::semantic::{Aggregation, Catalog, ColumnRef};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::time::TimeRange;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRef {
    pub name: String,
    pub aggregation: Aggregation,
}

/// What the query returns: aggregates, or the rows of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    Metrics { metrics: Vec<MetricRef> },
    Rows { table: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Case-insensitive equality
    Equals,
    /// Case-insensitive substring
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Equals => "=",
            FilterOp::Contains => "contains",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Int(v) => write!(f, "{}", v),
            FilterValue::Float(v) => write!(f, "{}", v),
            FilterValue::Text(v) => write!(f, "\"{}\"", v),
        }
    }
}

// Float values come from parsed prompt numbers and are never NaN.
impl Eq for FilterValue {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub column: ColumnRef,
    pub op: FilterOp,
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
}

impl TimeGrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKey {
    Metric(String),
    Column(ColumnRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering {
    pub key: OrderKey,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub subject: Subject,
    /// Dimension names, in prompt order
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub time_grain: Option<TimeGrain>,
    #[serde(default)]
    pub order: Option<Ordering>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl QueryPlan {
    pub fn metrics(metrics: Vec<MetricRef>) -> Self {
        Self::with_subject(Subject::Metrics { metrics })
    }

    pub fn rows(table: &str) -> Self {
        Self::with_subject(Subject::Rows {
            table: table.to_string(),
        })
    }

    fn with_subject(subject: Subject) -> Self {
        Self {
            subject,
            dimensions: Vec::new(),
            filters: Vec::new(),
            time_range: None,
            time_grain: None,
            order: None,
            limit: None,
        }
    }

    pub fn metric_refs(&self) -> &[MetricRef] {
        match &self.subject {
            Subject::Metrics { metrics } => metrics,
            Subject::Rows { .. } => &[],
        }
    }

    pub fn is_listing(&self) -> bool {
        matches!(self.subject, Subject::Rows { .. })
    }

    /// Table every row of the result is drawn from, if the plan has exactly one.
    pub fn base_table(&self, catalog: &Catalog) -> Option<String> {
        match &self.subject {
            Subject::Rows { table } => Some(table.clone()),
            Subject::Metrics { metrics } => {
                let mut tables = metrics
                    .iter()
                    .map(|m| catalog.metric(&m.name).map(|def| def.table.as_str()));
                let first = tables.next()??;
                for table in tables {
                    if table? != first {
                        return None;
                    }
                }
                Some(first.to_string())
            }
        }
    }

    /// One-line reading of the plan, used to present candidate interpretations.
    pub fn describe(&self, catalog: &Catalog) -> String {
        let mut text = match &self.subject {
            Subject::Metrics { metrics } => metrics
                .iter()
                .map(|m| {
                    catalog
                        .metric(&m.name)
                        .map(|def| def.label.clone())
                        .unwrap_or_else(|| m.name.clone())
                })
                .collect::<Vec<_>>()
                .join(" and "),
            Subject::Rows { table } => {
                let label = catalog
                    .table(table)
                    .map(|t| t.label.clone())
                    .unwrap_or_else(|| table.clone());
                format!("List of {}", label)
            }
        };

        if let Some(grain) = self.time_grain {
            text.push_str(&format!(" per {}", grain.as_str()));
        }
        if !self.dimensions.is_empty() {
            let labels: Vec<String> = self
                .dimensions
                .iter()
                .map(|d| {
                    catalog
                        .dimension(d)
                        .map(|def| def.label.to_lowercase())
                        .unwrap_or_else(|| d.clone())
                })
                .collect();
            text.push_str(&format!(" by {}", labels.join(", ")));
        }
        for filter in &self.filters {
            text.push_str(&format!(
                " where {} {} {}",
                filter.column.column,
                filter.op.as_str(),
                filter.value
            ));
        }
        if let Some(range) = &self.time_range {
            text.push(' ');
            text.push_str(&range.label);
        }
        if let Some(order) = &self.order {
            let key = match &order.key {
                OrderKey::Metric(name) => catalog
                    .metric(name)
                    .map(|m| m.label.to_lowercase())
                    .unwrap_or_else(|| name.clone()),
                OrderKey::Column(col) => col.column.replace('_', " "),
            };
            let which = match order.direction {
                SortDirection::Desc => "top",
                SortDirection::Asc => "bottom",
            };
            match self.limit {
                Some(n) => text.push_str(&format!(", {} {} by {}", which, n, key)),
                None => text.push_str(&format!(", sorted by {}", key)),
            }
        }
        text
    }
}
