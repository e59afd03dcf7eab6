//! Metric Definition
//!
//! A metric is one aggregate over one column of one catalog table, plus the
//! vocabulary a streamer uses to ask for it.

use crate::semantic::join_graph::ColumnRef;
use serde::{Deserialize, Serialize};

/// Aggregation function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    CountDistinct,
    Min,
    Max,
    /// Number of rows where a boolean column is true.
    CountTrue,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
            Aggregation::CountDistinct => "count_distinct",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::CountTrue => "count_true",
        }
    }

    /// Render the aggregate over a qualified column reference.
    pub fn render(&self, column: &str) -> String {
        match self {
            Aggregation::Sum => format!("SUM({})", column),
            Aggregation::Avg => format!("CAST(AVG({}) AS DOUBLE PRECISION)", column),
            Aggregation::Count => format!("COUNT({})", column),
            Aggregation::CountDistinct => format!("COUNT(DISTINCT {})", column),
            Aggregation::Min => format!("MIN({})", column),
            Aggregation::Max => format!("MAX({})", column),
            Aggregation::CountTrue => format!("SUM(CASE WHEN {} THEN 1 ELSE 0 END)", column),
        }
    }

    /// Whether the aggregate always yields an integer count.
    pub fn is_count(&self) -> bool {
        matches!(
            self,
            Aggregation::Count | Aggregation::CountDistinct | Aggregation::CountTrue
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDef {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub table: String,
    pub column: String,
    pub aggregation: Aggregation,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl MetricDef {
    pub fn new(
        name: &str,
        label: &str,
        table: &str,
        column: &str,
        aggregation: Aggregation,
        synonyms: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            description: String::new(),
            table: table.to_string(),
            column: column.to_string(),
            aggregation,
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn column_ref(&self) -> ColumnRef {
        ColumnRef::new(&self.table, &self.column)
    }

    pub fn sql_expression(&self) -> String {
        self.aggregation.render(&self.column_ref().qualified())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_aggregations() {
        let metric = MetricDef::new(
            "peak_viewers",
            "Peak viewers",
            "streams",
            "peak_viewers",
            Aggregation::Max,
            &["peak viewers"],
        );
        assert_eq!(metric.sql_expression(), "MAX(streams.peak_viewers)");
        assert_eq!(
            Aggregation::Avg.render("chat_messages.toxicity"),
            "CAST(AVG(chat_messages.toxicity) AS DOUBLE PRECISION)"
        );
        assert_eq!(
            Aggregation::CountTrue.render("stream_viewers.first_time_chatter"),
            "SUM(CASE WHEN stream_viewers.first_time_chatter THEN 1 ELSE 0 END)"
        );
    }
}
