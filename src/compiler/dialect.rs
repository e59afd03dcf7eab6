//! SQL dialect differences
//!
//! Everything else the synthesizer emits is common to PostgreSQL and SQLite.

use crate::intent::plan::TimeGrain;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Postgres,
    Sqlite,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "postgres",
            SqlDialect::Sqlite => "sqlite",
        }
    }

    /// Expression truncating a timestamp column to the start of its bucket.
    /// Weeks start on Monday in both dialects.
    pub fn time_bucket(&self, grain: TimeGrain, column: &str) -> String {
        match self {
            SqlDialect::Postgres => format!("date_trunc('{}', {})", grain.as_str(), column),
            SqlDialect::Sqlite => match grain {
                TimeGrain::Day => format!("date({})", column),
                TimeGrain::Week => format!("date({}, 'weekday 0', '-6 days')", column),
                TimeGrain::Month => format!("strftime('%Y-%m-01', {})", column),
            },
        }
    }
}

impl SqlDialect {
    /// PostgreSQL widens `SUM(bigint)` to NUMERIC; keep integer sums integral.
    pub fn integer_aggregate(&self, expression: String) -> String {
        match self {
            SqlDialect::Postgres if expression.starts_with("SUM(") => {
                format!("CAST({} AS BIGINT)", expression)
            }
            _ => expression,
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
