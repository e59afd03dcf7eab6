//! Query Result - rows returned by the executor

use crate::compiler::OutputColumn;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Result columns, as synthesized
    pub columns: Vec<OutputColumn>,

    /// At most `max_rows` rows, one JSON value per column
    pub rows: Vec<Vec<serde_json::Value>>,

    /// More rows matched than were kept
    pub truncated: bool,

    pub execution_time_ms: u64,

    /// Store that executed the query
    pub store: String,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
