//! Analytics store contract
//!
//! Both backends (PostgreSQL via sqlx, SQLite via rusqlite) and the scripted
//! test stores implement [`AnalyticsStore`]. Reads only accept a
//! [`ValidatedQuery`]; the one write is the append-only `nl_queries` log.

use crate::compiler::SqlDialect;
use crate::error::StoreError;
use crate::security::ValidatedQuery;
use crate::semantic::TenantId;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Raw rows as the store returned them, one JSON value per cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// A row about to be appended to `nl_queries`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNlQuery {
    pub tenant: TenantId,
    pub prompt: String,
    /// `None` whenever the prompt did not produce an executed query
    pub resolved_sql: Option<String>,
    pub answer: serde_json::Value,
    pub created_at: NaiveDateTime,
}

/// A persisted `nl_queries` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlQueryRecord {
    pub id: i64,
    pub user_id: i64,
    pub prompt: String,
    pub resolved_sql: Option<String>,
    pub answer: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Backend name for logs ("postgres", "sqlite")
    fn name(&self) -> &'static str;

    fn dialect(&self) -> SqlDialect;

    /// Run `query` read-only, returning at most `max_rows` rows. Exceeding
    /// `timeout` must cancel the statement and yield [`StoreError::Timeout`].
    async fn fetch_rows(
        &self,
        query: &ValidatedQuery,
        max_rows: usize,
        timeout: Duration,
    ) -> Result<RowSet, StoreError>;

    /// Append one `nl_queries` row; returns its id.
    async fn append_nl_query(&self, record: NewNlQuery) -> Result<i64, StoreError>;

    /// A tenant's past questions, newest first.
    async fn nl_query_history(
        &self,
        tenant: TenantId,
        limit: usize,
    ) -> Result<Vec<NlQueryRecord>, StoreError>;

    async fn health_check(&self) -> Result<bool, StoreError>;

    /// Create the tables if they do not exist.
    async fn init_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
