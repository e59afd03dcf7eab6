//! Query Executor
//!
//! Runs validated queries against the configured store under the row cap and
//! the statement deadline, and classifies store failures. Driver messages never
//! leave this module: they are logged together with the SQL and its parameters,
//! and the caller gets a generic [`NlqError::ExecutionError`].

use crate::compiler::describe_params;
use crate::error::{NlqError, Result, StoreError};
use crate::execution::result::QueryResult;
use crate::execution::store::AnalyticsStore;
use crate::security::{QueryGuards, ValidatedQuery};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub struct QueryExecutor {
    store: Arc<dyn AnalyticsStore>,
    guards: QueryGuards,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn AnalyticsStore>, guards: QueryGuards) -> Self {
        Self { store, guards }
    }

    pub fn store(&self) -> &Arc<dyn AnalyticsStore> {
        &self.store
    }

    pub fn guards(&self) -> &QueryGuards {
        &self.guards
    }

    /// Execute with the configured timeout, shortened to `deadline` if given.
    pub async fn execute(
        &self,
        query: &ValidatedQuery,
        deadline: Option<Duration>,
    ) -> Result<QueryResult> {
        let timeout = self.guards.effective_timeout(deadline);
        let fetch_limit = self.guards.fetch_limit();
        let started = Instant::now();

        // The store enforces the timeout itself; this bound covers a store that does not.
        let fetched = tokio::time::timeout(
            timeout,
            self.store.fetch_rows(query, fetch_limit, timeout),
        )
        .await;

        let rowset = match fetched {
            Err(_) | Ok(Err(StoreError::Timeout)) => {
                warn!(
                    store = self.store.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    sql = %query.sql(),
                    "query timed out"
                );
                return Err(NlqError::QueryTimeout(timeout));
            }
            Ok(Err(err)) => {
                error!(
                    store = self.store.name(),
                    sql = %query.sql(),
                    params = %describe_params(query.params()),
                    error = %err,
                    "query execution failed"
                );
                return Err(NlqError::ExecutionError(
                    "the analytics store could not run this query".to_string(),
                ));
            }
            Ok(Ok(rowset)) => rowset,
        };

        if rowset.columns.len() != query.columns().len() {
            error!(
                store = self.store.name(),
                sql = %query.sql(),
                expected = query.columns().len(),
                returned = rowset.columns.len(),
                "store returned an unexpected column count"
            );
            return Err(NlqError::ExecutionError(
                "the analytics store returned an unexpected result shape".to_string(),
            ));
        }

        let mut rows = rowset.rows;
        let truncated = rows.len() > self.guards.max_rows;
        rows.truncate(self.guards.max_rows);

        let execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            store = self.store.name(),
            rows = rows.len(),
            truncated,
            execution_time_ms,
            "query executed"
        );

        Ok(QueryResult {
            columns: query.columns().to_vec(),
            rows,
            truncated,
            execution_time_ms,
            store: self.store.name().to_string(),
        })
    }
}
