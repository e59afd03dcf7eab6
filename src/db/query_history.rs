//! Query history repository for the append-only `nl_queries` log

use crate::error::{NlqError, Result};
use crate::execution::store::{AnalyticsStore, NewNlQuery, NlQueryRecord};
use crate::semantic::TenantId;
use std::sync::Arc;
use tracing::error;

/// Largest page `recent` will return.
pub const MAX_HISTORY: usize = 500;

pub struct QueryHistoryRepository {
    store: Arc<dyn AnalyticsStore>,
}

impl QueryHistoryRepository {
    pub fn new(store: Arc<dyn AnalyticsStore>) -> Self {
        Self { store }
    }

    pub async fn save_query(&self, record: NewNlQuery) -> Result<i64> {
        let tenant = record.tenant;
        self.store.append_nl_query(record).await.map_err(|err| {
            error!(store = self.store.name(), tenant = %tenant, error = %err, "failed to record nl query");
            NlqError::Storage(err.to_string())
        })
    }

    /// A tenant's questions, newest first.
    pub async fn recent(&self, tenant: TenantId, limit: usize) -> Result<Vec<NlQueryRecord>> {
        let limit = limit.clamp(1, MAX_HISTORY);
        Ok(self.store.nl_query_history(tenant, limit).await?)
    }
}
