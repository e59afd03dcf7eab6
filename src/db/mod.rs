//! Stores: PostgreSQL (sqlx) and SQLite (rusqlite), their DDL, and the
//! `nl_queries` history repository.

pub mod connection;
pub mod postgres;
pub mod query_history;
pub mod schema;
pub mod sqlite;

pub use connection::{init_pool, DbPool};
pub use postgres::PgStore;
pub use query_history::QueryHistoryRepository;
pub use sqlite::SqliteStore;

use crate::compiler::SqlDialect;
use crate::config::{redact_url, EngineConfig};
use crate::error::Result;
use crate::execution::AnalyticsStore;
use std::sync::Arc;
use tracing::info;

/// Open the store named by `config.database_url`.
pub async fn open_store(config: &EngineConfig) -> Result<Arc<dyn AnalyticsStore>> {
    let dialect = config.dialect()?;
    info!(dialect = %dialect, url = %redact_url(&config.database_url), "opening analytics store");
    let store: Arc<dyn AnalyticsStore> = match dialect {
        SqlDialect::Postgres => Arc::new(PgStore::connect(&config.database_url).await?),
        SqlDialect::Sqlite => Arc::new(SqliteStore::open_url(&config.database_url)?),
    };
    Ok(store)
}
