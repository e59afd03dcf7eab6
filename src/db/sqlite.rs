//! SQLite store (rusqlite)
//!
//! One connection behind a mutex. Statements run on the blocking pool; an
//! analytic read flips the connection to `query_only` for its duration and
//! carries its own [`StatementBudget`], so a timeout only ever aborts the
//! statement of the request that timed out.

use crate::compiler::{BoundParam, SqlDialect, SqlValue};
use crate::db::schema::{SQLITE_SCHEMA, SQLITE_TIMESTAMP_FORMAT};
use crate::error::StoreError;
use crate::execution::store::{AnalyticsStore, NewNlQuery, NlQueryRecord, RowSet};
use crate::security::ValidatedQuery;
use crate::semantic::TenantId;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{params, Connection, ErrorCode};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// VM instructions between deadline checks while a read runs.
const PROGRESS_OPS: i32 = 1000;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open from a `sqlite:` URL: `sqlite::memory:`, `sqlite://file.db`,
    /// `sqlite:file.db` or a bare `:memory:`.
    pub fn open_url(url: &str) -> Result<Self, StoreError> {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        if path.is_empty() || path == ":memory:" {
            Self::open_in_memory()
        } else {
            Self::open(path)
        }
    }

    /// Run `f` on the connection from the blocking pool.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Task("sqlite connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn to_sqlite(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Int(v) => SqliteValue::Integer(*v),
        SqlValue::Float(v) => SqliteValue::Real(*v),
        SqlValue::Text(v) => SqliteValue::Text(v.clone()),
        SqlValue::Timestamp(v) => SqliteValue::Text(v.format(SQLITE_TIMESTAMP_FORMAT).to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::from(v),
        ValueRef::Real(v) => serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted)
}

fn select_rows(conn: &Connection, sql: &str, params: &[BoundParam]) -> Result<Vec<Vec<Value>>, StoreError> {
    let mut statement = conn.prepare(sql)?;
    for param in params {
        if let Some(index) = statement.parameter_index(&format!(":{}", param.name))? {
            statement.raw_bind_parameter(index, to_sqlite(&param.value))?;
        }
    }
    let width = statement.column_count();
    let mut rows = statement.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(to_json(row.get_ref(i)?));
        }
        out.push(cells);
    }
    Ok(out)
}

/// Time allowed to one read, counted from when the request was made
/// (waiting for the connection included).
#[derive(Debug, Clone)]
struct StatementBudget {
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl StatementBudget {
    fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The request stopped waiting; its statement must not run or keep running.
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_spent(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || Instant::now() >= self.deadline
    }
}

fn read_only_select(
    conn: &Connection,
    sql: &str,
    params: &[BoundParam],
    budget: &StatementBudget,
) -> Result<Vec<Vec<Value>>, StoreError> {
    if budget.is_spent() {
        return Err(StoreError::Timeout);
    }
    conn.execute_batch("PRAGMA query_only = ON")?;
    let watch = budget.clone();
    conn.progress_handler(PROGRESS_OPS, Some(move || watch.is_spent()));
    let result = select_rows(conn, sql, params);
    conn.progress_handler(PROGRESS_OPS, None::<fn() -> bool>);
    conn.execute_batch("PRAGMA query_only = OFF")?;
    result.map_err(|err| match err {
        StoreError::Sqlite(e) if is_interrupt(&e) => StoreError::Timeout,
        other => other,
    })
}

#[async_trait]
impl AnalyticsStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn fetch_rows(
        &self,
        query: &ValidatedQuery,
        max_rows: usize,
        timeout: Duration,
    ) -> Result<RowSet, StoreError> {
        let sql = format!("SELECT * FROM ({}) AS bounded LIMIT {}", query.sql(), max_rows);
        debug!(sql = %sql, "sqlite fetch");
        let params = query.params().to_vec();

        let budget = StatementBudget::new(timeout);
        let statement_budget = budget.clone();
        let task = self.with_connection(move |conn| read_only_select(conn, &sql, &params, &statement_budget));
        let rows = match tokio::time::timeout(timeout, task).await {
            Ok(result) => result?,
            Err(_) => {
                budget.cancel();
                return Err(StoreError::Timeout);
            }
        };

        Ok(RowSet {
            columns: query.columns().iter().map(|c| c.name.clone()).collect(),
            rows,
        })
    }

    async fn append_nl_query(&self, record: NewNlQuery) -> Result<i64, StoreError> {
        let answer = serde_json::to_string(&record.answer)?;
        let created_at = record.created_at.format(SQLITE_TIMESTAMP_FORMAT).to_string();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO nl_queries (user_id, prompt, resolved_sql, answer, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![record.tenant.0, record.prompt, record.resolved_sql, answer, created_at],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn nl_query_history(
        &self,
        tenant: TenantId,
        limit: usize,
    ) -> Result<Vec<NlQueryRecord>, StoreError> {
        self.with_connection(move |conn| {
            let mut statement = conn.prepare(
                "SELECT id, user_id, prompt, resolved_sql, answer, created_at FROM nl_queries \
                 WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let raw = statement
                .query_map(params![tenant.0, limit as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            raw.into_iter()
                .map(|(id, user_id, prompt, resolved_sql, answer, created_at)| -> Result<NlQueryRecord, StoreError> {
                    let created_at = NaiveDateTime::parse_from_str(&created_at, SQLITE_TIMESTAMP_FORMAT)
                        .map_err(|e| {
                            StoreError::Database(format!("bad created_at {:?}: {}", created_at, e))
                        })?;
                    Ok(NlQueryRecord {
                        id,
                        user_id,
                        prompt,
                        resolved_sql,
                        answer: match answer {
                            Some(text) => serde_json::from_str(&text)?,
                            None => Value::Null,
                        },
                        created_at,
                    })
                })
                .collect()
        })
        .await
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        self.with_connection(|conn| {
            let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            Ok(one == 1)
        })
        .await
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute_batch(SQLITE_SCHEMA)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::SqlSynthesizer;
    use crate::intent::plan::{MetricRef, QueryPlan};
    use crate::security::{QueryGuards, SqlValidator};
    use crate::semantic::{builtin, Aggregation};
    use chrono::NaiveDate;
    use serde_json::json;

    async fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema().await.unwrap();
        store
            .with_connection(|conn| {
                conn.execute_batch(
                    "INSERT INTO users (id, email) VALUES (1, 'a@example.com'), (2, 'b@example.com');
                     INSERT INTO streams (id, user_id, started_at, title, category, peak_viewers, avg_viewers)
                     VALUES (1, 1, '2026-10-13 18:00:00', 'Tuesday run', 'Speedrun', 1200, 800),
                            (2, 1, '2026-10-14 18:00:00', 'Chill', 'Just Chatting', 300, 150),
                            (3, 2, '2026-10-13 18:00:00', 'Other', 'Speedrun', 9999, 5000);",
                )?;
                Ok(())
            })
            .await
            .unwrap();
        store
    }

    fn validated(plan: &QueryPlan, tenant: i64) -> ValidatedQuery {
        let catalog = Arc::new(builtin::catalog().unwrap());
        let scoped = catalog.scoped(TenantId(tenant));
        let guards = QueryGuards::default();
        let query = SqlSynthesizer::new(&scoped, SqlDialect::Sqlite, &guards)
            .synthesize(plan)
            .unwrap();
        SqlValidator::new(&catalog).validate(query).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_is_tenant_scoped() {
        let store = seeded().await;
        let plan = QueryPlan::metrics(vec![MetricRef {
            name: "peak_viewers".to_string(),
            aggregation: Aggregation::Max,
        }]);
        let rows = store
            .fetch_rows(&validated(&plan, 1), 1001, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["peak_viewers"]);
        assert_eq!(rows.rows, vec![vec![json!(1200)]]);
    }

    #[tokio::test]
    async fn test_fetch_respects_row_cap() {
        let store = seeded().await;
        let rows = store
            .fetch_rows(&validated(&QueryPlan::rows("streams"), 1), 1, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_connection_is_writable_after_a_read() {
        let store = seeded().await;
        store
            .fetch_rows(&validated(&QueryPlan::rows("streams"), 1), 10, Duration::from_secs(5))
            .await
            .unwrap();
        let created_at = NaiveDate::from_ymd_opt(2026, 10, 17)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let id = store
            .append_nl_query(NewNlQuery {
                tenant: TenantId(1),
                prompt: "streams".to_string(),
                resolved_sql: None,
                answer: json!({"error_kind": "unresolved", "message": "no"}),
                created_at,
            })
            .await
            .unwrap();
        let history = store.nl_query_history(TenantId(1), 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].created_at, created_at);
        assert_eq!(history[0].answer["error_kind"], "unresolved");
        assert!(store.nl_query_history(TenantId(2), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_substring_filter_treats_wildcards_literally() {
        use crate::intent::plan::{Filter, FilterOp, FilterValue};
        use crate::semantic::ColumnRef;

        let store = seeded().await;
        let titled = |text: &str| {
            let mut plan = QueryPlan::rows("streams");
            plan.filters = vec![Filter {
                column: ColumnRef::new("streams", "title"),
                op: FilterOp::Contains,
                value: FilterValue::Text(text.to_string()),
            }];
            validated(&plan, 1)
        };

        let wildcard = store
            .fetch_rows(&titled("day_run"), 10, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(wildcard.rows.is_empty());

        let plain = store
            .fetch_rows(&titled("day run"), 10, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(plain.rows.len(), 1);
    }

    const ENDLESS_COUNT: &str =
        "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT COUNT(*) FROM n";
    const LONG_COUNT: &str = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 3000000) \
         SELECT COUNT(*) FROM n";

    fn failure_record(tenant: i64) -> NewNlQuery {
        NewNlQuery {
            tenant: TenantId(tenant),
            prompt: "anything".to_string(),
            resolved_sql: None,
            answer: json!({"error_kind": "timeout", "message": "slow"}),
            created_at: NaiveDate::from_ymd_opt(2026, 10, 17)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn test_overrunning_read_is_aborted_and_connection_recovers() {
        let store = seeded().await;
        let budget = StatementBudget::new(Duration::from_millis(50));
        let err = store
            .with_connection(move |conn| read_only_select(conn, ENDLESS_COUNT, &[], &budget))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout));

        // query_only is off again and no handler is left behind.
        let id = store.append_nl_query(failure_record(1)).await.unwrap();
        assert!(id > 0);
        let rows = store
            .fetch_rows(&validated(&QueryPlan::rows("streams"), 1), 10, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_spent_budget_never_starts_the_statement() {
        let store = seeded().await;
        let budget = StatementBudget::new(Duration::from_secs(60));
        budget.cancel();
        let err = store
            .with_connection(move |conn| read_only_select(conn, "SELECT 1", &[], &budget))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout));
    }

    #[tokio::test]
    async fn test_timeout_only_aborts_its_own_statement() {
        let store = Arc::new(seeded().await);
        let long = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let budget = StatementBudget::new(Duration::from_secs(60));
                store
                    .with_connection(move |conn| read_only_select(conn, LONG_COUNT, &[], &budget))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Tenant 2 gives up while tenant 1's statement holds the connection.
        let quick = store
            .fetch_rows(&validated(&QueryPlan::rows("streams"), 2), 10, Duration::from_millis(10))
            .await;
        assert!(matches!(quick, Err(StoreError::Timeout)));

        let rows = long.await.unwrap().unwrap();
        assert_eq!(rows, vec![vec![json!(3_000_000)]]);
        assert!(store.append_nl_query(failure_record(2)).await.is_ok());
    }

    #[test]
    fn test_open_url_forms() {
        assert!(SqliteStore::open_url("sqlite::memory:").is_ok());
        assert!(SqliteStore::open_url(":memory:").is_ok());
    }
}
