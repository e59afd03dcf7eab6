//! PostgreSQL store (sqlx)
//!
//! Each analytic read runs in its own transaction marked `READ ONLY` with a
//! transaction-local `statement_timeout`; the transaction is always rolled
//! back. Cell values are decoded by the column's database type name.

use crate::compiler::{SqlDialect, SqlValue};
use crate::db::connection::init_pool;
use crate::db::schema::POSTGRES_SCHEMA;
use crate::error::StoreError;
use crate::execution::store::{AnalyticsStore, NewNlQuery, NlQueryRecord, RowSet};
use crate::security::ValidatedQuery;
use crate::semantic::TenantId;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo};
use std::time::Duration;
use tracing::debug;

/// SQLSTATE for `query_canceled`, raised when `statement_timeout` fires.
const QUERY_CANCELED: &str = "57014";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(init_pool(database_url).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn bind<'q>(query: Query<'q, Postgres, PgArguments>, value: &SqlValue) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Timestamp(v) => query.bind(*v),
    }
}

fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(QUERY_CANCELED) => StoreError::Timeout,
        _ => StoreError::Postgres(err),
    }
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn timestamp(v: NaiveDateTime) -> Value {
    Value::String(v.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn decode_cell(row: &PgRow, index: usize) -> Result<Value, StoreError> {
    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(|v| Value::from(v as i64)),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(|v| Value::from(v as i64)),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(|v| float(v as f64)),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(float),
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<Option<String>, _>(index)?.map(Value::String),
        "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(index)?.map(timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(|v| timestamp(v.naive_utc())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        other => {
            return Err(StoreError::Database(format!(
                "column {} has unsupported type {}",
                row.columns()[index].name(),
                other
            )))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

#[async_trait]
impl AnalyticsStore for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn fetch_rows(
        &self,
        query: &ValidatedQuery,
        max_rows: usize,
        timeout: Duration,
    ) -> Result<RowSet, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", timeout.as_millis().max(1)))
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            "SELECT * FROM ({}) AS bounded LIMIT {}",
            query.positional_sql(),
            max_rows
        );
        debug!(sql = %sql, "postgres fetch");

        let mut statement = sqlx::query(&sql);
        for param in query.positional_params() {
            statement = bind(statement, &param.value);
        }
        let rows = statement.fetch_all(&mut *tx).await.map_err(classify)?;
        tx.rollback().await?;

        let columns = query.columns().iter().map(|c| c.name.clone()).collect();
        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            let cells = (0..row.columns().len())
                .map(|i| decode_cell(row, i))
                .collect::<Result<Vec<_>, _>>()?;
            decoded.push(cells);
        }
        Ok(RowSet {
            columns,
            rows: decoded,
        })
    }

    async fn append_nl_query(&self, record: NewNlQuery) -> Result<i64, StoreError> {
        let answer = serde_json::to_string(&record.answer)?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO nl_queries (user_id, prompt, resolved_sql, answer, created_at) \
             VALUES ($1, $2, $3, $4::jsonb, $5) RETURNING id::bigint",
        )
        .bind(record.tenant.0)
        .bind(record.prompt)
        .bind(record.resolved_sql)
        .bind(answer)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn nl_query_history(
        &self,
        tenant: TenantId,
        limit: usize,
    ) -> Result<Vec<NlQueryRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id::bigint AS id, user_id::bigint AS user_id, prompt, resolved_sql, \
             answer::text AS answer, created_at FROM nl_queries \
             WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(tenant.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<NlQueryRecord, StoreError> {
                let answer: Option<String> = row.try_get("answer")?;
                Ok(NlQueryRecord {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    prompt: row.try_get("prompt")?,
                    resolved_sql: row.try_get("resolved_sql")?,
                    answer: match answer {
                        Some(text) => serde_json::from_str(&text)?,
                        None => Value::Null,
                    },
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in POSTGRES_SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}
