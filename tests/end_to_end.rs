//! Whole-pipeline tests: prompt in, answer out, one history row per prompt.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamlens::compiler::SqlDialect;
use streamlens::db::SqliteStore;
use streamlens::error::StoreError;
use streamlens::execution::{AnalyticsStore, NewNlQuery, NlQueryRecord, RowSet};
use streamlens::security::{QueryGuards, ValidatedQuery};
use streamlens::semantic::builtin;
use streamlens::{CatalogHandle, QueryEngine, QueryStatus, TenantId};

const SEED: &str = "
INSERT INTO users (id, email) VALUES (1, 'a@example.com'), (2, 'b@example.com');
INSERT INTO streams (id, user_id, started_at, ended_at, title, category, avg_viewers, peak_viewers, total_unique_viewers, stream_duration_min)
VALUES (1, 1, '2026-10-13 18:00:00', '2026-10-13 21:00:00', 'Tuesday run', 'Speedrun', 800, 1200, 950, 180),
       (2, 1, '2026-10-14 18:00:00', '2026-10-14 20:00:00', 'Chill', 'Just Chatting', 150, 300, 210, 120),
       (3, 1, '2026-10-15 18:00:00', '2026-10-15 19:30:00', 'Mining', 'Minecraft', 200, 450, 260, 90);
INSERT INTO viewers (id, twitch_user_id, age_bucket, country, device)
VALUES (1, 'tw1', '18-24', 'US', 'desktop'), (2, 'tw2', '25-34', 'DE', 'mobile');
INSERT INTO chat_messages (stream_id, viewer_id, ts, text, sentiment, toxicity)
VALUES (1, 1, '2026-10-13 18:05:00', 'gg', 0.8, 0.0),
       (1, 2, '2026-10-13 18:10:00', 'lag?', -0.3, 0.1),
       (2, 1, '2026-10-14 18:30:00', 'hi', 0.5, 0.0);
";

// Saturday
fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 17)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

async fn sqlite_store() -> Arc<SqliteStore> {
    let store = SqliteStore::open_in_memory().unwrap();
    store.init_schema().await.unwrap();
    store
        .with_connection(|conn| {
            conn.execute_batch(SEED)?;
            Ok(())
        })
        .await
        .unwrap();
    Arc::new(store)
}

fn engine(store: Arc<dyn AnalyticsStore>, guards: QueryGuards) -> QueryEngine {
    let catalog = Arc::new(CatalogHandle::new(builtin::catalog().unwrap()));
    QueryEngine::new(catalog, store, guards)
}

async fn stream_count(store: &SqliteStore) -> i64 {
    store
        .with_connection(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM streams", [], |row| row.get(0))?)
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_peak_viewers_last_tuesday() {
    let engine = engine(sqlite_store().await, QueryGuards::default());
    let outcome = engine
        .resolve_query(TenantId(1), "What was my peak viewer count last Tuesday?", now())
        .await
        .unwrap();

    assert_eq!(outcome.status, QueryStatus::Ok);
    let payload = outcome.structured_payload.unwrap();
    assert_eq!(payload.rows, vec![json!({"peak_viewers": 1200}).as_object().unwrap().clone()]);
    assert!(!payload.truncated);
    assert!(payload.summary.contains("1200"));

    let history = engine.history(TenantId(1), 10).await.unwrap();
    assert_eq!(history.len(), 1);
    let record = &history[0];
    assert_eq!(record.id, outcome.record_id);
    let sql = record.resolved_sql.as_deref().unwrap();
    assert!(sql.contains("streams.user_id = :tenant"));
    assert_eq!(record.answer["rows"][0]["peak_viewers"], json!(1200));
}

#[tokio::test]
async fn test_mutation_prompt_changes_nothing() {
    let store = sqlite_store().await;
    let engine = engine(store.clone(), QueryGuards::default());
    let outcome = engine
        .resolve_query(TenantId(1), "delete all my streams", now())
        .await
        .unwrap();

    assert_eq!(outcome.status, QueryStatus::Unresolved);
    assert!(outcome.structured_payload.is_none());
    assert_eq!(stream_count(&store).await, 3);

    let history = engine.history(TenantId(1), 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].resolved_sql, None);
    assert_eq!(history[0].answer["error_kind"], "unresolved");
}

#[tokio::test]
async fn test_rows_beyond_cap_are_truncated() {
    let guards = QueryGuards {
        max_rows: 2,
        ..QueryGuards::default()
    };
    let engine = engine(sqlite_store().await, guards);
    let outcome = engine
        .resolve_query(TenantId(1), "show me chat messages from my streams", now())
        .await
        .unwrap();

    assert_eq!(outcome.status, QueryStatus::Ok);
    let payload = outcome.structured_payload.unwrap();
    assert_eq!(payload.rows.len(), 2);
    assert!(payload.truncated);
    // Newest first.
    assert_eq!(payload.rows[0]["text"], "hi");
}

#[tokio::test]
async fn test_ambiguous_prompt_returns_candidates_without_executing() {
    let engine = engine(sqlite_store().await, QueryGuards::default());
    let outcome = engine
        .resolve_query(TenantId(1), "average viewers and chat toxicity trend", now())
        .await
        .unwrap();

    assert_eq!(outcome.status, QueryStatus::Ambiguous);
    let candidates = outcome.candidates.unwrap();
    assert_eq!(candidates.len(), 2);

    let history = engine.history(TenantId(1), 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].resolved_sql, None);
    assert_eq!(history[0].answer["candidates"].as_array().unwrap().len(), 2);

    // Picking a reading answers it and records one more row.
    let chosen = engine
        .resolve_plan(TenantId(1), "average viewers", &candidates[0].plan, None)
        .await
        .unwrap();
    assert_eq!(chosen.status, QueryStatus::Ok);
    assert_eq!(engine.history(TenantId(1), 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_choice_answers_ambiguous_prompt_in_one_record() {
    let engine = engine(sqlite_store().await, QueryGuards::default());
    let outcome = engine
        .resolve_query_with_choice(TenantId(1), "average viewers and chat toxicity trend", now(), 2)
        .await
        .unwrap();
    assert_eq!(outcome.status, QueryStatus::Ok);
    let payload = outcome.structured_payload.unwrap();
    assert_eq!(payload.columns[0].name, "period");
    assert_eq!(engine.history(TenantId(1), 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_same_prompt_twice_gives_same_answer_and_two_records() {
    let engine = engine(sqlite_store().await, QueryGuards::default());
    let prompt = "top 5 streams by peak viewers";
    let first = engine.resolve_query(TenantId(1), prompt, now()).await.unwrap();
    let second = engine.resolve_query(TenantId(1), prompt, now()).await.unwrap();

    assert_eq!(first.structured_payload, second.structured_payload);
    assert_ne!(first.record_id, second.record_id);
    assert_ne!(first.request_id, second.request_id);

    let history = engine.history(TenantId(1), 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].resolved_sql, history[1].resolved_sql);
}

#[tokio::test]
async fn test_history_is_newest_first() {
    let engine = engine(sqlite_store().await, QueryGuards::default());
    for prompt in ["how many streams did I do this month", "weekly watch time", "delete everything"] {
        engine.resolve_query(TenantId(1), prompt, now()).await.unwrap();
    }
    let prompts: Vec<String> = engine
        .history(TenantId(1), 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.prompt)
        .collect();
    assert_eq!(
        prompts,
        vec!["delete everything", "weekly watch time", "how many streams did I do this month"]
    );
    assert_eq!(engine.history(TenantId(1), 1).await.unwrap().len(), 1);
}

/// Store whose reads never finish in time.
#[derive(Default)]
struct SlowStore {
    records: Mutex<Vec<NewNlQuery>>,
}

#[async_trait]
impl AnalyticsStore for SlowStore {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn fetch_rows(
        &self,
        _query: &ValidatedQuery,
        _max_rows: usize,
        _timeout: Duration,
    ) -> Result<RowSet, StoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(RowSet::default())
    }

    async fn append_nl_query(&self, record: NewNlQuery) -> Result<i64, StoreError> {
        let mut records = self.records.lock().unwrap();
        records.push(record);
        Ok(records.len() as i64)
    }

    async fn nl_query_history(
        &self,
        tenant: TenantId,
        limit: usize,
    ) -> Result<Vec<NlQueryRecord>, StoreError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, r)| r.tenant == tenant)
            .take(limit)
            .map(|(i, r)| NlQueryRecord {
                id: i as i64 + 1,
                user_id: r.tenant.0,
                prompt: r.prompt.clone(),
                resolved_sql: r.resolved_sql.clone(),
                answer: r.answer.clone(),
                created_at: r.created_at,
            })
            .collect())
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}

#[tokio::test]
async fn test_slow_query_times_out_and_is_recorded() {
    let store = Arc::new(SlowStore::default());
    let guards = QueryGuards {
        execution_timeout: Duration::from_millis(50),
        ..QueryGuards::default()
    };
    let engine = engine(store.clone(), guards);
    let outcome = engine
        .resolve_query(TenantId(1), "What was my peak viewer count last Tuesday?", now())
        .await
        .unwrap();

    assert_eq!(outcome.status, QueryStatus::Timeout);
    assert!(outcome.message.contains("50 ms"));
    let records = store.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].resolved_sql, None);
    assert_eq!(records[0].answer["error_kind"], "timeout");
}

#[tokio::test]
async fn test_deadline_overrides_configured_timeout() {
    let store = Arc::new(SlowStore::default());
    let engine = engine(store, QueryGuards::default());
    let outcome = engine
        .resolve_query_with_deadline(
            TenantId(1),
            "What was my peak viewer count last Tuesday?",
            now(),
            Duration::from_millis(20),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, QueryStatus::Timeout);
}
