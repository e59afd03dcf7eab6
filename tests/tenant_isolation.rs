//! Two streamers in one database: neither ever sees the other's rows.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use std::sync::Arc;
use streamlens::db::SqliteStore;
use streamlens::execution::AnalyticsStore;
use streamlens::security::QueryGuards;
use streamlens::semantic::builtin;
use streamlens::{CatalogHandle, QueryEngine, QueryStatus, TenantId};

const ALICE: TenantId = TenantId(1);
const BOB: TenantId = TenantId(2);

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 17)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

async fn engine() -> QueryEngine {
    let store = SqliteStore::open_in_memory().unwrap();
    store.init_schema().await.unwrap();
    store
        .with_connection(|conn| {
            conn.execute_batch(
                "INSERT INTO users (id, email) VALUES (1, 'alice@example.com'), (2, 'bob@example.com');
                 INSERT INTO streams (id, user_id, started_at, title, category, avg_viewers, peak_viewers)
                 VALUES (1, 1, '2026-10-13 18:00:00', 'Alice speedrun', 'Speedrun', 800, 1200),
                        (2, 1, '2026-10-14 18:00:00', 'Alice chat', 'Just Chatting', 150, 300),
                        (3, 2, '2026-10-13 19:00:00', 'Bob art', 'Art', 5000, 9999);
                 INSERT INTO viewers (id, twitch_user_id, country, device)
                 VALUES (1, 'tw1', 'US', 'desktop'), (2, 'tw2', 'BR', 'mobile'), (3, 'tw3', 'JP', 'tv');
                 INSERT INTO stream_viewers (stream_id, viewer_id, watch_minutes, chat_messages, first_time_chatter)
                 VALUES (1, 1, 60, 2, 1), (2, 2, 30, 0, 0), (3, 3, 90, 5, 1), (3, 1, 10, 1, 0);
                 INSERT INTO chat_messages (stream_id, viewer_id, ts, text, sentiment, toxicity)
                 VALUES (1, 1, '2026-10-13 18:05:00', 'alice gg', 0.9, 0.0),
                        (3, 3, '2026-10-13 19:05:00', 'bob secret', 0.1, 0.9),
                        (3, 1, '2026-10-13 19:06:00', 'bob lol', 0.4, 0.2);",
            )?;
            Ok(())
        })
        .await
        .unwrap();
    let catalog = Arc::new(CatalogHandle::new(builtin::catalog().unwrap()));
    QueryEngine::new(catalog, Arc::new(store), QueryGuards::default())
}

async fn rows(engine: &QueryEngine, tenant: TenantId, prompt: &str) -> Vec<Value> {
    let outcome = engine.resolve_query(tenant, prompt, now()).await.unwrap();
    assert_eq!(outcome.status, QueryStatus::Ok, "{}: {}", prompt, outcome.message);
    outcome
        .structured_payload
        .unwrap()
        .rows
        .into_iter()
        .map(Value::Object)
        .collect()
}

#[tokio::test]
async fn test_stream_aggregates_are_per_tenant() {
    let engine = engine().await;
    let prompt = "How many streams did I do this month?";
    assert_eq!(rows(&engine, ALICE, prompt).await, vec![json!({"stream_count": 2})]);
    assert_eq!(rows(&engine, BOB, prompt).await, vec![json!({"stream_count": 1})]);
}

#[tokio::test]
async fn test_listings_never_cross_tenants() {
    let engine = engine().await;
    let alice = rows(&engine, ALICE, "top 5 streams by peak viewers").await;
    let peaks: Vec<&Value> = alice.iter().map(|r| &r["peak_viewers"]).collect();
    assert_eq!(peaks, vec![&json!(1200), &json!(300)]);

    let bob = rows(&engine, BOB, "show me chat messages from my streams").await;
    let texts: Vec<&Value> = bob.iter().map(|r| &r["text"]).collect();
    assert_eq!(texts, vec![&json!("bob lol"), &json!("bob secret")]);
}

#[tokio::test]
async fn test_shared_viewers_are_scoped_through_streams() {
    let engine = engine().await;
    // Viewer 1 watched both streamers; each side only counts its own sessions.
    let alice = rows(&engine, ALICE, "viewers by country").await;
    let countries: Vec<&Value> = alice.iter().map(|r| &r["country"]).collect();
    assert_eq!(countries.len(), 2);
    assert!(!countries.contains(&&json!("JP")));

    let bob = rows(&engine, BOB, "viewers by country").await;
    let countries: Vec<&Value> = bob.iter().map(|r| &r["country"]).collect();
    assert!(countries.contains(&&json!("JP")));
    assert!(!countries.contains(&&json!("BR")));
}

#[tokio::test]
async fn test_history_is_per_tenant() {
    let engine = engine().await;
    engine.resolve_query(ALICE, "weekly watch time", now()).await.unwrap();
    engine.resolve_query(BOB, "drop my streams", now()).await.unwrap();
    engine.resolve_query(BOB, "how many chat messages", now()).await.unwrap();

    let alice = engine.history(ALICE, 10).await.unwrap();
    assert_eq!(alice.len(), 1);
    assert!(alice.iter().all(|r| r.user_id == 1));

    let bob = engine.history(BOB, 10).await.unwrap();
    assert_eq!(bob.len(), 2);
    assert_eq!(bob[0].prompt, "how many chat messages");
    assert_eq!(bob[0].answer["rows"][0]["message_count"], json!(2));
}
