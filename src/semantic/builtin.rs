//! Built-in catalog for the streaming analytics schema.

use crate::error::Result;
use crate::semantic::catalog::{Catalog, CatalogSpec, ColumnDef, SemanticType, TableDef};
use crate::semantic::dimension::{grouping_phrases, DimensionDef};
use crate::semantic::join_graph::{ColumnRef, ForeignKey};
use crate::semantic::metric::{Aggregation, MetricDef};

use SemanticType::{Boolean, Category, Float, Integer, Text, Timestamp};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// Bare "viewers" could mean any of several metrics, so the resolver treats it
// as ambiguous unless a more specific phrase is present.
const GENERIC_VIEWERS: [&str; 5] = [
    "viewers",
    "viewer count",
    "viewer numbers",
    "viewership",
    "view count",
];

fn with_generic<'a>(specific: &[&'a str]) -> Vec<&'a str> {
    let mut all = specific.to_vec();
    all.extend_from_slice(&GENERIC_VIEWERS);
    all
}

pub fn spec() -> CatalogSpec {
    let streams = TableDef {
        name: "streams".to_string(),
        label: "streams".to_string(),
        nouns: strings(&["stream", "streams", "broadcast", "broadcasts", "vod", "vods"]),
        columns: vec![
            ColumnDef::new("id", Integer, &[]).not_null(),
            ColumnDef::new("user_id", Integer, &[]),
            ColumnDef::new("twitch_stream_id", Text, &[]),
            ColumnDef::new("started_at", Timestamp, &["start time", "started"]),
            ColumnDef::new("ended_at", Timestamp, &["end time", "ended"]),
            ColumnDef::new("title", Text, &["title", "titled", "called", "named"]),
            ColumnDef::new("category", Category, &["category", "game", "playing"]),
            ColumnDef::new("avg_viewers", Integer, &["average viewers", "avg viewers", "average viewer count"]),
            ColumnDef::new("peak_viewers", Integer, &["peak viewers", "peak viewer count", "peak"]),
            ColumnDef::new("total_unique_viewers", Integer, &["unique viewers", "total unique viewers"]),
            ColumnDef::new("stream_duration_min", Integer, &["minutes long", "minutes", "duration"]),
        ],
        list_columns: strings(&[
            "started_at",
            "ended_at",
            "title",
            "category",
            "avg_viewers",
            "peak_viewers",
            "total_unique_viewers",
            "stream_duration_min",
        ]),
        time_column: Some(ColumnRef::new("streams", "started_at")),
        tenant_column: Some("user_id".to_string()),
        count_metric: Some("stream_count".to_string()),
    };

    let viewers = TableDef {
        name: "viewers".to_string(),
        label: "viewers".to_string(),
        nouns: vec![],
        columns: vec![
            ColumnDef::new("id", Integer, &[]).not_null(),
            ColumnDef::new("twitch_user_id", Text, &[]),
            ColumnDef::new("age_bucket", Category, &["age", "age bucket", "age group"]),
            ColumnDef::new("country", Category, &["country"]),
            ColumnDef::new("device", Category, &["device", "platform"]),
        ],
        list_columns: vec![],
        time_column: None,
        tenant_column: None,
        count_metric: None,
    };

    let stream_viewers = TableDef {
        name: "stream_viewers".to_string(),
        label: "viewer sessions".to_string(),
        nouns: strings(&["viewer session", "viewer sessions", "watch session", "watch sessions"]),
        columns: vec![
            ColumnDef::new("id", Integer, &[]).not_null(),
            ColumnDef::new("stream_id", Integer, &[]),
            ColumnDef::new("viewer_id", Integer, &[]),
            ColumnDef::new("watch_minutes", Integer, &["minutes watched", "watch minutes", "watch time"]),
            ColumnDef::new("chat_messages", Integer, &["chat messages sent", "messages sent"]),
            ColumnDef::new("first_time_chatter", Boolean, &[]),
        ],
        list_columns: strings(&[
            "stream_id",
            "viewer_id",
            "watch_minutes",
            "chat_messages",
            "first_time_chatter",
        ]),
        time_column: Some(ColumnRef::new("streams", "started_at")),
        tenant_column: None,
        count_metric: Some("session_count".to_string()),
    };

    let chat_messages = TableDef {
        name: "chat_messages".to_string(),
        label: "chat messages".to_string(),
        nouns: strings(&[
            "chat message",
            "chat messages",
            "message",
            "messages",
            "chat log",
            "chat",
            "chats",
        ]),
        columns: vec![
            ColumnDef::new("id", Integer, &[]).not_null(),
            ColumnDef::new("stream_id", Integer, &[]),
            ColumnDef::new("viewer_id", Integer, &[]),
            ColumnDef::new("ts", Timestamp, &["time", "timestamp"]),
            ColumnDef::new("text", Text, &["text", "saying", "mentioning", "containing"]),
            ColumnDef::new("sentiment", Float, &["sentiment"]),
            ColumnDef::new("toxicity", Float, &["toxicity"]),
        ],
        list_columns: strings(&["ts", "stream_id", "viewer_id", "text", "sentiment", "toxicity"]),
        time_column: Some(ColumnRef::new("chat_messages", "ts")),
        tenant_column: None,
        count_metric: Some("message_count".to_string()),
    };

    let nl_queries = TableDef {
        name: "nl_queries".to_string(),
        label: "questions".to_string(),
        nouns: strings(&["question", "questions"]),
        columns: vec![
            ColumnDef::new("id", Integer, &[]).not_null(),
            ColumnDef::new("user_id", Integer, &[]),
            ColumnDef::new("prompt", Text, &["prompt", "asking"]).not_null(),
            ColumnDef::new("resolved_sql", Text, &[]),
            ColumnDef::new("created_at", Timestamp, &["asked"]),
        ],
        list_columns: strings(&["created_at", "prompt", "resolved_sql"]),
        time_column: Some(ColumnRef::new("nl_queries", "created_at")),
        tenant_column: Some("user_id".to_string()),
        count_metric: Some("question_count".to_string()),
    };

    let foreign_keys = vec![
        ForeignKey::new("stream_viewers", "stream_id", "streams", "id"),
        ForeignKey::new("stream_viewers", "viewer_id", "viewers", "id"),
        ForeignKey::new("chat_messages", "stream_id", "streams", "id"),
        ForeignKey::new("chat_messages", "viewer_id", "viewers", "id"),
    ];

    let metrics = vec![
        MetricDef::new(
            "peak_viewers",
            "Peak viewers",
            "streams",
            "peak_viewers",
            Aggregation::Max,
            &with_generic(&[
                "peak viewers",
                "peak viewer",
                "peak viewer count",
                "peak viewership",
                "max viewers",
                "maximum viewers",
                "most viewers",
                "highest viewer count",
                "peak",
            ]),
        )
        .with_description("Highest concurrent viewer count of any stream"),
        MetricDef::new(
            "avg_viewers",
            "Average viewers",
            "streams",
            "avg_viewers",
            Aggregation::Avg,
            &with_generic(&[
                "average viewers",
                "average viewer",
                "average viewer count",
                "avg viewers",
                "average viewership",
                "average ccv",
                "ccv",
                "concurrent viewers",
            ]),
        )
        .with_description("Mean of per-stream average concurrent viewers"),
        MetricDef::new(
            "unique_viewers",
            "Unique viewers",
            "streams",
            "total_unique_viewers",
            Aggregation::Sum,
            &with_generic(&["unique viewers", "unique viewer", "total unique viewers", "reach"]),
        )
        .with_description("Sum of per-stream unique viewers"),
        MetricDef::new(
            "stream_count",
            "Streams",
            "streams",
            "id",
            Aggregation::Count,
            &["stream count", "streams count", "number of streams"],
        ),
        MetricDef::new(
            "minutes_streamed",
            "Minutes streamed",
            "streams",
            "stream_duration_min",
            Aggregation::Sum,
            &[
                "minutes streamed",
                "time streamed",
                "hours streamed",
                "stream time",
                "streaming time",
                "total duration",
                "airtime",
            ],
        ),
        MetricDef::new(
            "avg_stream_length",
            "Average stream length (minutes)",
            "streams",
            "stream_duration_min",
            Aggregation::Avg,
            &[
                "average stream length",
                "average stream duration",
                "avg stream length",
                "average duration",
                "average length",
            ],
        ),
        MetricDef::new(
            "watch_time",
            "Watch time (minutes)",
            "stream_viewers",
            "watch_minutes",
            Aggregation::Sum,
            &["watch time", "minutes watched", "watch minutes", "hours watched", "watchtime"],
        ),
        MetricDef::new(
            "avg_watch_time",
            "Average watch time (minutes)",
            "stream_viewers",
            "watch_minutes",
            Aggregation::Avg,
            &["average watch time", "avg watch time", "average minutes watched"],
        ),
        MetricDef::new(
            "audience_size",
            "Distinct viewers",
            "stream_viewers",
            "viewer_id",
            Aggregation::CountDistinct,
            &with_generic(&[
                "audience size",
                "distinct viewers",
                "different viewers",
                "individual viewers",
                "audience",
            ]),
        ),
        MetricDef::new(
            "session_count",
            "Viewer sessions",
            "stream_viewers",
            "id",
            Aggregation::Count,
            &["session count"],
        ),
        MetricDef::new(
            "first_time_chatters",
            "First-time chatters",
            "stream_viewers",
            "first_time_chatter",
            Aggregation::CountTrue,
            &[
                "first time chatters",
                "first time chatter",
                "new chatters",
                "new chatter",
                "first chatters",
            ],
        ),
        MetricDef::new(
            "message_count",
            "Chat messages",
            "chat_messages",
            "id",
            Aggregation::Count,
            &["message count", "chat volume", "chat activity", "messages sent"],
        ),
        MetricDef::new(
            "avg_sentiment",
            "Average chat sentiment",
            "chat_messages",
            "sentiment",
            Aggregation::Avg,
            &["sentiment", "chat sentiment", "average sentiment", "mood", "positivity"],
        ),
        MetricDef::new(
            "avg_toxicity",
            "Average chat toxicity",
            "chat_messages",
            "toxicity",
            Aggregation::Avg,
            &["toxicity", "chat toxicity", "average toxicity", "toxic", "toxicness"],
        ),
        MetricDef::new(
            "question_count",
            "Questions asked",
            "nl_queries",
            "id",
            Aggregation::Count,
            &["question count", "questions asked"],
        ),
    ];

    let dimensions = vec![
        DimensionDef::new(
            "category",
            "Category",
            "streams",
            &["category"],
            grouping_phrases(&["category", "game"], &["categories", "games"]),
        ),
        DimensionDef::new(
            "stream",
            "Stream",
            "streams",
            &["id", "title", "started_at"],
            grouping_phrases(&["stream", "broadcast"], &[]),
        ),
        DimensionDef::new(
            "country",
            "Country",
            "viewers",
            &["country"],
            grouping_phrases(&["country"], &["countries"]),
        ),
        DimensionDef::new(
            "device",
            "Device",
            "viewers",
            &["device"],
            grouping_phrases(&["device", "platform"], &["devices", "platforms"]),
        ),
        DimensionDef::new(
            "age_bucket",
            "Age group",
            "viewers",
            &["age_bucket"],
            grouping_phrases(&["age", "age group", "age bucket"], &["age groups", "ages"]),
        ),
    ];

    CatalogSpec {
        tables: vec![streams, viewers, stream_viewers, chat_messages, nl_queries],
        foreign_keys,
        metrics,
        dimensions,
    }
}

pub fn catalog() -> Result<Catalog> {
    Catalog::build(spec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_metric_table_is_scoped() {
        let catalog = catalog().unwrap();
        for metric in catalog.metrics() {
            assert!(
                catalog.tenant_anchor(&metric.table).is_some(),
                "{} is unscoped",
                metric.name
            );
        }
    }

    #[test]
    fn test_count_metrics_point_at_their_table() {
        let catalog = catalog().unwrap();
        for table in catalog.tables() {
            if let Some(name) = &table.count_metric {
                assert_eq!(catalog.metric(name).unwrap().table, table.name);
            }
        }
    }
}
