use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rusqlite::{params, Connection};
use std::path::PathBuf;
use streamlens::db::schema::{SQLITE_SCHEMA, SQLITE_TIMESTAMP_FORMAT};
use tracing::info;

const CATEGORIES: &[&str] = &["Just Chatting", "Speedrun", "Minecraft", "Valorant", "Art"];
const COUNTRIES: &[&str] = &["US", "DE", "BR", "GB", "JP", "FR"];
const DEVICES: &[&str] = &["desktop", "mobile", "console", "tv"];
const AGE_BUCKETS: &[&str] = &["13-17", "18-24", "25-34", "35-44", "45+"];
const CHAT_LINES: &[(&str, f64, f64)] = &[
    ("gg", 0.8, 0.0),
    ("that was insane", 0.9, 0.05),
    ("first time here, love it", 0.95, 0.0),
    ("lag again?", -0.4, 0.1),
    ("this run is boring", -0.6, 0.3),
    ("you are trash", -0.9, 0.85),
    ("lol", 0.3, 0.0),
];

#[derive(Parser)]
#[command(name = "seed_demo")]
#[command(about = "Write a deterministic demo analytics dataset to a SQLite file")]
struct Args {
    /// SQLite database file to create or extend
    #[arg(short, long, default_value = "streamlens_demo.db")]
    path: PathBuf,

    /// Random seed; the same seed always produces the same data
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of days of streams, ending yesterday
    #[arg(long, default_value_t = 28)]
    days: i64,

    /// Last day with data (defaults to yesterday, UTC)
    #[arg(long)]
    until: Option<NaiveDate>,

    /// Viewers in the shared viewer pool
    #[arg(long, default_value_t = 300)]
    viewers: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let until = args
        .until
        .unwrap_or_else(|| Utc::now().date_naive() - Duration::days(1));
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut conn = Connection::open(&args.path)
        .with_context(|| format!("opening {}", args.path.display()))?;
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    conn.execute_batch(SQLITE_SCHEMA)?;

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT OR IGNORE INTO users (id, email) VALUES (1, 'demo@streamlens.dev'), (2, 'rival@streamlens.dev')",
        [],
    )?;

    let viewer_ids = seed_viewers(&tx, &mut rng, args.viewers)?;
    let mut streams = 0;
    let mut messages = 0;
    for user_id in [1i64, 2] {
        for day in 0..args.days {
            let date = until - Duration::days(args.days - 1 - day);
            // Rest days.
            if rng.gen_bool(0.2) {
                continue;
            }
            let started_at = date
                .and_hms_opt(rng.gen_range(14..22), 0, 0)
                .context("invalid stream start")?;
            messages += seed_stream(&tx, &mut rng, user_id, started_at, &viewer_ids)?;
            streams += 1;
        }
    }
    tx.commit()?;

    info!(
        path = %args.path.display(),
        streams,
        messages,
        viewers = viewer_ids.len(),
        "demo data written"
    );
    Ok(())
}

fn seed_viewers(conn: &Connection, rng: &mut StdRng, count: usize) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(count);
    let mut stmt = conn.prepare(
        "INSERT INTO viewers (twitch_user_id, age_bucket, country, device) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for _ in 0..count {
        stmt.execute(params![
            format!("tw{}", rng.gen_range(100_000..999_999)),
            pick(rng, AGE_BUCKETS),
            pick(rng, COUNTRIES),
            pick(rng, DEVICES),
        ])?;
        ids.push(conn.last_insert_rowid());
    }
    Ok(ids)
}

/// Insert one stream with its audience and chat; returns the message count.
fn seed_stream(
    conn: &Connection,
    rng: &mut StdRng,
    user_id: i64,
    started_at: NaiveDateTime,
    viewer_ids: &[i64],
) -> Result<usize> {
    let duration_min: i64 = rng.gen_range(60..300);
    let ended_at = started_at + Duration::minutes(duration_min);
    let size = rng.gen_range(10..viewer_ids.len().max(11));
    let audience: Vec<i64> = viewer_ids.choose_multiple(rng, size).copied().collect();
    let peak = (audience.len() as i64) * rng.gen_range(3..8);
    let category = pick(rng, CATEGORIES);

    conn.execute(
        "INSERT INTO streams (user_id, twitch_stream_id, started_at, ended_at, title, category,
                              avg_viewers, peak_viewers, total_unique_viewers, stream_duration_min)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            user_id,
            format!("s{}-{}", user_id, started_at.format("%Y%m%d")),
            started_at.format(SQLITE_TIMESTAMP_FORMAT).to_string(),
            ended_at.format(SQLITE_TIMESTAMP_FORMAT).to_string(),
            format!("{} with chat", category),
            category,
            peak * 2 / 3,
            peak,
            audience.len() as i64,
            duration_min,
        ],
    )?;
    let stream_id = conn.last_insert_rowid();

    let mut messages = 0;
    for viewer_id in audience {
        let chatted: i64 = if rng.gen_bool(0.4) { rng.gen_range(1..6) } else { 0 };
        conn.execute(
            "INSERT INTO stream_viewers (stream_id, viewer_id, watch_minutes, chat_messages, first_time_chatter)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                stream_id,
                viewer_id,
                rng.gen_range(1..=duration_min),
                chatted,
                chatted > 0 && rng.gen_bool(0.15),
            ],
        )?;
        for _ in 0..chatted {
            let (text, sentiment, toxicity) = CHAT_LINES[rng.gen_range(0..CHAT_LINES.len())];
            let ts = started_at + Duration::minutes(rng.gen_range(0..duration_min));
            conn.execute(
                "INSERT INTO chat_messages (stream_id, viewer_id, ts, text, sentiment, toxicity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    stream_id,
                    viewer_id,
                    ts.format(SQLITE_TIMESTAMP_FORMAT).to_string(),
                    text,
                    sentiment,
                    toxicity,
                ],
            )?;
            messages += 1;
        }
    }
    Ok(messages)
}

fn pick<'a>(rng: &mut StdRng, values: &[&'a str]) -> &'a str {
    values[rng.gen_range(0..values.len())]
}
