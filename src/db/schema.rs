//! DDL for both supported stores.
//!
//! PostgreSQL keeps `answer` as JSONB; SQLite keeps it as TEXT and stores
//! timestamps as `YYYY-MM-DD HH:MM:SS` text so that they compare as strings.

pub const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const POSTGRES_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id SERIAL PRIMARY KEY,
        email VARCHAR(255) NOT NULL UNIQUE,
        created_at TIMESTAMP NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS twitch_connections (
        id SERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        access_token TEXT NOT NULL,
        refresh_token TEXT,
        expires_at TIMESTAMP,
        created_at TIMESTAMP NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS streams (
        id SERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        twitch_stream_id VARCHAR(64),
        started_at TIMESTAMP,
        ended_at TIMESTAMP,
        title TEXT,
        category VARCHAR(255),
        avg_viewers INTEGER,
        peak_viewers INTEGER,
        total_unique_viewers INTEGER,
        stream_duration_min INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS ix_streams_user_id ON streams (user_id)",
    "CREATE INDEX IF NOT EXISTS ix_streams_twitch_stream_id ON streams (twitch_stream_id)",
    "CREATE TABLE IF NOT EXISTS viewers (
        id SERIAL PRIMARY KEY,
        twitch_user_id VARCHAR(64),
        age_bucket VARCHAR(32),
        country VARCHAR(64),
        device VARCHAR(64)
    )",
    "CREATE INDEX IF NOT EXISTS ix_viewers_twitch_user_id ON viewers (twitch_user_id)",
    "CREATE TABLE IF NOT EXISTS stream_viewers (
        id SERIAL PRIMARY KEY,
        stream_id INTEGER NOT NULL REFERENCES streams(id) ON DELETE CASCADE,
        viewer_id INTEGER NOT NULL REFERENCES viewers(id) ON DELETE CASCADE,
        watch_minutes INTEGER,
        chat_messages INTEGER,
        first_time_chatter BOOLEAN NOT NULL DEFAULT FALSE
    )",
    "CREATE TABLE IF NOT EXISTS chat_messages (
        id SERIAL PRIMARY KEY,
        stream_id INTEGER NOT NULL REFERENCES streams(id) ON DELETE CASCADE,
        viewer_id INTEGER NOT NULL REFERENCES viewers(id) ON DELETE CASCADE,
        ts TIMESTAMP,
        text TEXT,
        sentiment DOUBLE PRECISION,
        toxicity DOUBLE PRECISION
    )",
    "CREATE INDEX IF NOT EXISTS ix_chat_messages_ts ON chat_messages (ts)",
    "CREATE TABLE IF NOT EXISTS nl_queries (
        id SERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        prompt TEXT NOT NULL,
        resolved_sql TEXT,
        answer JSONB,
        created_at TIMESTAMP NOT NULL DEFAULT NOW()
    )",
];

pub const SQLITE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE TABLE IF NOT EXISTS twitch_connections (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    access_token TEXT NOT NULL,
    refresh_token TEXT,
    expires_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE TABLE IF NOT EXISTS streams (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    twitch_stream_id TEXT,
    started_at TEXT,
    ended_at TEXT,
    title TEXT,
    category TEXT,
    avg_viewers INTEGER,
    peak_viewers INTEGER,
    total_unique_viewers INTEGER,
    stream_duration_min INTEGER
);
CREATE INDEX IF NOT EXISTS ix_streams_user_id ON streams (user_id);
CREATE INDEX IF NOT EXISTS ix_streams_twitch_stream_id ON streams (twitch_stream_id);
CREATE TABLE IF NOT EXISTS viewers (
    id INTEGER PRIMARY KEY,
    twitch_user_id TEXT,
    age_bucket TEXT,
    country TEXT,
    device TEXT
);
CREATE INDEX IF NOT EXISTS ix_viewers_twitch_user_id ON viewers (twitch_user_id);
CREATE TABLE IF NOT EXISTS stream_viewers (
    id INTEGER PRIMARY KEY,
    stream_id INTEGER NOT NULL REFERENCES streams(id) ON DELETE CASCADE,
    viewer_id INTEGER NOT NULL REFERENCES viewers(id) ON DELETE CASCADE,
    watch_minutes INTEGER,
    chat_messages INTEGER,
    first_time_chatter INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY,
    stream_id INTEGER NOT NULL REFERENCES streams(id) ON DELETE CASCADE,
    viewer_id INTEGER NOT NULL REFERENCES viewers(id) ON DELETE CASCADE,
    ts TEXT,
    text TEXT,
    sentiment REAL,
    toxicity REAL
);
CREATE INDEX IF NOT EXISTS ix_chat_messages_ts ON chat_messages (ts);
CREATE TABLE IF NOT EXISTS nl_queries (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    prompt TEXT NOT NULL,
    resolved_sql TEXT,
    answer TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";
