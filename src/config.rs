//! Engine configuration
//!
//! Built once at process start (environment + `.env` + CLI overrides) and passed
//! by reference to the catalog loader, the store and the query engine.

use crate::compiler::SqlDialect;
use crate::error::{NlqError, Result};
use crate::security::QueryGuards;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "postgresql://postgres:postgres@db:5432/twitch_nlq";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub max_rows: usize,
    pub statement_timeout: Duration,
    pub max_dimensions: usize,
    pub catalog_path: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_rows: 1000,
            statement_timeout: Duration::from_millis(5000),
            max_dimensions: 3,
            catalog_path: None,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Read configuration from the process environment.
    ///
    /// Call `dotenv::dotenv()` beforehand to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL")
            .map(|url| normalize_database_url(&url))
            .unwrap_or(defaults.database_url);

        let max_rows = parse_var(&lookup, "NLQ_MAX_ROWS")?.unwrap_or(defaults.max_rows);
        if max_rows == 0 {
            return Err(NlqError::Config("NLQ_MAX_ROWS must be at least 1".to_string()));
        }

        let statement_timeout = parse_var::<u64, _>(&lookup, "NLQ_STATEMENT_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.statement_timeout);

        let max_dimensions =
            parse_var(&lookup, "NLQ_MAX_DIMENSIONS")?.unwrap_or(defaults.max_dimensions);

        Ok(Self {
            database_url,
            max_rows,
            statement_timeout,
            max_dimensions,
            catalog_path: lookup("NLQ_CATALOG_PATH").map(PathBuf::from),
            log_filter: lookup("NLQ_LOG").unwrap_or(defaults.log_filter),
        })
    }

    pub fn guards(&self) -> QueryGuards {
        QueryGuards {
            max_rows: self.max_rows,
            execution_timeout: self.statement_timeout,
            max_dimensions: self.max_dimensions,
        }
    }

    /// Which store backs `database_url`.
    pub fn dialect(&self) -> Result<SqlDialect> {
        let url = self.database_url.as_str();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(SqlDialect::Postgres)
        } else if url.starts_with("sqlite:") || url == ":memory:" {
            Ok(SqlDialect::Sqlite)
        } else {
            Err(NlqError::Config(format!(
                "unsupported DATABASE_URL scheme: {}",
                redact_url(url)
            )))
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| NlqError::Config(format!("invalid {}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}

/// Accept SQLAlchemy style URLs (`postgresql+psycopg2://...`) as plain
/// PostgreSQL URLs.
pub fn normalize_database_url(url: &str) -> String {
    let url = url.trim();
    match url.split_once("://") {
        Some((scheme, rest)) if scheme.starts_with("postgresql+") || scheme.starts_with("postgres+") => {
            format!("postgresql://{}", rest)
        }
        _ => url.to_string(),
    }
}

/// Strip credentials before a URL ends up in a log line or error message.
pub fn redact_url(url: &str) -> String {
    match (url.split_once("://"), url.rfind('@')) {
        (Some((scheme, _)), Some(at)) => format!("{}://***{}", scheme, &url[at..]),
        _ => url.to_string(),
    }
}
