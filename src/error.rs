use crate::ambiguity::Candidate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NlqError {
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Ambiguous intent: {message}")]
    IntentAmbiguous {
        message: String,
        candidates: Vec<Candidate>,
    },

    #[error("Unresolved intent: {0}")]
    IntentUnresolved(String),

    #[error("Unsupported plan: {0}")]
    PlanUnsupported(String),

    #[error("Unsafe query rejected: {0}")]
    UnsafeQueryRejected(String),

    #[error("Query timed out after {0:?}")]
    QueryTimeout(Duration),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classification persisted as `error_kind` and reported as the outcome status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Ambiguous,
    Unresolved,
    Unsupported,
    Unsafe,
    Timeout,
    Error,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Ambiguous => "ambiguous",
            ErrorKind::Unresolved => "unresolved",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Unsafe => "unsafe",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Error => "error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NlqError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NlqError::IntentAmbiguous { .. } => ErrorKind::Ambiguous,
            NlqError::IntentUnresolved(_) => ErrorKind::Unresolved,
            NlqError::PlanUnsupported(_) => ErrorKind::Unsupported,
            NlqError::UnsafeQueryRejected(_) => ErrorKind::Unsafe,
            NlqError::QueryTimeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Error,
        }
    }

    /// Message shown to the streamer and persisted in the answer document.
    /// Never carries SQL, parameters or driver text.
    pub fn user_message(&self) -> String {
        match self {
            NlqError::IntentAmbiguous { message, .. } => message.clone(),
            NlqError::IntentUnresolved(message) => message.clone(),
            NlqError::PlanUnsupported(message) => format!("That question isn't supported yet: {}", message),
            NlqError::UnsafeQueryRejected(_) => {
                "That question could not be answered safely.".to_string()
            }
            NlqError::QueryTimeout(limit) => format!(
                "The query took longer than {} ms. Try a narrower time range.",
                limit.as_millis()
            ),
            NlqError::ExecutionError(message) => format!("The query failed: {}.", message),
            NlqError::CatalogUnavailable(_) => "Analytics are not available right now.".to_string(),
            _ => "Something went wrong while answering that question.".to_string(),
        }
    }

    /// Whether the caller may retry or re-prompt. Only a missing catalog is fatal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, NlqError::CatalogUnavailable(_) | NlqError::Config(_))
    }
}

/// Failures raised inside a store implementation. The executor classifies them
/// into `NlqError` so that driver details never reach the end user.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("statement timed out")]
    Timeout,

    #[error("database error: {0}")]
    Database(String),

    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<StoreError> for NlqError {
    fn from(err: StoreError) -> Self {
        NlqError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NlqError>;
