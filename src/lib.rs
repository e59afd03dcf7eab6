//! streamlens: natural-language questions over a streamer's analytics data.
//!
//! A prompt is resolved against a semantic catalog into a [`QueryPlan`],
//! compiled to parameterized SQL, validated, executed read-only against
//! PostgreSQL or SQLite, and answered with rows plus a one-line summary.

pub mod ambiguity;
pub mod answer;
pub mod compiler;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod fuzzy_matcher;
pub mod intent;
pub mod query_engine;
pub mod security;
pub mod semantic;
pub mod time;

pub use answer::{AnswerPayload, QueryOutcome, QueryStatus};
pub use config::EngineConfig;
pub use error::{ErrorKind, NlqError, Result};
pub use intent::QueryPlan;
pub use query_engine::QueryEngine;
pub use semantic::{Catalog, CatalogHandle, TenantId};
