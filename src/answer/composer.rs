//! Answer Composer
//!
//! Builds the structured payload and summary for a successful query, and is
//! the single place where any outcome (success or failure) becomes the one
//! `nl_queries` row written for a prompt.

use crate::ambiguity::Candidate;
use crate::answer::payload::{build_rows, AnswerColumn, AnswerError, AnswerPayload, NlqAnswer};
use crate::answer::summary::Summarizer;
use crate::db::QueryHistoryRepository;
use crate::error::{ErrorKind, NlqError, Result};
use crate::execution::{NewNlQuery, QueryResult};
use crate::intent::plan::QueryPlan;
use crate::semantic::{Catalog, TenantId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Ok,
    Ambiguous,
    Unresolved,
    Unsupported,
    Unsafe,
    Timeout,
    Error,
}

impl From<ErrorKind> for QueryStatus {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Ambiguous => QueryStatus::Ambiguous,
            ErrorKind::Unresolved => QueryStatus::Unresolved,
            ErrorKind::Unsupported => QueryStatus::Unsupported,
            ErrorKind::Unsafe => QueryStatus::Unsafe,
            ErrorKind::Timeout => QueryStatus::Timeout,
            ErrorKind::Error => QueryStatus::Error,
        }
    }
}

/// What the caller of `resolve_query` gets back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub request_id: Uuid,
    /// Id of the `nl_queries` row written for this prompt
    pub record_id: i64,
    pub status: QueryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_payload: Option<AnswerPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<Candidate>>,
    pub message: String,
}

/// A successfully executed query, ready to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Answered {
    /// Synthesized SQL, kept for audit
    pub sql: String,
    pub payload: AnswerPayload,
}

/// Who asked what, and when.
#[derive(Debug, Clone)]
pub struct AnswerRequest<'a> {
    pub request_id: Uuid,
    pub tenant: TenantId,
    pub prompt: &'a str,
    pub created_at: NaiveDateTime,
}

pub struct AnswerComposer {
    history: QueryHistoryRepository,
}

impl AnswerComposer {
    pub fn new(history: QueryHistoryRepository) -> Self {
        Self { history }
    }

    pub fn history(&self) -> &QueryHistoryRepository {
        &self.history
    }

    /// Structured payload and summary for executed rows.
    pub fn compose(catalog: &Catalog, plan: &QueryPlan, result: QueryResult) -> AnswerPayload {
        let rows = build_rows(&result.columns, result.rows);
        let summary = Summarizer::new(catalog, plan).summarize(&rows, result.truncated);
        AnswerPayload {
            rows,
            columns: result.columns.iter().map(AnswerColumn::from).collect(),
            truncated: result.truncated,
            summary,
        }
    }

    /// Persist exactly one record for the prompt and report the outcome.
    ///
    /// Errors only when the record itself cannot be written.
    pub async fn finish(
        &self,
        request: &AnswerRequest<'_>,
        outcome: std::result::Result<Answered, NlqError>,
    ) -> Result<QueryOutcome> {
        let (resolved_sql, answer) = match &outcome {
            Ok(answered) => (
                Some(answered.sql.clone()),
                NlqAnswer::Success(answered.payload.clone()),
            ),
            Err(err) => {
                let candidates = match err {
                    NlqError::IntentAmbiguous { candidates, .. } => Some(candidates.clone()),
                    _ => None,
                };
                (
                    None,
                    NlqAnswer::Failure(AnswerError {
                        error_kind: err.kind(),
                        message: err.user_message(),
                        candidates,
                    }),
                )
            }
        };

        let record_id = self
            .history
            .save_query(NewNlQuery {
                tenant: request.tenant,
                prompt: request.prompt.to_string(),
                resolved_sql,
                answer: serde_json::to_value(&answer)?,
                created_at: request.created_at,
            })
            .await?;

        let outcome = match answer {
            NlqAnswer::Success(payload) => QueryOutcome {
                request_id: request.request_id,
                record_id,
                status: QueryStatus::Ok,
                summary: Some(payload.summary.clone()),
                message: payload.summary.clone(),
                structured_payload: Some(payload),
                candidates: None,
            },
            NlqAnswer::Failure(error) => {
                warn!(kind = %error.error_kind, message = %error.message, "nl query not answered");
                QueryOutcome {
                    request_id: request.request_id,
                    record_id,
                    status: error.error_kind.into(),
                    structured_payload: None,
                    summary: None,
                    candidates: error.candidates,
                    message: error.message,
                }
            }
        };
        info!(record_id, status = ?outcome.status, "nl query recorded");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::OutputColumn;
    use crate::intent::plan::MetricRef;
    use crate::semantic::{builtin, Aggregation, SemanticType};
    use serde_json::json;

    #[test]
    fn test_compose_normalizes_and_summarizes() {
        let catalog = builtin::catalog().unwrap();
        let plan = QueryPlan::metrics(vec![MetricRef {
            name: "peak_viewers".to_string(),
            aggregation: Aggregation::Max,
        }]);
        let payload = AnswerComposer::compose(
            &catalog,
            &plan,
            QueryResult {
                columns: vec![OutputColumn::new("peak_viewers", SemanticType::Integer)],
                rows: vec![vec![json!(1200.0)]],
                truncated: false,
                execution_time_ms: 3,
                store: "sqlite".to_string(),
            },
        );
        assert_eq!(payload.rows[0]["peak_viewers"], json!(1200));
        assert_eq!(payload.summary, "Peak viewers was 1200.");
        assert!(!payload.truncated);
    }

    #[test]
    fn test_status_follows_error_kind() {
        assert_eq!(QueryStatus::from(ErrorKind::Unsafe), QueryStatus::Unsafe);
        assert_eq!(
            serde_json::to_value(QueryStatus::Timeout).unwrap(),
            json!("timeout")
        );
    }
}
