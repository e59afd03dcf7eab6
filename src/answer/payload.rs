//! Answer documents
//!
//! The JSON persisted in `nl_queries.answer` is one of two shapes:
//!
//! ```json
//! {"rows": [{"peak_viewers": 1200}], "columns": [{"name": "peak_viewers", "type": "integer"}],
//!  "truncated": false, "summary": "Peak viewers was 1200 on 2026-10-13."}
//! {"error_kind": "unresolved", "message": "..."}
//! ```

use crate::ambiguity::Candidate;
use crate::compiler::OutputColumn;
use crate::error::ErrorKind;
use crate::semantic::SemanticType;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type AnswerRow = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
}

impl From<&OutputColumn> for AnswerColumn {
    fn from(column: &OutputColumn) -> Self {
        Self {
            name: column.name.clone(),
            semantic_type: column.semantic_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub rows: Vec<AnswerRow>,
    pub columns: Vec<AnswerColumn>,
    pub truncated: bool,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerError {
    pub error_kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NlqAnswer {
    Success(AnswerPayload),
    Failure(AnswerError),
}

impl NlqAnswer {
    pub fn is_success(&self) -> bool {
        matches!(self, NlqAnswer::Success(_))
    }
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Coerce one cell to the JSON shape of its semantic type, so both stores
/// produce identical documents (SQLite booleans arrive as 0/1, its day buckets
/// as bare dates).
pub fn normalize_value(value: Value, semantic_type: SemanticType) -> Value {
    match (semantic_type, value) {
        (_, Value::Null) => Value::Null,
        (SemanticType::Boolean, Value::Number(n)) => Value::Bool(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
        (SemanticType::Boolean, Value::String(s)) => {
            Value::Bool(matches!(s.to_lowercase().as_str(), "t" | "true" | "1"))
        }
        (SemanticType::Integer, Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(v), _) => Value::from(v),
            (None, Some(f)) if f.fract() == 0.0 => Value::from(f as i64),
            _ => Value::Number(n),
        },
        (SemanticType::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(v) => Value::from(v),
            Err(_) => Value::String(s),
        },
        (SemanticType::Float, Value::Number(n)) => n
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        (SemanticType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(s)),
        (SemanticType::Timestamp, Value::String(s)) => match parse_timestamp(&s) {
            Some(ts) => Value::String(ts.format(TIMESTAMP_FORMAT).to_string()),
            None => Value::String(s),
        },
        (SemanticType::Text | SemanticType::Category, Value::Number(n)) => Value::String(n.to_string()),
        (_, other) => other,
    }
}

/// Timestamps as either store renders them.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Zip raw cells with their columns into JSON records.
pub fn build_rows(columns: &[OutputColumn], rows: Vec<Vec<Value>>) -> Vec<AnswerRow> {
    rows.into_iter()
        .map(|cells| {
            columns
                .iter()
                .zip(cells)
                .map(|(column, cell)| (column.name.clone(), normalize_value(cell, column.semantic_type)))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalization_by_type() {
        assert_eq!(normalize_value(json!(1), SemanticType::Boolean), json!(true));
        assert_eq!(normalize_value(json!(0), SemanticType::Boolean), json!(false));
        assert_eq!(normalize_value(json!(1200.0), SemanticType::Integer), json!(1200));
        assert_eq!(normalize_value(json!("42"), SemanticType::Integer), json!(42));
        assert_eq!(normalize_value(json!(3), SemanticType::Float), json!(3.0));
        assert_eq!(
            normalize_value(json!("2026-10-12"), SemanticType::Timestamp),
            json!("2026-10-12 00:00:00")
        );
        assert_eq!(normalize_value(Value::Null, SemanticType::Integer), Value::Null);
    }

    #[test]
    fn test_success_and_failure_shapes() {
        let success = NlqAnswer::Success(AnswerPayload {
            rows: build_rows(
                &[OutputColumn::new("peak_viewers", SemanticType::Integer)],
                vec![vec![json!(1200)]],
            ),
            columns: vec![AnswerColumn {
                name: "peak_viewers".to_string(),
                semantic_type: SemanticType::Integer,
            }],
            truncated: false,
            summary: "Peak viewers was 1200 on 2026-10-13.".to_string(),
        });
        let value = serde_json::to_value(&success).unwrap();
        assert_eq!(value["rows"], json!([{"peak_viewers": 1200}]));
        assert_eq!(value["columns"], json!([{"name": "peak_viewers", "type": "integer"}]));
        assert_eq!(value["truncated"], json!(false));
        assert_eq!(serde_json::from_value::<NlqAnswer>(value).unwrap(), success);

        let failure = NlqAnswer::Failure(AnswerError {
            error_kind: ErrorKind::Unresolved,
            message: "I couldn't tell what to measure.".to_string(),
            candidates: None,
        });
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            value,
            json!({"error_kind": "unresolved", "message": "I couldn't tell what to measure."})
        );
        assert!(!serde_json::from_value::<NlqAnswer>(value).unwrap().is_success());
    }
}
