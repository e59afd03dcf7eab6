//! Bound parameters
//!
//! Synthesized SQL uses named `:name` placeholders. SQLite binds them by name;
//! PostgreSQL and the validator's parser need positional `$k`, produced by
//! [`to_positional`].

use crate::error::{NlqError, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

pub const TENANT_PARAM: &str = "tenant";
pub const TIME_START_PARAM: &str = "time_start";
pub const TIME_END_PARAM: &str = "time_end";
pub const ROW_LIMIT_PARAM: &str = "row_limit";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Int(v) => write!(f, "{}", v),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "'{}'", v),
            SqlValue::Timestamp(v) => write!(f, "'{}'", v.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundParam {
    pub name: String,
    pub value: SqlValue,
}

impl BoundParam {
    pub fn new(name: &str, value: SqlValue) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

/// Render parameters for logs: `tenant=1, time_start='2026-10-13 00:00:00'`.
pub fn describe_params(params: &[BoundParam]) -> String {
    params
        .iter()
        .map(|p| format!("{}={}", p.name, p.value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// SQL rewritten to `$1..$n` placeholders with the parameters in bind order.
#[derive(Debug, Clone)]
pub struct PositionalSql<'p> {
    pub sql: String,
    pub params: Vec<&'p BoundParam>,
}

impl PositionalSql<'_> {
    /// 1-based position of a named parameter.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name).map(|i| i + 1)
    }
}

/// Rewrite `:name` placeholders to `$k`. A name used twice keeps its number.
/// Quoted strings and `::` casts are left alone.
pub fn to_positional<'p>(sql: &str, params: &'p [BoundParam]) -> Result<PositionalSql<'p>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut order: Vec<&'p BoundParam> = Vec::new();
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            in_string = !in_string;
            out.push(c);
            i += 1;
            continue;
        }
        let prev_colon = i > 0 && chars[i - 1] == ':';
        let next = chars.get(i + 1).copied();
        let starts_name = next.map(|n| n.is_ascii_alphabetic() || n == '_').unwrap_or(false);
        if in_string || c != ':' || prev_colon || !starts_name {
            out.push(c);
            i += 1;
            continue;
        }

        let mut end = i + 1;
        while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
            end += 1;
        }
        let name: String = chars[i + 1..end].iter().collect();
        let param = params.iter().find(|p| p.name == name).ok_or_else(|| {
            NlqError::UnsafeQueryRejected(format!("placeholder :{} has no bound value", name))
        })?;
        let position = match order.iter().position(|p| p.name == name) {
            Some(existing) => existing + 1,
            None => {
                order.push(param);
                order.len()
            }
        };
        out.push_str(&format!("${}", position));
        i = end;
    }

    Ok(PositionalSql { sql: out, params: order })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_positional() {
        let params = vec![
            BoundParam::new("tenant", SqlValue::Int(7)),
            BoundParam::new("row_limit", SqlValue::Int(1001)),
            BoundParam::new("f0", SqlValue::Text("%gg%".to_string())),
        ];
        let positional = to_positional(
            "SELECT a FROM t WHERE t.user_id = :tenant AND LOWER(t.x) LIKE :f0 AND t.y = ':tenant' LIMIT :row_limit",
            &params,
        )
        .unwrap();
        assert_eq!(
            positional.sql,
            "SELECT a FROM t WHERE t.user_id = $1 AND LOWER(t.x) LIKE $2 AND t.y = ':tenant' LIMIT $3"
        );
        let names: Vec<&str> = positional.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["tenant", "f0", "row_limit"]);
        assert_eq!(positional.position_of("row_limit"), Some(3));
    }

    #[test]
    fn test_repeated_name_reuses_position_and_casts_survive() {
        let params = vec![BoundParam::new("tenant", SqlValue::Int(1))];
        let positional =
            to_positional("SELECT x::text FROM t WHERE a = :tenant OR b = :tenant", &params).unwrap();
        assert_eq!(positional.sql, "SELECT x::text FROM t WHERE a = $1 OR b = $1");
        assert_eq!(positional.params.len(), 1);
    }

    #[test]
    fn test_unknown_placeholder_is_rejected() {
        let err = to_positional("SELECT 1 WHERE a = :missing", &[]).unwrap_err();
        assert!(matches!(err, NlqError::UnsafeQueryRejected(_)));
    }
}
