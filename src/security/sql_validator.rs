//! SQL Validator
//!
//! Last gate before the store. Re-checks the synthesized statement from scratch
//! instead of trusting the synthesizer: a token scan for anything that is not a
//! plain read, then an AST walk over the PostgreSQL parse of the positional form
//! for table access, join shape and tenant scoping. Only a [`ValidatedQuery`]
//! can reach [`crate::execution::AnalyticsStore::fetch_rows`], and this module
//! is the only place one is constructed.

use crate::compiler::params::{to_positional, BoundParam, SqlValue, TENANT_PARAM};
use crate::compiler::{OutputColumn, SqlDialect, SynthesizedQuery};
use crate::error::{NlqError, Result};
use crate::semantic::Catalog;
use sqlparser::ast::{
    BinaryOperator, Expr, JoinConstraint, JoinOperator, ObjectName, SetExpr, Statement, TableFactor,
    Value,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, error};

const FORBIDDEN_WORDS: [&str; 23] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE", "MERGE",
    "COPY", "VACUUM", "ATTACH", "DETACH", "PRAGMA", "CALL", "EXECUTE", "SET", "COMMIT", "INTO",
    "REPLACE", "WITH", "VALUES",
];

const ALLOWED_FUNCTIONS: [&str; 11] = [
    "COUNT", "SUM", "AVG", "MIN", "MAX", "LOWER", "DATE_TRUNC", "DATE", "STRFTIME", "CAST", "COALESCE",
];

/// Keywords that may precede `(` without being a function call.
const STRUCTURAL_WORDS: [&str; 12] = [
    "AND", "OR", "NOT", "ON", "WHERE", "AS", "BY", "WHEN", "THEN", "ELSE", "DISTINCT", "LIKE",
];

/// A statement that passed every check. Fields are private: the only way to
/// obtain one is [`SqlValidator::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    sql: String,
    params: Vec<BoundParam>,
    columns: Vec<OutputColumn>,
    base_table: String,
    dialect: SqlDialect,
    positional_sql: String,
    positional_params: Vec<BoundParam>,
}

impl ValidatedQuery {
    /// SQL with `:name` placeholders.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[BoundParam] {
        &self.params
    }

    pub fn columns(&self) -> &[OutputColumn] {
        &self.columns
    }

    pub fn base_table(&self) -> &str {
        &self.base_table
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// SQL with `$k` placeholders, paired with [`Self::positional_params`].
    pub fn positional_sql(&self) -> &str {
        &self.positional_sql
    }

    pub fn positional_params(&self) -> &[BoundParam] {
        &self.positional_params
    }
}

fn rejected(message: impl Into<String>) -> NlqError {
    NlqError::UnsafeQueryRejected(message.into())
}

pub struct SqlValidator<'a> {
    catalog: &'a Catalog,
}

impl<'a> SqlValidator<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn validate(&self, query: SynthesizedQuery) -> Result<ValidatedQuery> {
        match self.check(&query) {
            Ok((positional_sql, positional_params)) => {
                debug!(sql = %query.sql, "query passed validation");
                Ok(ValidatedQuery {
                    sql: query.sql,
                    params: query.params,
                    columns: query.columns,
                    base_table: query.base_table,
                    dialect: query.dialect,
                    positional_sql,
                    positional_params,
                })
            }
            Err(err) => {
                error!(sql = %query.sql, reason = %err, "rejected synthesized query");
                Err(err)
            }
        }
    }

    fn check(&self, query: &SynthesizedQuery) -> Result<(String, Vec<BoundParam>)> {
        let positional = to_positional(&query.sql, &query.params)?;
        scan_tokens(&positional.sql)?;

        let tenant_position = positional
            .params
            .iter()
            .position(|p| p.name == TENANT_PARAM && matches!(p.value, SqlValue::Int(_)))
            .map(|i| format!("${}", i + 1))
            .ok_or_else(|| rejected("no integer tenant parameter is bound"))?;

        let statements = Parser::parse_sql(&PostgreSqlDialect {}, &positional.sql)
            .map_err(|e| rejected(format!("statement does not parse: {}", e)))?;
        if statements.len() != 1 {
            return Err(rejected(format!("expected one statement, found {}", statements.len())));
        }
        let query_ast = match &statements[0] {
            Statement::Query(query) => query,
            _ => return Err(rejected("only SELECT statements are allowed")),
        };
        if query_ast.with.is_some() {
            return Err(rejected("common table expressions are not allowed"));
        }
        if query_ast.limit.is_none() {
            return Err(rejected("statement has no row limit"));
        }
        let select = match query_ast.body.as_ref() {
            SetExpr::Select(select) => select,
            _ => return Err(rejected("set operations and nested queries are not allowed")),
        };
        if select.into.is_some() {
            return Err(rejected("SELECT INTO is not allowed"));
        }
        if select.from.len() != 1 {
            return Err(rejected("exactly one FROM relation is required"));
        }

        let from = &select.from[0];
        let mut relations = BTreeSet::new();
        let base = self.relation_name(&from.relation)?;
        relations.insert(base.clone());

        let mut edges: Vec<(String, String)> = Vec::new();
        for join in &from.joins {
            let table = self.relation_name(&join.relation)?;
            if !relations.insert(table.clone()) {
                return Err(rejected(format!("table '{}' is joined twice", table)));
            }
            let condition = match &join.join_operator {
                JoinOperator::Inner(JoinConstraint::On(condition)) => condition,
                other => {
                    return Err(rejected(format!("only INNER JOIN ... ON is allowed, found {:?}", other)))
                }
            };
            let (left, right) = column_equality(condition)
                .ok_or_else(|| rejected(format!("join condition '{}' is not a key equality", condition)))?;
            if !self.is_foreign_key(&left, &right) {
                return Err(rejected(format!(
                    "join condition '{}' does not follow a foreign key",
                    condition
                )));
            }
            if left.0 != table && right.0 != table {
                return Err(rejected(format!("join condition '{}' does not involve '{}'", condition, table)));
            }
            edges.push((left.0, right.0));
        }

        let selection = select
            .selection
            .as_ref()
            .ok_or_else(|| rejected("statement has no WHERE clause"))?;
        let mut conjuncts = Vec::new();
        split_conjuncts(selection, &mut conjuncts);

        let mut scoped_relation = None;
        for conjunct in &conjuncts {
            if let Some(relation) = self.tenant_conjunct(conjunct, &tenant_position) {
                if relations.contains(&relation) {
                    scoped_relation = Some(relation);
                }
            }
            if let Some((left, right)) = column_equality(conjunct) {
                if !self.is_foreign_key(&left, &right) {
                    return Err(rejected(format!(
                        "column equality '{}' does not follow a foreign key",
                        conjunct
                    )));
                }
                edges.push((left.0, right.0));
            }
        }
        let scoped_relation =
            scoped_relation.ok_or_else(|| rejected("statement is not scoped to the requesting user"))?;

        let unreachable = unreachable_relations(&scoped_relation, &relations, &edges);
        if !unreachable.is_empty() {
            return Err(rejected(format!(
                "tables {:?} are not connected to the user-scoped table '{}'",
                unreachable, scoped_relation
            )));
        }

        let positional_params = positional.params.iter().map(|p| (*p).clone()).collect();
        Ok((positional.sql, positional_params))
    }

    fn relation_name(&self, factor: &TableFactor) -> Result<String> {
        let (name, alias) = match factor {
            TableFactor::Table { name, alias, .. } => (name, alias),
            _ => return Err(rejected("only plain tables may appear in FROM")),
        };
        if alias.is_some() {
            return Err(rejected("table aliases are not allowed"));
        }
        let table = single_part(name)?;
        if !self.catalog.is_queryable(&table) {
            return Err(rejected(format!("table '{}' is not queryable", table)));
        }
        Ok(table)
    }

    fn is_foreign_key(&self, left: &(String, String), right: &(String, String)) -> bool {
        self.catalog.is_foreign_key(&left.0, &left.1, &right.0, &right.1)
    }

    /// `<table>.<tenant column> = $k` with `$k` the tenant parameter.
    fn tenant_conjunct(&self, expr: &Expr, tenant_position: &str) -> Option<String> {
        let (left, right) = match expr {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => (left.as_ref(), right.as_ref()),
            _ => return None,
        };
        let (column, value) = match (qualified_column(left), qualified_column(right)) {
            (Some(column), None) => (column, right),
            (None, Some(column)) => (column, left),
            _ => return None,
        };
        match value {
            Expr::Value(Value::Placeholder(p)) if p == tenant_position => {}
            _ => return None,
        }
        if self.catalog.tenant_column(&column.0) == Some(column.1.as_str()) {
            Some(column.0)
        } else {
            None
        }
    }
}

/// Reject anything that is not a plain single SELECT at the token level.
fn scan_tokens(sql: &str) -> Result<()> {
    let tokens = Tokenizer::new(&PostgreSqlDialect {}, sql)
        .tokenize()
        .map_err(|e| rejected(format!("statement does not tokenize: {}", e)))?;

    let significant: Vec<&Token> = tokens
        .iter()
        .filter(|t| !matches!(t, Token::Whitespace(Whitespace::Space | Whitespace::Newline | Whitespace::Tab)))
        .collect();

    let mut selects = 0;
    for (i, token) in significant.iter().enumerate() {
        match token {
            Token::Whitespace(_) => return Err(rejected("comments are not allowed")),
            Token::SemiColon => return Err(rejected("statement separators are not allowed")),
            Token::Word(word) => {
                if word.quote_style.is_some() {
                    return Err(rejected(format!("quoted identifier \"{}\" is not allowed", word.value)));
                }
                let upper = word.value.to_uppercase();
                if FORBIDDEN_WORDS.contains(&upper.as_str()) {
                    return Err(rejected(format!("'{}' is not allowed", upper)));
                }
                if upper == "SELECT" {
                    selects += 1;
                }
                let is_call = matches!(significant.get(i + 1), Some(Token::LParen));
                if is_call
                    && !ALLOWED_FUNCTIONS.contains(&upper.as_str())
                    && !STRUCTURAL_WORDS.contains(&upper.as_str())
                {
                    return Err(rejected(format!("function '{}' is not allowed", word.value)));
                }
            }
            _ => {}
        }
    }
    if selects != 1 {
        return Err(rejected(format!("expected exactly one SELECT, found {}", selects)));
    }
    Ok(())
}

fn single_part(name: &ObjectName) -> Result<String> {
    match name.0.as_slice() {
        [ident] => Ok(ident.value.clone()),
        _ => Err(rejected(format!("qualified table name '{}' is not allowed", name))),
    }
}

fn qualified_column(expr: &Expr) -> Option<(String, String)> {
    match expr {
        Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
            Some((parts[0].value.clone(), parts[1].value.clone()))
        }
        Expr::Nested(inner) => qualified_column(inner),
        _ => None,
    }
}

/// `a.x = b.y` between two qualified columns.
fn column_equality(expr: &Expr) -> Option<((String, String), (String, String))> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => Some((qualified_column(left)?, qualified_column(right)?)),
        Expr::Nested(inner) => column_equality(inner),
        _ => None,
    }
}

fn split_conjuncts<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            split_conjuncts(left, out);
            split_conjuncts(right, out);
        }
        Expr::Nested(inner) => split_conjuncts(inner, out),
        other => out.push(other),
    }
}

fn unreachable_relations(
    start: &str,
    relations: &BTreeSet<String>,
    edges: &[(String, String)],
) -> Vec<String> {
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (a, b) in edges {
        adjacency.entry(a.as_str()).or_default().push(b.as_str());
        adjacency.entry(b.as_str()).or_default().push(a.as_str());
    }
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start]);
    seen.insert(start);
    while let Some(table) = queue.pop_front() {
        for next in adjacency.get(table).into_iter().flatten() {
            if seen.insert(*next) {
                queue.push_back(*next);
            }
        }
    }
    relations
        .iter()
        .filter(|r| !seen.contains(r.as_str()))
        .cloned()
        .collect()
}
