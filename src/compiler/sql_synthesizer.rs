//! SQL Synthesizer
//!
//! Turns a [`QueryPlan`] into one parameterized, tenant-scoped SELECT.
//!
//! Shape of every statement:
//!
//! ```text
//! SELECT <dims>, <period>, <metrics> | <list columns>
//! FROM <base> [INNER JOIN <parent> ON <child.fk> = <parent.pk>]...
//! WHERE <anchor>.user_id = :tenant [AND <time>] [AND <filters>]
//! [GROUP BY ...] [ORDER BY ...] LIMIT :row_limit
//! ```
//!
//! No user-supplied text is ever spliced into the SQL: literals travel as bound
//! parameters, identifiers come from the catalog. Output is a pure function of
//! (plan, catalog, tenant, dialect, guards).

use crate::compiler::dialect::SqlDialect;
use crate::compiler::join_planner::JoinPlanner;
use crate::compiler::params::{
    BoundParam, SqlValue, ROW_LIMIT_PARAM, TENANT_PARAM, TIME_END_PARAM, TIME_START_PARAM,
};
use crate::error::{NlqError, Result};
use crate::intent::plan::{Filter, FilterOp, FilterValue, OrderKey, QueryPlan, Subject};
use crate::security::QueryGuards;
use crate::semantic::{Aggregation, ColumnRef, ScopedCatalog, SemanticType};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Name and semantic type of one result column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputColumn {
    pub name: String,
    pub semantic_type: SemanticType,
}

impl OutputColumn {
    pub fn new(name: &str, semantic_type: SemanticType) -> Self {
        Self {
            name: name.to_string(),
            semantic_type,
        }
    }
}

/// Output column of a time-bucketed plan.
pub const PERIOD_COLUMN: &str = "period";

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedQuery {
    /// Single-line SQL with `:name` placeholders
    pub sql: String,
    pub params: Vec<BoundParam>,
    pub columns: Vec<OutputColumn>,
    pub base_table: String,
    pub dialect: SqlDialect,
}

impl SynthesizedQuery {
    pub fn param(&self, name: &str) -> Option<&SqlValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }
}

fn unsupported(message: impl Into<String>) -> NlqError {
    NlqError::PlanUnsupported(message.into())
}

pub struct SqlSynthesizer<'a> {
    catalog: &'a ScopedCatalog,
    dialect: SqlDialect,
    guards: &'a QueryGuards,
}

impl<'a> SqlSynthesizer<'a> {
    pub fn new(catalog: &'a ScopedCatalog, dialect: SqlDialect, guards: &'a QueryGuards) -> Self {
        Self {
            catalog,
            dialect,
            guards,
        }
    }

    pub fn synthesize(&self, plan: &QueryPlan) -> Result<SynthesizedQuery> {
        self.guards.validate_plan(plan)?;

        let base = plan
            .base_table(self.catalog)
            .ok_or_else(|| unsupported("the requested metrics do not share one table"))?;
        let table = self
            .catalog
            .table(&base)
            .filter(|_| self.catalog.is_queryable(&base))
            .ok_or_else(|| unsupported(format!("'{}' is not a queryable table", base)))?;
        let anchor = self
            .catalog
            .tenant_anchor(&base)
            .ok_or_else(|| unsupported(format!("'{}' cannot be scoped to a user", base)))?;

        let mut joins = JoinPlanner::new(self.catalog, &base);
        joins.require(&anchor.table)?;

        let mut params = vec![BoundParam::new(
            TENANT_PARAM,
            SqlValue::Int(self.catalog.tenant.0),
        )];
        let mut conditions = vec![format!("{} = :{}", anchor.qualified(), TENANT_PARAM)];
        let mut select = Vec::new();
        let mut columns = Vec::new();
        let mut group_by = Vec::new();
        let mut order_by = Vec::new();
        let mut dim_aliases = Vec::new();

        let needs_time = plan.time_range.is_some() || plan.time_grain.is_some();
        let time_column = match (&table.time_column, needs_time) {
            (Some(col), _) => Some(col.clone()),
            (None, true) => {
                return Err(unsupported(format!("'{}' has no time column", base)));
            }
            (None, false) => None,
        };

        match &plan.subject {
            Subject::Rows { .. } => {
                if !plan.dimensions.is_empty() || plan.time_grain.is_some() {
                    return Err(unsupported("a listing cannot be grouped"));
                }
                if table.list_columns.is_empty() {
                    return Err(unsupported(format!("'{}' cannot be listed", base)));
                }
                for name in &table.list_columns {
                    let column = self.column_type(&ColumnRef::new(&base, name))?;
                    select.push(format!("{}.{} AS {}", base, name, name));
                    columns.push(OutputColumn::new(name, column));
                }
            }
            Subject::Metrics { metrics } => {
                for name in &plan.dimensions {
                    let dim = self
                        .catalog
                        .dimension(name)
                        .ok_or_else(|| unsupported(format!("unknown dimension '{}'", name)))?;
                    joins.require(&dim.table)?;
                    for column in &dim.columns {
                        let col = ColumnRef::new(&dim.table, column);
                        let semantic_type = self.column_type(&col)?;
                        let alias = dim.alias_for(column);
                        select.push(format!("{} AS {}", col.qualified(), alias));
                        group_by.push(col.qualified());
                        columns.push(OutputColumn::new(&alias, semantic_type));
                        dim_aliases.push(alias);
                    }
                }

                if let (Some(grain), Some(time)) = (plan.time_grain, &time_column) {
                    let bucket = self.dialect.time_bucket(grain, &time.qualified());
                    select.push(format!("{} AS {}", bucket, PERIOD_COLUMN));
                    group_by.push(bucket);
                    columns.push(OutputColumn::new(PERIOD_COLUMN, SemanticType::Timestamp));
                }

                for metric in metrics {
                    let def = self
                        .catalog
                        .metric(&metric.name)
                        .ok_or_else(|| unsupported(format!("unknown metric '{}'", metric.name)))?;
                    if def.aggregation != metric.aggregation {
                        return Err(unsupported(format!(
                            "metric '{}' is defined as {}, not {}",
                            def.name,
                            def.aggregation.as_str(),
                            metric.aggregation.as_str()
                        )));
                    }
                    let semantic_type = match def.aggregation {
                        a if a.is_count() => SemanticType::Integer,
                        Aggregation::Avg => SemanticType::Float,
                        _ => self.column_type(&def.column_ref())?,
                    };
                    let mut expression = def.sql_expression();
                    if semantic_type == SemanticType::Integer {
                        expression = self.dialect.integer_aggregate(expression);
                    }
                    select.push(format!("{} AS {}", expression, def.name));
                    columns.push(OutputColumn::new(&def.name, semantic_type));
                }
            }
        }

        for (index, filter) in plan.filters.iter().enumerate() {
            joins.require(&filter.column.table)?;
            let name = format!("f{}", index);
            let (condition, value) = self.filter_condition(filter, &name)?;
            conditions.push(condition);
            params.push(BoundParam::new(&name, value));
        }

        if let Some(time) = &time_column {
            if let Some(range) = &plan.time_range {
                joins.require(&time.table)?;
                conditions.push(format!("{} >= :{}", time.qualified(), TIME_START_PARAM));
                conditions.push(format!("{} < :{}", time.qualified(), TIME_END_PARAM));
                params.insert(1, BoundParam::new(TIME_START_PARAM, SqlValue::Timestamp(range.start)));
                params.insert(2, BoundParam::new(TIME_END_PARAM, SqlValue::Timestamp(range.end)));
            } else if plan.time_grain.is_some() {
                joins.require(&time.table)?;
            }
        }

        match &plan.subject {
            Subject::Metrics { metrics } => {
                if let Some(order) = &plan.order {
                    match &order.key {
                        OrderKey::Metric(name) if metrics.iter().any(|m| &m.name == name) => {
                            order_by.push(format!("{} {}", name, order.direction.as_sql()));
                        }
                        OrderKey::Metric(name) => {
                            return Err(unsupported(format!(
                                "cannot order by '{}', which is not selected",
                                name
                            )));
                        }
                        OrderKey::Column(col) => {
                            return Err(unsupported(format!(
                                "cannot order an aggregate by the column {}",
                                col
                            )));
                        }
                    }
                }
                if plan.time_grain.is_some() {
                    order_by.push(format!("{} ASC", PERIOD_COLUMN));
                }
                order_by.extend(dim_aliases.iter().map(|alias| format!("{} ASC", alias)));
            }
            Subject::Rows { .. } => {
                let has_id = table.column("id").is_some();
                match &plan.order {
                    Some(order) => match &order.key {
                        OrderKey::Column(col) if col.table == base && table.column(&col.column).is_some() => {
                            order_by.push(format!("{} {}", col.qualified(), order.direction.as_sql()));
                            if has_id && col.column != "id" {
                                order_by.push(format!("{}.id ASC", base));
                            }
                        }
                        _ => {
                            return Err(unsupported(format!(
                                "a listing of '{}' can only be ordered by its own columns",
                                base
                            )));
                        }
                    },
                    None => {
                        if let Some(time) = &time_column {
                            joins.require(&time.table)?;
                            order_by.push(format!("{} DESC", time.qualified()));
                        }
                        if has_id {
                            order_by.push(format!("{}.id DESC", base));
                        }
                    }
                }
            }
        }

        let mut seen = BTreeSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(unsupported(format!("column '{}' would appear twice", column.name)));
            }
        }

        let fetch_limit = self.guards.fetch_limit();
        let row_limit = plan
            .limit
            .map(|limit| (limit as usize).min(fetch_limit))
            .unwrap_or(fetch_limit);
        params.push(BoundParam::new(ROW_LIMIT_PARAM, SqlValue::Int(row_limit as i64)));

        let mut sql = format!("SELECT {} FROM {}", select.join(", "), base);
        let rendered_joins = joins.render();
        if !rendered_joins.is_empty() {
            sql.push(' ');
            sql.push_str(&rendered_joins);
        }
        sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        if !group_by.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
        }
        if !order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", order_by.join(", ")));
        }
        sql.push_str(&format!(" LIMIT :{}", ROW_LIMIT_PARAM));

        debug!(base = %base, dialect = %self.dialect, sql = %sql, "synthesized query");

        Ok(SynthesizedQuery {
            sql,
            params,
            columns,
            base_table: base,
            dialect: self.dialect,
        })
    }

    fn column_type(&self, column: &ColumnRef) -> Result<SemanticType> {
        self.catalog
            .column(column)
            .map(|c| c.semantic_type)
            .ok_or_else(|| unsupported(format!("unknown column {}", column)))
    }

    fn filter_condition(&self, filter: &Filter, placeholder: &str) -> Result<(String, SqlValue)> {
        let semantic_type = self.column_type(&filter.column)?;
        let column = filter.column.qualified();
        let textual = matches!(semantic_type, SemanticType::Text | SemanticType::Category);
        let mismatch = || {
            unsupported(format!(
                "cannot compare {} ({}) {} {}",
                column,
                semantic_type.as_str(),
                filter.op.as_str(),
                filter.value
            ))
        };

        match (filter.op, &filter.value) {
            (FilterOp::Equals, FilterValue::Text(text)) if textual => Ok((
                format!("LOWER({}) = :{}", column, placeholder),
                SqlValue::Text(text.to_lowercase()),
            )),
            (FilterOp::Contains, FilterValue::Text(text)) if textual => Ok((
                format!("LOWER({}) LIKE :{} ESCAPE '{}'", column, placeholder, LIKE_ESCAPE),
                SqlValue::Text(format!("%{}%", escape_like(&text.to_lowercase()))),
            )),
            (FilterOp::Equals | FilterOp::Contains, _) if textual => Err(mismatch()),
            (FilterOp::Contains, _) => Err(mismatch()),
            (op, value) if semantic_type.is_numeric() => {
                let bound = match value {
                    FilterValue::Int(v) => SqlValue::Int(*v),
                    FilterValue::Float(v) => SqlValue::Float(*v),
                    FilterValue::Text(_) => return Err(mismatch()),
                };
                let operator = match op {
                    FilterOp::Equals => "=",
                    other => other.as_str(),
                };
                Ok((format!("{} {} :{}", column, operator, placeholder), bound))
            }
            _ => Err(mismatch()),
        }
    }
}

/// Escape character for substring filters.
const LIKE_ESCAPE: char = '!';

/// Make `%`, `_` and the escape character match themselves in a LIKE pattern.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_') || c == LIKE_ESCAPE {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::plan::{MetricRef, Ordering, SortDirection, TimeGrain, TimeRange};
    use crate::semantic::{builtin, TenantId};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn scoped(tenant: i64) -> ScopedCatalog {
        Arc::new(builtin::catalog().unwrap()).scoped(TenantId(tenant))
    }

    fn metric(name: &str, aggregation: Aggregation) -> MetricRef {
        MetricRef {
            name: name.to_string(),
            aggregation,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn synthesize(plan: &QueryPlan, dialect: SqlDialect) -> Result<SynthesizedQuery> {
        let catalog = scoped(7);
        let guards = QueryGuards::default();
        SqlSynthesizer::new(&catalog, dialect, &guards).synthesize(plan)
    }

    #[test]
    fn test_single_metric_on_one_day() {
        let mut plan = QueryPlan::metrics(vec![metric("peak_viewers", Aggregation::Max)]);
        plan.time_range = Some(TimeRange::days(day(13), day(14)));

        let query = synthesize(&plan, SqlDialect::Postgres).unwrap();
        assert_eq!(
            query.sql,
            "SELECT MAX(streams.peak_viewers) AS peak_viewers FROM streams \
             WHERE streams.user_id = :tenant AND streams.started_at >= :time_start \
             AND streams.started_at < :time_end LIMIT :row_limit"
        );
        assert_eq!(query.param(TENANT_PARAM), Some(&SqlValue::Int(7)));
        assert_eq!(
            query.param(TIME_START_PARAM),
            Some(&SqlValue::Timestamp(day(13).and_hms_opt(0, 0, 0).unwrap()))
        );
        assert_eq!(query.param(ROW_LIMIT_PARAM), Some(&SqlValue::Int(1001)));
        assert_eq!(query.columns, vec![OutputColumn::new("peak_viewers", SemanticType::Integer)]);
        assert_eq!(query.base_table, "streams");
    }

    #[test]
    fn test_child_table_is_scoped_through_its_parent() {
        let mut plan = QueryPlan::metrics(vec![metric("audience_size", Aggregation::CountDistinct)]);
        plan.dimensions = vec!["country".to_string()];
        plan.time_grain = Some(TimeGrain::Week);

        let query = synthesize(&plan, SqlDialect::Sqlite).unwrap();
        assert_eq!(
            query.sql,
            "SELECT viewers.country AS country, \
             date(streams.started_at, 'weekday 0', '-6 days') AS period, \
             COUNT(DISTINCT stream_viewers.viewer_id) AS audience_size \
             FROM stream_viewers \
             INNER JOIN streams ON stream_viewers.stream_id = streams.id \
             INNER JOIN viewers ON stream_viewers.viewer_id = viewers.id \
             WHERE streams.user_id = :tenant \
             GROUP BY viewers.country, date(streams.started_at, 'weekday 0', '-6 days') \
             ORDER BY period ASC, country ASC LIMIT :row_limit"
        );
        let names: Vec<&str> = query.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["country", "period", "audience_size"]);
    }

    #[test]
    fn test_output_is_deterministic() {
        let mut plan = QueryPlan::metrics(vec![
            metric("peak_viewers", Aggregation::Max),
            metric("avg_viewers", Aggregation::Avg),
        ]);
        plan.dimensions = vec!["category".to_string()];
        plan.time_range = Some(TimeRange::days(day(5), day(12)));
        let first = synthesize(&plan, SqlDialect::Postgres).unwrap();
        let second = synthesize(&plan, SqlDialect::Postgres).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_top_n_listing() {
        let mut plan = QueryPlan::rows("streams");
        plan.order = Some(Ordering {
            key: OrderKey::Column(ColumnRef::new("streams", "peak_viewers")),
            direction: SortDirection::Desc,
        });
        plan.limit = Some(5);

        let query = synthesize(&plan, SqlDialect::Postgres).unwrap();
        assert!(query.sql.starts_with("SELECT streams.started_at AS started_at, "));
        assert!(query
            .sql
            .ends_with("WHERE streams.user_id = :tenant ORDER BY streams.peak_viewers DESC, streams.id ASC LIMIT :row_limit"));
        assert_eq!(query.param(ROW_LIMIT_PARAM), Some(&SqlValue::Int(5)));
        assert_eq!(query.columns.len(), 8);
    }

    #[test]
    fn test_default_listing_order_is_newest_first() {
        let plan = QueryPlan::rows("chat_messages");
        let query = synthesize(&plan, SqlDialect::Sqlite).unwrap();
        assert!(query.sql.contains("INNER JOIN streams ON chat_messages.stream_id = streams.id"));
        assert!(query
            .sql
            .ends_with("ORDER BY chat_messages.ts DESC, chat_messages.id DESC LIMIT :row_limit"));
    }

    #[test]
    fn test_text_filters_are_bound_and_lowercased() {
        let mut plan = QueryPlan::metrics(vec![metric("stream_count", Aggregation::Count)]);
        plan.filters = vec![
            Filter {
                column: ColumnRef::new("streams", "category"),
                op: FilterOp::Equals,
                value: FilterValue::Text("Just Chatting".to_string()),
            },
            Filter {
                column: ColumnRef::new("streams", "title"),
                op: FilterOp::Contains,
                value: FilterValue::Text("Speedrun'; DROP TABLE streams".to_string()),
            },
        ];

        let query = synthesize(&plan, SqlDialect::Postgres).unwrap();
        assert!(query.sql.contains("LOWER(streams.category) = :f0"));
        assert!(query.sql.contains("LOWER(streams.title) LIKE :f1 ESCAPE '!'"));
        assert!(!query.sql.contains("DROP"));
        assert_eq!(query.param("f0"), Some(&SqlValue::Text("just chatting".to_string())));
        assert_eq!(
            query.param("f1"),
            Some(&SqlValue::Text("%speedrun'; drop table streams%".to_string()))
        );
    }

    #[test]
    fn test_substring_filter_matches_wildcards_literally() {
        let mut plan = QueryPlan::rows("streams");
        plan.filters = vec![Filter {
            column: ColumnRef::new("streams", "title"),
            op: FilterOp::Contains,
            value: FilterValue::Text("100%_Run!".to_string()),
        }];

        let query = synthesize(&plan, SqlDialect::Sqlite).unwrap();
        assert!(query.sql.contains("LOWER(streams.title) LIKE :f0 ESCAPE '!'"));
        assert_eq!(
            query.param("f0"),
            Some(&SqlValue::Text("%100!%!_run!!%".to_string()))
        );
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_numeric_filter_and_integer_sum() {
        let mut plan = QueryPlan::metrics(vec![metric("minutes_streamed", Aggregation::Sum)]);
        plan.filters = vec![Filter {
            column: ColumnRef::new("streams", "peak_viewers"),
            op: FilterOp::Gte,
            value: FilterValue::Int(100),
        }];
        let query = synthesize(&plan, SqlDialect::Postgres).unwrap();
        assert!(query
            .sql
            .starts_with("SELECT CAST(SUM(streams.stream_duration_min) AS BIGINT) AS minutes_streamed"));
        assert!(query.sql.contains("streams.peak_viewers >= :f0"));
        assert_eq!(query.param("f0"), Some(&SqlValue::Int(100)));
    }

    #[test]
    fn test_tenant_is_always_bound() {
        let catalog = scoped(42);
        let guards = QueryGuards::default();
        let synthesizer = SqlSynthesizer::new(&catalog, SqlDialect::Sqlite, &guards);
        for table in ["streams", "stream_viewers", "chat_messages", "nl_queries"] {
            let query = synthesizer.synthesize(&QueryPlan::rows(table)).unwrap();
            assert!(query.sql.contains("user_id = :tenant"), "{}", query.sql);
            assert_eq!(query.param(TENANT_PARAM), Some(&SqlValue::Int(42)));
        }
    }

    #[test]
    fn test_unsupported_plans() {
        let mixed = QueryPlan::metrics(vec![
            metric("avg_viewers", Aggregation::Avg),
            metric("avg_toxicity", Aggregation::Avg),
        ]);
        assert!(matches!(
            synthesize(&mixed, SqlDialect::Postgres),
            Err(NlqError::PlanUnsupported(_))
        ));

        let wrong_aggregation = QueryPlan::metrics(vec![metric("peak_viewers", Aggregation::Sum)]);
        assert!(matches!(
            synthesize(&wrong_aggregation, SqlDialect::Postgres),
            Err(NlqError::PlanUnsupported(_))
        ));

        let mut grouped_listing = QueryPlan::rows("streams");
        grouped_listing.dimensions = vec!["category".to_string()];
        assert!(matches!(
            synthesize(&grouped_listing, SqlDialect::Postgres),
            Err(NlqError::PlanUnsupported(_))
        ));

        let mut numeric_contains = QueryPlan::metrics(vec![metric("stream_count", Aggregation::Count)]);
        numeric_contains.filters = vec![Filter {
            column: ColumnRef::new("streams", "peak_viewers"),
            op: FilterOp::Contains,
            value: FilterValue::Text("12".to_string()),
        }];
        assert!(matches!(
            synthesize(&numeric_contains, SqlDialect::Postgres),
            Err(NlqError::PlanUnsupported(_))
        ));

        let mut fan_out = QueryPlan::metrics(vec![metric("peak_viewers", Aggregation::Max)]);
        fan_out.dimensions = vec!["country".to_string()];
        assert!(matches!(
            synthesize(&fan_out, SqlDialect::Postgres),
            Err(NlqError::PlanUnsupported(_))
        ));

        let mut too_wide = QueryPlan::metrics(vec![metric("audience_size", Aggregation::CountDistinct)]);
        too_wide.dimensions = vec![
            "country".to_string(),
            "device".to_string(),
            "age_bucket".to_string(),
            "category".to_string(),
        ];
        assert!(matches!(
            synthesize(&too_wide, SqlDialect::Postgres),
            Err(NlqError::PlanUnsupported(_))
        ));
    }

    #[test]
    fn test_limit_never_exceeds_fetch_limit() {
        let mut plan = QueryPlan::rows("streams");
        plan.limit = Some(50_000);
        let query = synthesize(&plan, SqlDialect::Postgres).unwrap();
        assert_eq!(query.param(ROW_LIMIT_PARAM), Some(&SqlValue::Int(1001)));
    }
}
