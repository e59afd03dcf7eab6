//! Deterministic narrative summaries
//!
//! Every number in a summary is read back out of the payload rows; labels come
//! from the catalog and the time phrase from the plan's range. Nothing here can
//! contradict the structured answer.

use crate::answer::payload::{parse_timestamp, AnswerRow};
use crate::compiler::sql_synthesizer::PERIOD_COLUMN;
use crate::intent::plan::{OrderKey, QueryPlan, SortDirection, Subject};
use crate::semantic::{Catalog, MetricDef};
use serde_json::Value;
use std::cmp::Ordering;

/// Render a cell for prose: integers as-is, floats to at most two decimals.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "no data".to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(v), _) => v.to_string(),
            (None, Some(f)) => {
                let rounded = format!("{:.2}", f);
                rounded.trim_end_matches('0').trim_end_matches('.').to_string()
            }
            _ => n.to_string(),
        },
        Value::String(s) => match parse_timestamp(s) {
            Some(ts) if ts.time() == chrono::NaiveTime::MIN => ts.date().to_string(),
            Some(ts) => ts.format("%Y-%m-%d %H:%M").to_string(),
            None => s.clone(),
        },
        Value::Bool(b) => if *b { "yes" } else { "no" }.to_string(),
        other => other.to_string(),
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

fn join_phrases(parts: &[String]) -> String {
    match parts {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

fn lower_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn upper_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub struct Summarizer<'a> {
    catalog: &'a Catalog,
    plan: &'a QueryPlan,
}

impl<'a> Summarizer<'a> {
    pub fn new(catalog: &'a Catalog, plan: &'a QueryPlan) -> Self {
        Self { catalog, plan }
    }

    pub fn summarize(&self, rows: &[AnswerRow], truncated: bool) -> String {
        let mut text = match &self.plan.subject {
            Subject::Rows { table } => self.listing(table, rows),
            Subject::Metrics { .. } => {
                let metrics = self.metric_defs();
                let has_dims = !self.plan.dimensions.is_empty();
                let has_grain = self.plan.time_grain.is_some();
                if rows.is_empty() {
                    format!("No data found{}.", self.when())
                } else if metrics.is_empty() {
                    format!("Found {} rows{}.", rows.len(), self.when())
                } else if !has_dims && !has_grain {
                    self.single(&metrics, &rows[0])
                } else if has_grain && !has_dims {
                    self.series(metrics[0], rows)
                } else if has_dims && !has_grain {
                    self.grouped(self.ranking_metric(&metrics), rows)
                } else {
                    format!(
                        "{} per {} by {}{}: {} rows.",
                        metrics[0].label,
                        self.grain_name(),
                        self.dimension_labels(),
                        self.when(),
                        rows.len()
                    )
                }
            }
        };
        if truncated {
            text.push_str(&format!(" Showing the first {} rows; more matched.", rows.len()));
        }
        text
    }

    fn when(&self) -> String {
        self.plan
            .time_range
            .as_ref()
            .map(|r| format!(" {}", r.label))
            .unwrap_or_default()
    }

    fn grain_name(&self) -> &'static str {
        self.plan.time_grain.map(|g| g.as_str()).unwrap_or("period")
    }

    fn metric_defs(&self) -> Vec<&'a MetricDef> {
        self.plan
            .metric_refs()
            .iter()
            .filter_map(|m| self.catalog.metric(&m.name))
            .collect()
    }

    fn ranking_metric(&self, metrics: &[&'a MetricDef]) -> &'a MetricDef {
        if let Some(order) = &self.plan.order {
            if let OrderKey::Metric(name) = &order.key {
                if let Some(def) = metrics.iter().find(|m| &m.name == name) {
                    return def;
                }
            }
        }
        metrics[0]
    }

    fn dimension_labels(&self) -> String {
        let labels: Vec<String> = self
            .plan
            .dimensions
            .iter()
            .map(|d| {
                self.catalog
                    .dimension(d)
                    .map(|def| def.label.to_lowercase())
                    .unwrap_or_else(|| d.clone())
            })
            .collect();
        join_phrases(&labels)
    }

    /// Values of the grouping columns of one row, e.g. "Speedrun" or "US / mobile".
    fn group_name(&self, row: &AnswerRow) -> String {
        let mut parts = Vec::new();
        for name in &self.plan.dimensions {
            if let Some(dim) = self.catalog.dimension(name) {
                for column in &dim.columns {
                    if let Some(value) = row.get(&dim.alias_for(column)) {
                        parts.push(format_value(value));
                    }
                }
            }
        }
        parts.join(" / ")
    }

    fn single(&self, metrics: &[&MetricDef], row: &AnswerRow) -> String {
        if let [metric] = metrics {
            let value = row.get(&metric.name).unwrap_or(&Value::Null);
            if metric.aggregation.is_count() {
                return format!(
                    "You had {} {}{}.",
                    format_value(value).replace("no data", "0"),
                    lower_first(&metric.label),
                    self.when()
                );
            }
            if value.is_null() {
                return format!("There is no {} data{}.", lower_first(&metric.label), self.when());
            }
            return format!("{} was {}{}.", metric.label, format_value(value), self.when());
        }

        let parts: Vec<String> = metrics
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let label = if i == 0 { m.label.clone() } else { lower_first(&m.label) };
                let value = row.get(&m.name).unwrap_or(&Value::Null);
                format!("{} was {}", label, format_value(value))
            })
            .collect();
        format!("{}{}.", join_phrases(&parts), self.when())
    }

    fn series(&self, metric: &MetricDef, rows: &[AnswerRow]) -> String {
        let grain = self.grain_name();
        let first = &rows[0];
        let last = &rows[rows.len() - 1];
        let period = |row: &AnswerRow| row.get(PERIOD_COLUMN).map(format_value).unwrap_or_default();
        let value = |row: &AnswerRow| row.get(&metric.name).cloned().unwrap_or(Value::Null);

        if rows.len() == 1 {
            return format!(
                "{} was {} for the {} of {}{}.",
                metric.label,
                format_value(&value(first)),
                grain,
                period(first),
                self.when()
            );
        }

        let trend = match (number(Some(&value(first))), number(Some(&value(last)))) {
            (Some(a), Some(b)) if b > a => "rose",
            (Some(a), Some(b)) if b < a => "fell",
            (Some(_), Some(_)) => "held steady",
            _ => "changed",
        };
        format!(
            "{} per {}{}: {} from {} ({}) to {} ({}) over {} {}s.",
            metric.label,
            grain,
            self.when(),
            trend,
            format_value(&value(first)),
            period(first),
            format_value(&value(last)),
            period(last),
            rows.len(),
            grain
        )
    }

    fn grouped(&self, metric: &MetricDef, rows: &[AnswerRow]) -> String {
        let value_of = |row: &AnswerRow| number(row.get(&metric.name));
        let by_value = |a: &&AnswerRow, b: &&AnswerRow| {
            value_of(a)
                .partial_cmp(&value_of(b))
                .unwrap_or(Ordering::Equal)
        };
        // First row wins ties, so the pick follows the query's own ordering.
        let highest = rows
            .iter()
            .rev()
            .max_by(by_value)
            .unwrap_or(&rows[0]);
        let lowest = rows.iter().min_by(by_value).unwrap_or(&rows[0]);
        let show = |row: &AnswerRow| {
            format!(
                "{} ({})",
                self.group_name(row),
                format_value(row.get(&metric.name).unwrap_or(&Value::Null))
            )
        };

        if rows.len() == 1 {
            let superlative = match self.plan.order.as_ref().map(|o| o.direction) {
                Some(SortDirection::Desc) => Some("highest"),
                Some(SortDirection::Asc) => Some("lowest"),
                None => None,
            };
            return match superlative {
                Some(word) => format!(
                    "{} had the {} {}: {}{}.",
                    self.group_name(&rows[0]),
                    word,
                    lower_first(&metric.label),
                    format_value(rows[0].get(&metric.name).unwrap_or(&Value::Null)),
                    self.when()
                ),
                None => format!(
                    "{} for {} was {}{}.",
                    metric.label,
                    self.group_name(&rows[0]),
                    format_value(rows[0].get(&metric.name).unwrap_or(&Value::Null)),
                    self.when()
                ),
            };
        }

        format!(
            "{} by {}{}: highest was {}, lowest was {} across {} groups.",
            metric.label,
            self.dimension_labels(),
            self.when(),
            show(highest),
            show(lowest),
            rows.len()
        )
    }

    fn listing(&self, table: &str, rows: &[AnswerRow]) -> String {
        let label = self
            .catalog
            .table(table)
            .map(|t| t.label.clone())
            .unwrap_or_else(|| table.to_string());
        if rows.is_empty() {
            return format!("No {} found{}.", label, self.when());
        }
        let mut text = format!("Found {} {}{}", rows.len(), label, self.when());
        if let Some(order) = &self.plan.order {
            if let OrderKey::Column(column) = &order.key {
                let key = column.column.replace('_', " ");
                let direction = match order.direction {
                    SortDirection::Desc => "highest",
                    SortDirection::Asc => "lowest",
                };
                let value = rows[0].get(&column.column).map(format_value);
                match value {
                    Some(v) => text.push_str(&format!(
                        ", ordered by {} ({} first: {})",
                        key, direction, v
                    )),
                    None => text.push_str(&format!(", ordered by {} ({} first)", key, direction)),
                }
            }
        }
        text.push('.');
        upper_first(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::plan::{MetricRef, Ordering as PlanOrdering, TimeGrain, TimeRange};
    use crate::semantic::{builtin, Aggregation, ColumnRef};
    use chrono::NaiveDate;
    use serde_json::json;

    fn row(value: Value) -> AnswerRow {
        value.as_object().cloned().unwrap()
    }

    fn metric_plan(name: &str, aggregation: Aggregation) -> QueryPlan {
        QueryPlan::metrics(vec![MetricRef {
            name: name.to_string(),
            aggregation,
        }])
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[test]
    fn test_single_value() {
        let catalog = builtin::catalog().unwrap();
        let mut plan = metric_plan("peak_viewers", Aggregation::Max);
        plan.time_range = Some(TimeRange::days(day(13), day(14)));
        let summary = Summarizer::new(&catalog, &plan)
            .summarize(&[row(json!({"peak_viewers": 1200}))], false);
        assert_eq!(summary, "Peak viewers was 1200 on 2026-10-13.");
    }

    #[test]
    fn test_counts_and_multiple_values() {
        let catalog = builtin::catalog().unwrap();
        let plan = metric_plan("first_time_chatters", Aggregation::CountTrue);
        let summary = Summarizer::new(&catalog, &plan)
            .summarize(&[row(json!({"first_time_chatters": 14}))], false);
        assert_eq!(summary, "You had 14 first-time chatters.");

        let plan = QueryPlan::metrics(vec![
            MetricRef {
                name: "peak_viewers".to_string(),
                aggregation: Aggregation::Max,
            },
            MetricRef {
                name: "avg_viewers".to_string(),
                aggregation: Aggregation::Avg,
            },
        ]);
        let summary = Summarizer::new(&catalog, &plan).summarize(
            &[row(json!({"peak_viewers": 1200, "avg_viewers": 812.456}))],
            false,
        );
        assert_eq!(summary, "Peak viewers was 1200 and average viewers was 812.46.");
    }

    #[test]
    fn test_time_series_trend() {
        let catalog = builtin::catalog().unwrap();
        let mut plan = metric_plan("avg_toxicity", Aggregation::Avg);
        plan.time_grain = Some(TimeGrain::Day);
        let rows = vec![
            row(json!({"period": "2026-10-05 00:00:00", "avg_toxicity": 0.1})),
            row(json!({"period": "2026-10-06 00:00:00", "avg_toxicity": 0.3})),
            row(json!({"period": "2026-10-07 00:00:00", "avg_toxicity": 0.25})),
        ];
        assert_eq!(
            Summarizer::new(&catalog, &plan).summarize(&rows, false),
            "Average chat toxicity per day: rose from 0.1 (2026-10-05) to 0.25 (2026-10-07) over 3 days."
        );
    }

    #[test]
    fn test_grouped_highest_and_lowest() {
        let catalog = builtin::catalog().unwrap();
        let mut plan = metric_plan("audience_size", Aggregation::CountDistinct);
        plan.dimensions = vec!["country".to_string()];
        let rows = vec![
            row(json!({"country": "DE", "audience_size": 40})),
            row(json!({"country": "US", "audience_size": 95})),
            row(json!({"country": "BR", "audience_size": 12})),
        ];
        assert_eq!(
            Summarizer::new(&catalog, &plan).summarize(&rows, false),
            "Distinct viewers by country: highest was US (95), lowest was BR (12) across 3 groups."
        );
    }

    #[test]
    fn test_top_one_group() {
        let catalog = builtin::catalog().unwrap();
        let mut plan = metric_plan("peak_viewers", Aggregation::Max);
        plan.dimensions = vec!["category".to_string()];
        plan.order = Some(PlanOrdering {
            key: OrderKey::Metric("peak_viewers".to_string()),
            direction: SortDirection::Desc,
        });
        plan.limit = Some(1);
        let rows = vec![row(json!({"category": "Speedrun", "peak_viewers": 1200}))];
        assert_eq!(
            Summarizer::new(&catalog, &plan).summarize(&rows, false),
            "Speedrun had the highest peak viewers: 1200."
        );
    }

    #[test]
    fn test_listing_and_truncation() {
        let catalog = builtin::catalog().unwrap();
        let mut plan = QueryPlan::rows("streams");
        plan.order = Some(PlanOrdering {
            key: OrderKey::Column(ColumnRef::new("streams", "peak_viewers")),
            direction: SortDirection::Desc,
        });
        let rows = vec![
            row(json!({"title": "a", "peak_viewers": 1200})),
            row(json!({"title": "b", "peak_viewers": 300})),
        ];
        assert_eq!(
            Summarizer::new(&catalog, &plan).summarize(&rows, true),
            "Found 2 streams, ordered by peak viewers (highest first: 1200). Showing the first 2 rows; more matched."
        );

        let empty = QueryPlan::rows("chat_messages");
        assert_eq!(
            Summarizer::new(&catalog, &empty).summarize(&[], false),
            "No chat messages found."
        );
    }
}
