//! Intent Resolver
//!
//! Grounds a prompt against the catalog and produces a [`QueryPlan`]. Grounding
//! is deterministic keyword/synonym matching over normalized tokens, in passes:
//!
//! 1. mutation verbs (rejected outright) and quoted literals
//! 2. time phrases
//! 3. literal filters ("category \"Just Chatting\"")
//! 4. numeric comparisons ("more than 500 peak viewers")
//! 5. time grain cues ("daily", "trend")
//! 6. dimensions ("by country")
//! 7. metrics (longest synonym wins, then typo-tolerant single words)
//! 8. counting cues + entity nouns ("how many streams")
//! 9. ordering cues ("top 5", "lowest")
//! 10. entity nouns ("chat messages")
//!
//! Each pass claims the tokens it grounds, so later passes never reinterpret
//! them. No I/O happens here.

use crate::ambiguity::AmbiguityResolver;
use crate::error::{NlqError, Result};
use crate::fuzzy_matcher::FuzzyMatcher;
use crate::intent::plan::{
    Filter, FilterOp, FilterValue, MetricRef, OrderKey, Ordering, QueryPlan, SortDirection,
    TimeGrain, TimeRange,
};
use crate::intent::tokens::{extract_literals, normalize, phrase_stems, PromptTokens};
use crate::semantic::{Aggregation, Catalog, ColumnRef, ScopedCatalog, SemanticType};
use crate::time::TimeResolver;
use chrono::NaiveDateTime;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use tracing::debug;

const MUTATION_VERBS: [&str; 17] = [
    "delete", "drop", "remove", "update", "insert", "truncate", "alter", "wipe", "erase",
    "modify", "create", "rename", "grant", "revoke", "purge", "destroy", "overwrite",
];

const FILLERS: [&str; 16] = [
    "is", "was", "were", "are", "equal", "equals", "to", "the", "a", "an", "of", "in", "as",
    "with", "had", "has",
];

const COUNT_CUES: [&str; 5] = ["how many", "number of", "count of", "total number of", "count"];

const GRAIN_CUES: [(&str, TimeGrain); 16] = [
    ("daily", TimeGrain::Day),
    ("per day", TimeGrain::Day),
    ("by day", TimeGrain::Day),
    ("each day", TimeGrain::Day),
    ("every day", TimeGrain::Day),
    ("day by day", TimeGrain::Day),
    ("weekly", TimeGrain::Week),
    ("per week", TimeGrain::Week),
    ("by week", TimeGrain::Week),
    ("each week", TimeGrain::Week),
    ("week by week", TimeGrain::Week),
    ("monthly", TimeGrain::Month),
    ("per month", TimeGrain::Month),
    ("by month", TimeGrain::Month),
    ("each month", TimeGrain::Month),
    ("month by month", TimeGrain::Month),
];

/// Cues asking for a series without naming a grain; daily buckets.
const TREND_CUES: [&str; 5] = ["trend", "trending", "over time", "time series", "evolution"];

const COMPARATORS: [(&str, FilterOp); 12] = [
    ("more than", FilterOp::Gt),
    ("greater than", FilterOp::Gt),
    ("over", FilterOp::Gt),
    ("above", FilterOp::Gt),
    ("at least", FilterOp::Gte),
    ("fewer than", FilterOp::Lt),
    ("less than", FilterOp::Lt),
    ("under", FilterOp::Lt),
    ("below", FilterOp::Lt),
    ("at most", FilterOp::Lte),
    ("no more than", FilterOp::Lte),
    ("no less than", FilterOp::Gte),
];

const RANKED_ORDER: [(&str, SortDirection); 2] =
    [("top", SortDirection::Desc), ("bottom", SortDirection::Asc)];

const SUPERLATIVES: [(&str, SortDirection); 11] = [
    ("best", SortDirection::Desc),
    ("highest", SortDirection::Desc),
    ("biggest", SortDirection::Desc),
    ("largest", SortDirection::Desc),
    ("most", SortDirection::Desc),
    ("worst", SortDirection::Asc),
    ("lowest", SortDirection::Asc),
    ("smallest", SortDirection::Asc),
    ("least", SortDirection::Asc),
    ("fewest", SortDirection::Asc),
    ("quietest", SortDirection::Asc),
];

const DEFAULT_TOP_N: u32 = 10;

/// Stemmed phrase → the catalog items it names, in catalog order.
type PhraseTable<T> = BTreeMap<Vec<String>, Vec<T>>;

fn add_phrase<T: PartialEq>(table: &mut PhraseTable<T>, phrase: &str, item: T) {
    let stems = phrase_stems(phrase);
    if stems.is_empty() {
        return;
    }
    let items = table.entry(stems).or_default();
    if !items.contains(&item) {
        items.push(item);
    }
}

fn cue_table<T: Clone + PartialEq>(cues: &[(&str, T)]) -> PhraseTable<T> {
    let mut table = PhraseTable::new();
    for (phrase, value) in cues {
        add_phrase(&mut table, phrase, value.clone());
    }
    table
}

fn word_table(words: &[&str]) -> PhraseTable<()> {
    let mut table = PhraseTable::new();
    for word in words {
        add_phrase(&mut table, word, ());
    }
    table
}

/// A grounded span of the prompt.
#[derive(Debug, Clone)]
struct Grounded<T> {
    span: Range<usize>,
    items: Vec<T>,
}

/// Claim every free occurrence of every phrase, longest first.
fn claim_all<T: Clone>(tokens: &mut PromptTokens, phrases: &PhraseTable<T>) -> Vec<Grounded<T>> {
    let mut found: Vec<(Range<usize>, &Vec<T>)> = Vec::new();
    for (phrase, items) in phrases {
        for start in tokens.find_all(phrase) {
            found.push((start..start + phrase.len(), items));
        }
    }
    found.sort_by(|a, b| {
        b.0.len()
            .cmp(&a.0.len())
            .then(a.0.start.cmp(&b.0.start))
    });

    let mut claimed = Vec::new();
    for (span, items) in found {
        if tokens.is_free(&span) {
            tokens.consume(span.clone());
            claimed.push(Grounded {
                span,
                items: items.clone(),
            });
        }
    }
    claimed.sort_by_key(|g| g.span.start);
    claimed
}

/// Longest free phrase starting exactly at `start`.
fn phrase_at<'t, T>(
    tokens: &PromptTokens,
    phrases: &'t PhraseTable<T>,
    start: usize,
) -> Option<(Range<usize>, &'t Vec<T>)> {
    phrases
        .iter()
        .filter(|(phrase, _)| tokens.matches_at(start, phrase))
        .max_by_key(|(phrase, _)| phrase.len())
        .map(|(phrase, items)| (start..start + phrase.len(), items))
}

/// Longest free phrase ending exactly before `end`.
fn phrase_before<'t, T>(
    tokens: &PromptTokens,
    phrases: &'t PhraseTable<T>,
    end: usize,
) -> Option<(Range<usize>, &'t Vec<T>)> {
    phrases
        .iter()
        .filter(|(phrase, _)| phrase.len() <= end && tokens.matches_at(end - phrase.len(), phrase))
        .max_by_key(|(phrase, _)| phrase.len())
        .map(|(phrase, items)| (end - phrase.len()..end, items))
}

/// Skip free filler words backwards from `end`.
fn skip_fillers_back(tokens: &PromptTokens, mut end: usize) -> usize {
    while end > 0 && !tokens.is_consumed(end - 1) && FILLERS.contains(&tokens.words[end - 1].as_str()) {
        end -= 1;
    }
    end
}

fn skip_fillers_forward(tokens: &PromptTokens, mut start: usize) -> usize {
    while start < tokens.len()
        && !tokens.is_consumed(start)
        && FILLERS.contains(&tokens.words[start].as_str())
    {
        start += 1;
    }
    start
}

/// Filter whose column is picked per interpretation: the first candidate column
/// reachable from the plan's base table.
#[derive(Debug, Clone)]
struct PendingFilter {
    columns: Vec<ColumnRef>,
    op: FilterOp,
    value: RawValue,
}

#[derive(Debug, Clone)]
enum RawValue {
    Text(String),
    Number(f64),
}

#[derive(Debug, Clone, Copy)]
struct OrderCue {
    direction: SortDirection,
    limit: Option<u32>,
}

/// Everything grounded from one prompt, before interpretations are built.
#[derive(Debug, Default)]
struct Grounding {
    time_range: Option<TimeRange>,
    filters: Vec<PendingFilter>,
    grain: Option<TimeGrain>,
    dimensions: Vec<String>,
    metric_spans: Vec<Grounded<String>>,
    order: Option<OrderCue>,
    entities: Vec<String>,
}

impl Grounding {
    fn is_empty(&self) -> bool {
        self.metric_spans.is_empty()
            && self.entities.is_empty()
            && self.dimensions.is_empty()
            && self.filters.is_empty()
    }
}

/// Catalog vocabulary, precomputed per resolver.
struct Vocabulary {
    metrics: PhraseTable<String>,
    single_word_metrics: Vec<String>,
    dimensions: PhraseTable<String>,
    nouns: PhraseTable<String>,
    label_columns: PhraseTable<ColumnRef>,
    numeric_columns: PhraseTable<ColumnRef>,
    known_words: BTreeSet<String>,
}

impl Vocabulary {
    fn build(catalog: &Catalog) -> Self {
        let mut metrics = PhraseTable::new();
        for metric in catalog.metrics() {
            add_phrase(&mut metrics, &metric.name.replace('_', " "), metric.name.clone());
            for synonym in &metric.synonyms {
                add_phrase(&mut metrics, synonym, metric.name.clone());
            }
        }
        let single_word_metrics = metrics
            .keys()
            .filter(|phrase| phrase.len() == 1)
            .map(|phrase| phrase[0].clone())
            .collect();

        let mut dimensions = PhraseTable::new();
        for dimension in catalog.dimensions() {
            for synonym in &dimension.synonyms {
                add_phrase(&mut dimensions, synonym, dimension.name.clone());
            }
        }

        let mut nouns = PhraseTable::new();
        let mut label_columns = PhraseTable::new();
        let mut numeric_columns = PhraseTable::new();
        for table in catalog.tables() {
            for noun in &table.nouns {
                add_phrase(&mut nouns, noun, table.name.clone());
            }
            for column in &table.columns {
                let target = match column.semantic_type {
                    SemanticType::Text | SemanticType::Category => &mut label_columns,
                    SemanticType::Integer | SemanticType::Float => &mut numeric_columns,
                    _ => continue,
                };
                for synonym in &column.synonyms {
                    add_phrase(target, synonym, ColumnRef::new(&table.name, &column.name));
                }
            }
        }

        let mut known_words = BTreeSet::new();
        for table in [&dimensions, &nouns] {
            known_words.extend(table.keys().flatten().cloned());
        }
        known_words.extend(label_columns.keys().flatten().cloned());
        known_words.extend(numeric_columns.keys().flatten().cloned());

        Self {
            metrics,
            single_word_metrics,
            dimensions,
            nouns,
            label_columns,
            numeric_columns,
            known_words,
        }
    }
}

pub struct IntentResolver<'a> {
    catalog: &'a ScopedCatalog,
    now: NaiveDateTime,
    matcher: FuzzyMatcher,
    vocabulary: Vocabulary,
}

impl<'a> IntentResolver<'a> {
    pub fn new(catalog: &'a ScopedCatalog, now: NaiveDateTime) -> Self {
        Self {
            catalog,
            now,
            matcher: FuzzyMatcher::default(),
            vocabulary: Vocabulary::build(catalog),
        }
    }

    /// Resolve a prompt into exactly one plan.
    ///
    /// Fails with `IntentUnresolved` when nothing in the catalog is named (or the
    /// prompt asks for a mutation), and with `IntentAmbiguous` when more than one
    /// reading survives.
    pub fn resolve(&self, prompt: &str) -> Result<QueryPlan> {
        let (text, literals) = extract_literals(prompt);
        let mut tokens = PromptTokens::new(&normalize(&text));
        if tokens.is_empty() {
            return Err(NlqError::IntentUnresolved("empty prompt".to_string()));
        }

        if let Some(verb) = tokens
            .words
            .iter()
            .find(|w| MUTATION_VERBS.contains(&w.as_str()))
        {
            return Err(NlqError::IntentUnresolved(format!(
                "'{}' asks to change data; only read-only questions are answered",
                verb
            )));
        }

        let mut grounding = Grounding {
            time_range: self.ground_time(&mut tokens),
            ..Grounding::default()
        };
        grounding.filters = self.ground_literals(&mut tokens, &literals)?;
        grounding.filters.extend(self.ground_comparisons(&mut tokens)?);
        grounding.grain = self.ground_grain(&mut tokens);
        grounding.dimensions = claim_all(&mut tokens, &self.vocabulary.dimensions)
            .into_iter()
            .flat_map(|g| g.items)
            .unique()
            .collect();
        grounding.metric_spans = self.ground_metrics(&mut tokens);
        grounding.metric_spans.extend(self.ground_counts(&mut tokens));
        grounding.metric_spans.sort_by_key(|g| g.span.start);
        grounding.order = self.ground_order(&mut tokens);
        grounding.entities = claim_all(&mut tokens, &self.vocabulary.nouns)
            .into_iter()
            .flat_map(|g| g.items)
            .unique()
            .collect();

        debug!(?grounding, "Prompt grounded");

        if grounding.is_empty() {
            return Err(NlqError::IntentUnresolved(
                "no metric, entity or dimension in the prompt matches the catalog".to_string(),
            ));
        }

        let plans = self.interpretations(&grounding);
        let ambiguity = AmbiguityResolver::new(self.catalog);
        let mut plans = ambiguity.narrow(plans);

        let zero_metrics = grounding.metric_spans.is_empty() && grounding.entities.is_empty();
        if plans.len() == 1 && !zero_metrics {
            return Ok(plans.remove(0));
        }
        if plans.is_empty() {
            return Err(NlqError::IntentUnresolved(
                "nothing in the catalog answers the prompt".to_string(),
            ));
        }
        Err(ambiguity.ambiguous(&plans))
    }

    fn ground_time(&self, tokens: &mut PromptTokens) -> Option<TimeRange> {
        let found = TimeResolver::new(self.now).find(tokens.text())?;
        let span = tokens.token_range(found.start, found.end);
        tokens.consume(span);
        Some(found.range)
    }

    /// Attach each quoted literal to the label column named right before it.
    fn ground_literals(
        &self,
        tokens: &mut PromptTokens,
        literals: &[String],
    ) -> Result<Vec<PendingFilter>> {
        let mut filters = Vec::new();
        for index in 0..tokens.len() {
            let literal = match tokens.literal_at(index).and_then(|i| literals.get(i)) {
                Some(literal) => literal.clone(),
                None => continue,
            };
            let end = skip_fillers_back(tokens, index);
            let (span, columns) = phrase_before(tokens, &self.vocabulary.label_columns, end)
                .map(|(span, columns)| (span, columns.clone()))
                .ok_or_else(|| {
                    NlqError::IntentUnresolved(format!(
                        "couldn't tell what \"{}\" refers to",
                        literal
                    ))
                })?;
            tokens.consume(span.start..index + 1);

            let is_category = columns
                .first()
                .and_then(|c| self.catalog.column(c))
                .map(|c| c.semantic_type == SemanticType::Category)
                .unwrap_or(false);
            filters.push(PendingFilter {
                columns,
                op: if is_category {
                    FilterOp::Equals
                } else {
                    FilterOp::Contains
                },
                value: RawValue::Text(literal),
            });
        }
        Ok(filters)
    }

    /// "<comparator> <number> <column>" or "<column> <comparator> <number>".
    fn ground_comparisons(&self, tokens: &mut PromptTokens) -> Result<Vec<PendingFilter>> {
        let comparators = cue_table(&COMPARATORS);
        let mut filters = Vec::new();

        let mut index = 0;
        while index < tokens.len() {
            let (cue_span, ops) = match phrase_at(tokens, &comparators, index) {
                Some(found) => found,
                None => {
                    index += 1;
                    continue;
                }
            };
            let number_at = cue_span.end;
            let word = tokens.words.get(number_at).filter(|_| !tokens.is_consumed(number_at));
            let number = match word.and_then(|w| w.parse::<f64>().ok().map(|n| (w, n))) {
                Some((_, n)) if n.is_finite() => n,
                Some((w, _)) => {
                    return Err(NlqError::IntentUnresolved(format!(
                        "'{}' is not a number that can be compared against",
                        w
                    )))
                }
                None => {
                    index += 1;
                    continue;
                }
            };

            let after = skip_fillers_forward(tokens, number_at + 1);
            let column = phrase_at(tokens, &self.vocabulary.numeric_columns, after)
                .map(|(span, cols)| (span, cols.clone()))
                .or_else(|| {
                    let end = skip_fillers_back(tokens, cue_span.start);
                    phrase_before(tokens, &self.vocabulary.numeric_columns, end)
                        .map(|(span, cols)| (span, cols.clone()))
                });

            match column {
                Some((column_span, columns)) => {
                    let start = column_span.start.min(cue_span.start);
                    let end = column_span.end.max(number_at + 1);
                    tokens.consume(start..end);
                    filters.push(PendingFilter {
                        columns,
                        op: ops[0],
                        value: RawValue::Number(number),
                    });
                    index = end;
                }
                None => index += 1,
            }
        }
        Ok(filters)
    }

    fn ground_grain(&self, tokens: &mut PromptTokens) -> Option<TimeGrain> {
        let explicit = claim_all(tokens, &cue_table(&GRAIN_CUES));
        let trend = claim_all(tokens, &word_table(&TREND_CUES));
        explicit
            .first()
            .map(|g| g.items[0])
            .or_else(|| trend.first().map(|_| TimeGrain::Day))
    }

    fn ground_metrics(&self, tokens: &mut PromptTokens) -> Vec<Grounded<String>> {
        let mut spans = claim_all(tokens, &self.vocabulary.metrics);

        // Typo tolerance for single words nothing else recognizes.
        for index in tokens.free_indices() {
            let word = tokens.stem_at(index).to_string();
            if word.parse::<f64>().is_ok() || self.vocabulary.known_words.contains(&word) {
                continue;
            }
            let candidates = self.vocabulary.single_word_metrics.iter().map(|s| s.as_str());
            if let Some((phrase, score)) = self.matcher.find_best_match(&word, candidates) {
                if let Some(items) = self.vocabulary.metrics.get(&vec![phrase.to_string()]) {
                    debug!(word = %word, matched = phrase, score, "Fuzzy metric match");
                    tokens.consume(index..index + 1);
                    spans.push(Grounded {
                        span: index..index + 1,
                        items: items.clone(),
                    });
                }
            }
        }
        spans
    }

    /// "how many <noun>" → that table's count metric.
    fn ground_counts(&self, tokens: &mut PromptTokens) -> Vec<Grounded<String>> {
        let cues = claim_all(tokens, &word_table(&COUNT_CUES));
        let mut spans = Vec::new();
        for cue in cues {
            let limit = (cue.span.end + 4).min(tokens.len());
            for start in cue.span.end..limit {
                let found = phrase_at(tokens, &self.vocabulary.nouns, start)
                    .map(|(span, tables)| (span, tables.clone()));
                if let Some((span, tables)) = found {
                    let metrics: Vec<String> = tables
                        .iter()
                        .filter_map(|t| self.catalog.table(t)?.count_metric.clone())
                        .collect();
                    if !metrics.is_empty() {
                        tokens.consume(span.clone());
                        spans.push(Grounded {
                            span,
                            items: metrics,
                        });
                    }
                    break;
                }
            }
        }
        spans
    }

    fn ground_order(&self, tokens: &mut PromptTokens) -> Option<OrderCue> {
        let ranked = cue_table(&RANKED_ORDER);
        let superlatives = cue_table(&SUPERLATIVES);

        for index in tokens.free_indices() {
            let number_after = |tokens: &PromptTokens| -> Option<u32> {
                if tokens.is_consumed(index + 1) {
                    return None;
                }
                tokens.words.get(index + 1)?.parse().ok()
            };

            if let Some((span, dirs)) = phrase_at(tokens, &ranked, index) {
                let direction = dirs[0];
                let n = number_after(tokens);
                let end = if n.is_some() { span.end + 1 } else { span.end };
                tokens.consume(span.start..end);
                return Some(OrderCue {
                    direction,
                    limit: Some(n.unwrap_or(DEFAULT_TOP_N)),
                });
            }
            if let Some((span, dirs)) = phrase_at(tokens, &superlatives, index) {
                let direction = dirs[0];
                let n = number_after(tokens);
                let end = if n.is_some() { span.end + 1 } else { span.end };
                tokens.consume(span.start..end);
                return Some(OrderCue {
                    direction,
                    limit: n,
                });
            }
        }
        None
    }

    /// Every reading of the grounded prompt, one plan each.
    fn interpretations(&self, grounding: &Grounding) -> Vec<QueryPlan> {
        let metric_sets = self.metric_sets(grounding);

        let mut plans = Vec::new();
        if metric_sets.iter().any(|set| !set.is_empty()) {
            for set in metric_sets {
                // Metrics on different tables can't share one query.
                let by_table = set
                    .iter()
                    .filter_map(|name| self.catalog.metric(name))
                    .map(|m| (m.table.clone(), m))
                    .into_group_map();
                let tables: Vec<String> = set
                    .iter()
                    .filter_map(|name| self.catalog.metric(name))
                    .map(|m| m.table.clone())
                    .unique()
                    .collect();
                for table in tables {
                    let metrics = by_table[&table]
                        .iter()
                        .map(|m| MetricRef {
                            name: m.name.clone(),
                            aggregation: m.aggregation,
                        })
                        .collect();
                    plans.push(self.aggregate_plan(metrics, grounding));
                }
            }
        } else if let Some(table) = self.listing_table(grounding) {
            let wants_aggregate = !grounding.dimensions.is_empty() || grounding.grain.is_some();
            match self.catalog.table(&table).and_then(|t| t.count_metric.clone()) {
                Some(count) if wants_aggregate => {
                    if let Some(metric) = self.catalog.metric(&count) {
                        let metrics = vec![MetricRef {
                            name: metric.name.clone(),
                            aggregation: metric.aggregation,
                        }];
                        plans.push(self.aggregate_plan(metrics, grounding));
                    }
                }
                _ => plans.push(self.listing_plan(&table, None, grounding)),
            }
        } else {
            // Only dimensions or filters were named: offer each table's count.
            for table in self.catalog.tables() {
                let metric = match table.count_metric.as_ref().and_then(|m| self.catalog.metric(m)) {
                    Some(metric) => metric,
                    None => continue,
                };
                let metrics = vec![MetricRef {
                    name: metric.name.clone(),
                    aggregation: metric.aggregation,
                }];
                plans.push(self.aggregate_plan(metrics, grounding));
            }
        }
        plans
    }

    /// Expand generic phrases ("viewers") into one metric set per reading.
    fn metric_sets(&self, grounding: &Grounding) -> Vec<Vec<String>> {
        let specific: Vec<String> = grounding
            .metric_spans
            .iter()
            .filter(|g| g.items.len() == 1)
            .map(|g| g.items[0].clone())
            .unique()
            .collect();

        let mut sets = vec![specific.clone()];
        for span in grounding.metric_spans.iter().filter(|g| g.items.len() > 1) {
            if span.items.iter().any(|m| specific.contains(m)) {
                continue;
            }
            sets = sets
                .into_iter()
                .flat_map(|set| {
                    span.items.iter().map(move |option| {
                        let mut next = set.clone();
                        if !next.contains(option) {
                            next.push(option.clone());
                        }
                        next
                    })
                })
                .collect();
        }
        sets
    }

    /// Most granular entity named; ties go to the first mentioned.
    fn listing_table(&self, grounding: &Grounding) -> Option<String> {
        grounding
            .entities
            .iter()
            .filter(|t| self.catalog.tenant_path(t).is_some())
            .rev()
            .max_by_key(|t| self.catalog.granularity(t))
            .cloned()
    }

    fn aggregate_plan(&self, metrics: Vec<MetricRef>, grounding: &Grounding) -> QueryPlan {
        // "top 5 streams by peak viewers": rank rows of the metric's own table.
        if let (Some(order), [metric]) = (grounding.order, metrics.as_slice()) {
            if grounding.dimensions.is_empty() && grounding.grain.is_none() {
                if let Some(def) = self.catalog.metric(&metric.name) {
                    let row_level = matches!(
                        def.aggregation,
                        Aggregation::Max | Aggregation::Min | Aggregation::Sum | Aggregation::Avg
                    );
                    if row_level && grounding.entities.contains(&def.table) {
                        let ordering = Ordering {
                            key: OrderKey::Column(def.column_ref()),
                            direction: order.direction,
                        };
                        return self.listing_plan(&def.table, Some((ordering, order.limit)), grounding);
                    }
                }
            }
        }

        let mut plan = QueryPlan::metrics(metrics);
        plan.dimensions = grounding.dimensions.clone();
        plan.time_range = grounding.time_range.clone();
        plan.time_grain = grounding.grain;
        let base = plan.base_table(self.catalog);
        plan.filters = self.resolve_filters(base.as_deref(), &grounding.filters);

        if let Some(order) = grounding.order {
            let grouped = !plan.dimensions.is_empty() || plan.time_grain.is_some();
            if let Some(first) = plan.metric_refs().first() {
                plan.order = Some(Ordering {
                    key: OrderKey::Metric(first.name.clone()),
                    direction: order.direction,
                });
            }
            plan.limit = match order.limit {
                Some(n) => Some(n),
                None if grouped => Some(1),
                None => None,
            };
        }
        plan
    }

    fn listing_plan(
        &self,
        table: &str,
        ordering: Option<(Ordering, Option<u32>)>,
        grounding: &Grounding,
    ) -> QueryPlan {
        let mut plan = QueryPlan::rows(table);
        plan.dimensions = grounding.dimensions.clone();
        plan.time_range = grounding.time_range.clone();
        plan.time_grain = grounding.grain;
        plan.filters = self.resolve_filters(Some(table), &grounding.filters);
        match ordering {
            Some((order, limit)) => {
                plan.order = Some(order);
                plan.limit = limit;
            }
            None => plan.limit = grounding.order.and_then(|o| o.limit),
        }
        plan
    }

    fn resolve_filters(&self, base: Option<&str>, pending: &[PendingFilter]) -> Vec<Filter> {
        pending
            .iter()
            .filter_map(|filter| {
                let column = filter
                    .columns
                    .iter()
                    .find(|c| base.map(|b| self.catalog.path(b, &c.table).is_some()).unwrap_or(false))
                    .or_else(|| filter.columns.first())?
                    .clone();
                let semantic_type = self.catalog.column(&column)?.semantic_type;
                let value = match (&filter.value, semantic_type) {
                    (RawValue::Text(text), SemanticType::Category) => {
                        FilterValue::Text(text.to_lowercase())
                    }
                    (RawValue::Text(text), _) => FilterValue::Text(text.clone()),
                    (RawValue::Number(n), SemanticType::Integer) if n.fract() == 0.0 => {
                        FilterValue::Int(*n as i64)
                    }
                    (RawValue::Number(n), _) => FilterValue::Float(*n),
                };
                Some(Filter {
                    column,
                    op: filter.op,
                    value,
                })
            })
            .collect()
    }
}
