//! Ambiguity handling
//!
//! When a prompt supports more than one reading, the resolver hands every
//! reading here. Readings the catalog cannot answer are dropped (unless none is
//! answerable), duplicates collapse, and what remains becomes the candidate list
//! carried by `IntentAmbiguous`. Nothing is executed for an ambiguous prompt.

use crate::error::{NlqError, Result};
use crate::intent::plan::{QueryPlan, Subject};
use crate::semantic::Catalog;
use serde::{Deserialize, Serialize};

/// Upper bound on interpretations offered back to the caller.
pub const MAX_CANDIDATES: usize = 6;

/// One possible reading of an ambiguous prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub description: String,
    pub plan: QueryPlan,
}

pub struct AmbiguityResolver<'a> {
    catalog: &'a Catalog,
}

impl<'a> AmbiguityResolver<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Whether the catalog's join graph can answer the plan at all.
    pub fn is_feasible(&self, plan: &QueryPlan) -> bool {
        let base = match plan.base_table(self.catalog) {
            Some(base) => base,
            None => return false,
        };
        if self.catalog.tenant_path(&base).is_none() {
            return false;
        }
        if let Subject::Rows { .. } = plan.subject {
            if !plan.dimensions.is_empty() || plan.time_grain.is_some() {
                return false;
            }
        }

        let reachable = |table: &str| self.catalog.path(&base, table).is_some();

        let dims_ok = plan.dimensions.iter().all(|name| {
            self.catalog
                .dimension(name)
                .map(|d| reachable(&d.table))
                .unwrap_or(false)
        });
        let filters_ok = plan.filters.iter().all(|f| reachable(&f.column.table));
        let needs_time = plan.time_range.is_some() || plan.time_grain.is_some();
        let time_ok = !needs_time
            || self
                .catalog
                .table(&base)
                .and_then(|t| t.time_column.as_ref())
                .map(|col| reachable(&col.table))
                .unwrap_or(false);

        dims_ok && filters_ok && time_ok
    }

    /// Deduplicate and keep the answerable readings; if none is answerable, keep
    /// them all so the caller still sees what was understood.
    pub fn narrow(&self, plans: Vec<QueryPlan>) -> Vec<QueryPlan> {
        let mut unique: Vec<QueryPlan> = Vec::new();
        for plan in plans {
            if !unique.contains(&plan) {
                unique.push(plan);
            }
        }
        let feasible: Vec<QueryPlan> = unique
            .iter()
            .filter(|p| self.is_feasible(p))
            .cloned()
            .collect();
        let mut narrowed = if feasible.is_empty() { unique } else { feasible };
        narrowed.truncate(MAX_CANDIDATES);
        narrowed
    }

    pub fn candidates(&self, plans: &[QueryPlan]) -> Vec<Candidate> {
        plans
            .iter()
            .map(|plan| Candidate {
                description: plan.describe(self.catalog),
                plan: plan.clone(),
            })
            .collect()
    }

    /// Build the `IntentAmbiguous` error listing every reading.
    pub fn ambiguous(&self, plans: &[QueryPlan]) -> NlqError {
        let candidates = self.candidates(plans);
        let options = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}) {}", i + 1, c.description))
            .collect::<Vec<_>>()
            .join("; ");
        NlqError::IntentAmbiguous {
            message: format!("That question could mean more than one thing: {}", options),
            candidates,
        }
    }
}

/// Pick a candidate by its 1-based position, as shown to the user.
pub fn choose(candidates: &[Candidate], choice: usize) -> Result<QueryPlan> {
    if choice == 0 || choice > candidates.len() {
        return Err(NlqError::IntentUnresolved(format!(
            "choice {} is not one of the {} options",
            choice,
            candidates.len()
        )));
    }
    Ok(candidates[choice - 1].plan.clone())
}
