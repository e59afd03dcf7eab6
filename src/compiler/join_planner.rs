//! Deterministic Join Planning
//!
//! Every table a plan touches is joined along the catalog's many-to-one path
//! from the base table, so joins never multiply base rows. The planner refuses
//! a table it cannot reach that way, and refuses a second, different route to a
//! table it has already joined.

use crate::error::{NlqError, Result};
use crate::semantic::{Catalog, ForeignKey};
use std::collections::BTreeMap;

/// One `INNER JOIN <table> ON <child.fk> = <parent.pk>`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    pub table: String,
    pub edge: ForeignKey,
}

impl JoinStep {
    pub fn render(&self) -> String {
        format!("INNER JOIN {} ON {}", self.table, self.edge.join_condition())
    }
}

pub struct JoinPlanner<'a> {
    catalog: &'a Catalog,
    base: String,
    reached_by: BTreeMap<String, ForeignKey>,
    steps: Vec<JoinStep>,
}

impl<'a> JoinPlanner<'a> {
    pub fn new(catalog: &'a Catalog, base: &str) -> Self {
        Self {
            catalog,
            base: base.to_string(),
            reached_by: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    /// Make `table` available to the query.
    pub fn require(&mut self, table: &str) -> Result<()> {
        if table == self.base {
            return Ok(());
        }
        let path = self.catalog.path(&self.base, table).ok_or_else(|| {
            NlqError::PlanUnsupported(format!(
                "'{}' cannot be joined to '{}' without multiplying rows",
                table, self.base
            ))
        })?;

        for edge in &path.edges {
            match self.reached_by.get(&edge.to_table) {
                Some(existing) if existing == edge => {}
                Some(existing) => {
                    return Err(NlqError::PlanUnsupported(format!(
                        "'{}' is reachable both via {} and via {}",
                        edge.to_table,
                        existing.join_condition(),
                        edge.join_condition()
                    )));
                }
                None => {
                    self.reached_by.insert(edge.to_table.clone(), edge.clone());
                    self.steps.push(JoinStep {
                        table: edge.to_table.clone(),
                        edge: edge.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn steps(&self) -> &[JoinStep] {
        &self.steps
    }

    /// Joins in the order they were first required.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(|s| s.render())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
