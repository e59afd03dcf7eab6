//! Query Guards
//!
//! Safety limits applied to every query: how wide a plan may be, how many rows
//! may come back and how long the store may spend on it.

use crate::error::{NlqError, Result};
use crate::intent::plan::QueryPlan;
use std::time::Duration;

/// Query guards configuration
#[derive(Debug, Clone, PartialEq)]
pub struct QueryGuards {
    pub max_rows: usize,
    pub execution_timeout: Duration,
    pub max_dimensions: usize,
}

impl Default for QueryGuards {
    fn default() -> Self {
        Self {
            max_rows: 1000,
            execution_timeout: Duration::from_secs(5),
            max_dimensions: 3,
        }
    }
}

impl QueryGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate plan shape against guards
    pub fn validate_plan(&self, plan: &QueryPlan) -> Result<()> {
        if plan.dimensions.len() > self.max_dimensions {
            return Err(NlqError::PlanUnsupported(format!(
                "Too many dimensions: {} (max: {})",
                plan.dimensions.len(),
                self.max_dimensions
            )));
        }
        Ok(())
    }

    /// Rows requested from the store: one more than the cap, so that overflow
    /// is detectable without counting.
    pub fn fetch_limit(&self) -> usize {
        self.max_rows + 1
    }

    /// Effective statement timeout given an optional caller deadline.
    pub fn effective_timeout(&self, deadline: Option<Duration>) -> Duration {
        match deadline {
            Some(deadline) => deadline.min(self.execution_timeout),
            None => self.execution_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::plan::MetricRef;
    use crate::semantic::Aggregation;

    #[test]
    fn test_too_many_dimensions() {
        let guards = QueryGuards {
            max_dimensions: 1,
            ..QueryGuards::default()
        };
        let mut plan = QueryPlan::metrics(vec![MetricRef {
            name: "audience_size".to_string(),
            aggregation: Aggregation::CountDistinct,
        }]);
        plan.dimensions = vec!["country".to_string()];
        assert!(guards.validate_plan(&plan).is_ok());

        plan.dimensions.push("device".to_string());
        assert!(matches!(
            guards.validate_plan(&plan),
            Err(NlqError::PlanUnsupported(_))
        ));
    }

    #[test]
    fn test_deadline_only_shortens() {
        let guards = QueryGuards::default();
        assert_eq!(guards.effective_timeout(None), Duration::from_secs(5));
        assert_eq!(
            guards.effective_timeout(Some(Duration::from_millis(200))),
            Duration::from_millis(200)
        );
        assert_eq!(
            guards.effective_timeout(Some(Duration::from_secs(60))),
            Duration::from_secs(5)
        );
    }
}
