//! SQL compilation: plan → dialect-specific, parameterized SELECT.

pub mod dialect;
pub mod join_planner;
pub mod params;
pub mod sql_synthesizer;

pub use dialect::SqlDialect;
pub use join_planner::JoinPlanner;
pub use params::{describe_params, to_positional, BoundParam, PositionalSql, SqlValue};
pub use sql_synthesizer::{OutputColumn, SqlSynthesizer, SynthesizedQuery};
