//! Query safety: shape guards on plans and validation of synthesized SQL.

pub mod query_guards;
pub mod sql_validator;

pub use query_guards::QueryGuards;
pub use sql_validator::{SqlValidator, ValidatedQuery};
