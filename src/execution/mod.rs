//! Query execution: the store contract and the deadline/row-cap executor.

pub mod executor;
pub mod result;
pub mod store;

pub use executor::QueryExecutor;
pub use result::QueryResult;
pub use store::{AnalyticsStore, NewNlQuery, NlQueryRecord, RowSet};
