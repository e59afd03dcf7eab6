pub mod builtin;
pub mod catalog;
pub mod dimension;
pub mod join_graph;
pub mod loader;
pub mod metric;

pub use catalog::*;
pub use dimension::*;
pub use join_graph::*;
pub use loader::*;
pub use metric::*;
