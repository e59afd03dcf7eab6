pub mod plan;
pub mod resolver;
pub mod tokens;

pub use plan::*;
pub use resolver::IntentResolver;
