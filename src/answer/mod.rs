//! Answer composition: structured payload, deterministic summary, and the
//! per-prompt audit record.

pub mod composer;
pub mod payload;
pub mod summary;

pub use composer::{AnswerComposer, AnswerRequest, Answered, QueryOutcome, QueryStatus};
pub use payload::{AnswerColumn, AnswerError, AnswerPayload, AnswerRow, NlqAnswer};
pub use summary::Summarizer;
