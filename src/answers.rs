//! Per-session answer buffer.
//!
//! Answers are persisted before they are acknowledged, so everything a taker was told is
//! saved survives a crash and ends up in the submission.

pub mod buffer;
pub mod types;

pub use buffer::AnswerBuffer;
pub use types::{AnswerRecord, AnswerSnapshot, AnswerValue};
