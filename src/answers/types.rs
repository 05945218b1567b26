use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A taker's response to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    Single(String),
    Multiple(Vec<String>),
    Text(String),
}

/// Latest answer for one question, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: String,
    pub value: AnswerValue,
    pub last_written_at: DateTime<Utc>,
    /// Number of writes for this question, starting at 1.
    pub revision: u64,
}

/// Deep copy of a session's answers handed to the submission protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub answers: BTreeMap<String, AnswerValue>,
}

impl AnswerSnapshot {
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}
