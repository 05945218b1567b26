use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::answers::types::AnswerSnapshot;
use crate::session_management::session::TerminationReason;

/// What a session hands to grading, exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub session_id: Uuid,
    pub exam_id: String,
    pub taker_id: String,
    pub answers: AnswerSnapshot,
    pub violation_count: usize,
    /// Set for automatic submissions after the session was terminated.
    pub termination: Option<TerminationReason>,
    pub submitted_at: DateTime<Utc>,
}

/// Proof that grading holds the submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub session_id: Uuid,
    pub accepted_at: DateTime<Utc>,
    /// Fraction of auto-gradable questions answered correctly.
    pub score: Option<f64>,
    /// Grading already had a submission for this session; this one was ignored.
    #[serde(default)]
    pub duplicate: bool,
}
