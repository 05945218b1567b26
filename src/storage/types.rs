use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session_management::session::{Session, SessionState};
use crate::violations::types::Violation;

/// Everything needed to rebuild a session after a restart, answers excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: Session,
    #[serde(default)]
    pub violations: Vec<Violation>,
}

impl SessionRecord {
    /// When the session ended for retention purposes. Only submitted sessions have ended;
    /// terminated ones still owe a submission.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self.session.state {
            SessionState::Submitted => self.session.submitted_at,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFilter {
    pub state: Option<SessionState>,
    pub exam_id: Option<String>,
    pub taker_id: Option<String>,
    /// Only sessions that have not reached `Submitted`.
    #[serde(default)]
    pub unsubmitted: bool,
}

impl SessionFilter {
    pub fn matches(&self, record: &SessionRecord) -> bool {
        let s = &record.session;
        if let Some(state) = self.state {
            if s.state != state {
                return false;
            }
        }
        if let Some(ref exam) = self.exam_id {
            if &s.exam_id != exam {
                return false;
            }
        }
        if let Some(ref taker) = self.taker_id {
            if &s.taker.id != taker {
                return false;
            }
        }
        !(self.unsubmitted && s.state == SessionState::Submitted)
    }
}
