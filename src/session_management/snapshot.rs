use serde::Serialize;

use super::session::Session;
use crate::violations::types::Violation;

/// Read-only copy of a session published by its controller after every change.
///
/// Readers (the taker's session view, the registry, the monitoring aggregator) never
/// lock the session; they clone the latest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub violations: Vec<Violation>,
    pub violation_count: usize,
    pub unresolved_violations: usize,
    pub threshold_breached: bool,
    pub answered: usize,
    pub submission_in_flight: bool,
    pub last_submission_error: Option<String>,
}
