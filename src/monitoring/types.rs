use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session_management::session::{DeviceSignals, SessionState};
use crate::session_management::snapshot::SessionSnapshot;
use crate::violations::types::{Severity, Violation};

/// One row of the supervisor dashboard. Never a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringView {
    pub session_id: Uuid,
    pub taker_id: String,
    pub taker_name: String,
    pub department: String,
    pub exam_id: String,
    pub exam_title: String,
    pub status: SessionState,
    pub violations: Vec<Violation>,
    pub violation_count: usize,
    pub unresolved_violations: usize,
    pub max_violations: u32,
    pub last_activity_at: DateTime<Utc>,
    pub signals: DeviceSignals,
    pub deadline: Option<DateTime<Utc>>,
    pub remaining_secs: Option<i64>,
    pub answered: usize,
    pub question_count: usize,
    pub submission_error: Option<String>,
}

impl MonitoringView {
    pub fn from_snapshot(snapshot: &SessionSnapshot, now: DateTime<Utc>) -> Self {
        let s = &snapshot.session;
        let remaining_secs = if s.state.is_running() {
            s.remaining(now).map(|r| r.num_seconds())
        } else {
            None
        };
        Self {
            session_id: s.id,
            taker_id: s.taker.id.clone(),
            taker_name: s.taker.name.clone(),
            department: s.taker.department.clone(),
            exam_id: s.exam_id.clone(),
            exam_title: s.exam_title.clone(),
            status: s.state,
            violations: snapshot.violations.clone(),
            violation_count: snapshot.violation_count,
            unresolved_violations: snapshot.unresolved_violations,
            max_violations: s.max_violations,
            last_activity_at: s.last_activity_at,
            signals: s.signals,
            deadline: s.deadline,
            remaining_secs,
            answered: snapshot.answered,
            question_count: s.question_count,
            submission_error: snapshot.last_submission_error.clone(),
        }
    }
}

/// `List` criteria; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringFilter {
    pub exam_id: Option<String>,
    pub department: Option<String>,
    pub status: Option<SessionState>,
    /// Case-insensitive substring of taker name, taker id or exam title.
    pub search: Option<String>,
}

impl MonitoringFilter {
    pub fn matches(&self, view: &MonitoringView) -> bool {
        if let Some(status) = self.status {
            if view.status != status {
                return false;
            }
        }
        if let Some(ref exam) = self.exam_id {
            if &view.exam_id != exam {
                return false;
            }
        }
        if let Some(ref department) = self.department {
            if !view.department.eq_ignore_ascii_case(department) {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                [&view.taker_name, &view.taker_id, &view.exam_title]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringList {
    pub sessions: Vec<MonitoringView>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringStats {
    pub total_sessions: usize,
    pub by_status: BTreeMap<SessionState, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub total_violations: usize,
    pub unresolved_violations: usize,
    pub last_updated: DateTime<Utc>,
}

impl MonitoringStats {
    pub fn from_views(views: &[MonitoringView], last_updated: DateTime<Utc>) -> Self {
        let mut by_status = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let mut total_violations = 0;
        let mut unresolved_violations = 0;
        for view in views {
            *by_status.entry(view.status).or_insert(0) += 1;
            for v in &view.violations {
                *by_severity.entry(v.severity).or_insert(0) += 1;
            }
            total_violations += view.violation_count;
            unresolved_violations += view.unresolved_violations;
        }
        Self {
            total_sessions: views.len(),
            by_status,
            by_severity,
            total_violations,
            unresolved_violations,
            last_updated,
        }
    }
}
