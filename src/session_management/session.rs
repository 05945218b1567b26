//! Session data model and the pure lifecycle state machine.
//!
//! ```text
//! Pending --admit--> Admitted --activate--> Active <--suspend/resume--> Suspended
//!                                             |                            |
//!                                             +---------terminate----------+--> Terminated
//! Active / Terminated --mark_submitted--> Submitted
//! ```
//!
//! Transitions here are synchronous and side-effect free; timers, persistence and the
//! submission protocol live in the controller that owns the session.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::types::{CapabilityCheck, CapabilityReport, CheckStatus};
use crate::configuration::types::ExamConfig;
use crate::error_handling::types::{AdmissionError, SessionError};
use crate::grading::types::SubmissionReceipt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Admitted,
    Active,
    Suspended,
    Terminated,
    Submitted,
}

impl SessionState {
    /// Taker is inside the timed, monitored part of the exam.
    pub fn is_running(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Suspended)
    }

    /// Not yet ended; blocks a second session for the same taker and exam.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionState::Pending
                | SessionState::Admitted
                | SessionState::Active
                | SessionState::Suspended
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Pending => "pending",
            SessionState::Admitted => "admitted",
            SessionState::Active => "active",
            SessionState::Suspended => "suspended",
            SessionState::Terminated => "terminated",
            SessionState::Submitted => "submitted",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum TerminationReason {
    ThresholdBreached,
    DeadlineReached,
    Operator(Option<String>),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::ThresholdBreached => write!(f, "violation threshold breached"),
            TerminationReason::DeadlineReached => write!(f, "deadline reached"),
            TerminationReason::Operator(Some(why)) => write!(f, "terminated by operator: {}", why),
            TerminationReason::Operator(None) => write!(f, "terminated by operator"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taker {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub department: String,
}

/// Device flags shown to supervisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSignals {
    pub camera: bool,
    pub microphone: bool,
    pub tab_focus: bool,
}

impl Default for DeviceSignals {
    fn default() -> Self {
        Self {
            camera: false,
            microphone: false,
            tab_focus: true,
        }
    }
}

/// Message an operator sent to the taker about a violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorNotice {
    pub violation_id: String,
    pub message: String,
    pub issued_at: DateTime<Utc>,
}

/// One taker's attempt at one exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub exam_id: String,
    pub exam_title: String,
    pub taker: Taker,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub admitted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_limit_secs: u64,
    pub grace_secs: u64,
    /// Fixed when the session becomes active, never recomputed.
    pub deadline: Option<DateTime<Utc>>,
    /// Copied from the exam at creation; later exam changes do not apply.
    pub max_violations: u32,
    pub question_count: usize,
    pub termination: Option<TerminationReason>,
    pub suspension: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub receipt: Option<SubmissionReceipt>,
    pub last_activity_at: DateTime<Utc>,
    pub signals: DeviceSignals,
    pub notices: Vec<OperatorNotice>,
}

impl Session {
    pub fn new(exam: &ExamConfig, taker: Taker, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            exam_id: exam.id.clone(),
            exam_title: exam.title.clone(),
            taker,
            state: SessionState::Pending,
            created_at: now,
            admitted_at: None,
            started_at: None,
            duration_limit_secs: exam.duration_secs,
            grace_secs: exam.grace_secs,
            deadline: None,
            max_violations: exam.max_violations,
            question_count: exam.questions.len(),
            termination: None,
            suspension: None,
            submitted_at: None,
            receipt: None,
            last_activity_at: now,
            signals: DeviceSignals::default(),
            notices: Vec::new(),
        }
    }

    fn invalid<T>(&self, action: &'static str) -> Result<T, SessionError> {
        Err(SessionError::InvalidTransition {
            from: self.state,
            action,
        })
    }

    /// `Pending -> Admitted` once the capability report is eligible and consent was given.
    /// On refusal the session stays `Pending` so the probe can be retried.
    pub fn admit(
        &mut self,
        report: &CapabilityReport,
        consent: bool,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Pending {
            return self.invalid("admit");
        }
        if !report.eligible() {
            return Err(AdmissionError::ChecksFailed(report.failing_checks()).into());
        }
        if !consent {
            return Err(AdmissionError::ConsentMissing.into());
        }
        self.signals.camera = report.status(CapabilityCheck::Video) == CheckStatus::Working;
        self.signals.microphone = report.status(CapabilityCheck::Audio) == CheckStatus::Working;
        self.state = SessionState::Admitted;
        self.admitted_at = Some(now);
        self.last_activity_at = now;
        Ok(())
    }

    /// `Admitted -> Active`. The caller must have committed the environment first.
    /// Returns the deadline, computed once here.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<DateTime<Utc>, SessionError> {
        if self.state != SessionState::Admitted {
            return self.invalid("start");
        }
        let deadline = self.deadline_from(now)?;
        self.state = SessionState::Active;
        self.started_at = Some(now);
        self.deadline = Some(deadline);
        self.last_activity_at = now;
        Ok(deadline)
    }

    /// Duration plus grace, in seconds.
    pub fn time_limit_secs(&self) -> u64 {
        self.duration_limit_secs.saturating_add(self.grace_secs)
    }

    /// Deadline of a session started at `now`. Fails when it is not representable.
    pub fn deadline_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, SessionError> {
        let limit = self.time_limit_secs();
        i64::try_from(limit)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|d| now.checked_add_signed(d))
            .ok_or(SessionError::DeadlineOutOfRange(limit))
    }

    /// `Active -> Suspended`. Returns `false` when already suspended.
    pub fn suspend(&mut self, reason: impl Into<String>) -> Result<bool, SessionError> {
        match self.state {
            SessionState::Active => {
                self.state = SessionState::Suspended;
                self.suspension = Some(reason.into());
                Ok(true)
            }
            SessionState::Suspended => Ok(false),
            _ => self.invalid("suspend"),
        }
    }

    /// `Suspended -> Active` on the taker's acknowledgement.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.state != SessionState::Suspended {
            return self.invalid("resume");
        }
        self.state = SessionState::Active;
        self.suspension = None;
        self.signals.tab_focus = true;
        self.last_activity_at = now;
        Ok(())
    }

    /// `Active | Suspended -> Terminated`. Any pending acknowledgement is cancelled.
    pub fn terminate(&mut self, reason: TerminationReason) -> Result<(), SessionError> {
        if !self.state.is_running() {
            return self.invalid("terminate");
        }
        self.state = SessionState::Terminated;
        self.suspension = None;
        self.termination = Some(reason);
        Ok(())
    }

    /// `Active | Terminated -> Submitted` after the grading collaborator accepted the
    /// answers.
    pub fn mark_submitted(
        &mut self,
        receipt: SubmissionReceipt,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Active | SessionState::Terminated) {
            return self.invalid("submit");
        }
        self.state = SessionState::Submitted;
        self.submitted_at = Some(now);
        self.receipt = Some(receipt);
        Ok(())
    }

    /// Time left before the deadline, clamped at zero. `None` before activation.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.deadline
            .map(|deadline| (deadline - now).max(Duration::zero()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::probe::{CapabilityProbe, ReportedCapabilities};

    fn exam() -> ExamConfig {
        ExamConfig {
            id: "bio".into(),
            title: "Biology".into(),
            duration_secs: 600,
            grace_secs: 30,
            max_violations: 3,
            questions: vec![],
        }
    }

    fn taker() -> Taker {
        Taker {
            id: "t-1".into(),
            name: "Ada".into(),
            department: "Science".into(),
        }
    }

    fn receipt(id: Uuid) -> SubmissionReceipt {
        SubmissionReceipt {
            session_id: id,
            accepted_at: Utc::now(),
            score: None,
            duplicate: false,
        }
    }

    fn active_session() -> Session {
        let now = Utc::now();
        let mut s = Session::new(&exam(), taker(), now);
        s.admit(&ReportedCapabilities::all_working().run(), true, now)
            .unwrap();
        s.activate(now).unwrap();
        s
    }

    #[test]
    fn ineligible_report_keeps_session_pending() {
        let now = Utc::now();
        let mut s = Session::new(&exam(), taker(), now);
        let report = ReportedCapabilities::all_working()
            .with(CapabilityCheck::Video, CheckStatus::Failed)
            .run();
        match s.admit(&report, true, now) {
            Err(SessionError::Admission(AdmissionError::ChecksFailed(checks))) => {
                assert_eq!(checks, vec![CapabilityCheck::Video])
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(s.state, SessionState::Pending);

        assert!(matches!(
            s.admit(&ReportedCapabilities::all_working().run(), false, now),
            Err(SessionError::Admission(AdmissionError::ConsentMissing))
        ));
        assert_eq!(s.state, SessionState::Pending);

        s.admit(&ReportedCapabilities::all_working().run(), true, now)
            .unwrap();
        assert_eq!(s.state, SessionState::Admitted);
        assert!(s.signals.camera && s.signals.microphone);
    }

    #[test]
    fn unrepresentable_deadline_keeps_session_admitted() {
        let now = Utc::now();
        let mut s = Session::new(&exam(), taker(), now);
        s.duration_limit_secs = 10_000_000_000_000_000;
        s.admit(&ReportedCapabilities::all_working().run(), true, now)
            .unwrap();
        assert_eq!(
            s.activate(now),
            Err(SessionError::DeadlineOutOfRange(10_000_000_000_000_030))
        );
        assert_eq!(s.state, SessionState::Admitted);
        assert!(s.deadline.is_none());

        s.duration_limit_secs = u64::MAX;
        assert!(s.activate(now).is_err());
    }

    #[test]
    fn deadline_includes_grace_and_never_moves() {
        let mut s = active_session();
        let started = s.started_at.unwrap();
        let deadline = s.deadline.unwrap();
        assert_eq!(deadline - started, Duration::seconds(630));

        s.suspend("tab switch").unwrap();
        s.resume(Utc::now()).unwrap();
        s.suspend("tab switch again").unwrap();
        assert_eq!(s.deadline, Some(deadline));
        s.terminate(TerminationReason::ThresholdBreached).unwrap();
        assert_eq!(s.deadline, Some(deadline));
    }

    #[test]
    fn suspension_is_idempotent_and_needs_running_state() {
        let mut s = active_session();
        assert_eq!(s.suspend("tab").unwrap(), true);
        assert_eq!(s.suspend("tab").unwrap(), false);
        assert_eq!(s.suspension.as_deref(), Some("tab"));

        let mut pending = Session::new(&exam(), taker(), Utc::now());
        assert!(matches!(
            pending.suspend("tab"),
            Err(SessionError::InvalidTransition {
                from: SessionState::Pending,
                ..
            })
        ));
    }

    #[test]
    fn terminate_from_suspended_cancels_acknowledgement() {
        let mut s = active_session();
        s.suspend("tab").unwrap();
        s.terminate(TerminationReason::DeadlineReached).unwrap();
        assert_eq!(s.state, SessionState::Terminated);
        assert_eq!(s.suspension, None);
        assert!(s.resume(Utc::now()).is_err());
        assert!(s.terminate(TerminationReason::ThresholdBreached).is_err());
    }

    #[test]
    fn submitted_is_terminal() {
        let mut s = active_session();
        let id = s.id;
        s.mark_submitted(receipt(id), Utc::now()).unwrap();
        assert_eq!(s.state, SessionState::Submitted);
        assert!(s.mark_submitted(receipt(id), Utc::now()).is_err());
        assert!(s.terminate(TerminationReason::Operator(None)).is_err());
        assert!(s.suspend("x").is_err());
    }

    #[test]
    fn suspended_sessions_cannot_be_submitted_directly() {
        let mut s = active_session();
        let id = s.id;
        s.suspend("tab").unwrap();
        assert!(s.mark_submitted(receipt(id), Utc::now()).is_err());
        s.terminate(TerminationReason::Operator(Some("left room".into())))
            .unwrap();
        s.mark_submitted(receipt(id), Utc::now()).unwrap();
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let s = active_session();
        let deadline = s.deadline.unwrap();
        assert_eq!(
            s.remaining(deadline - Duration::seconds(10)),
            Some(Duration::seconds(10))
        );
        assert_eq!(
            s.remaining(deadline + Duration::seconds(10)),
            Some(Duration::zero())
        );
        let pending = Session::new(&exam(), taker(), Utc::now());
        assert_eq!(pending.remaining(Utc::now()), None);
    }
}
