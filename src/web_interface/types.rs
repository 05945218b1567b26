use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::reply::{self, Reply, Response};

use crate::capability::probe::ReportedCapabilities;
use crate::capability::types::CapabilityCheck;
use crate::error_handling::types::{
    AdmissionError, AnswerError, SessionError, SubmissionError, ViolationError,
};
use crate::grading::types::SubmissionReceipt;
use crate::session_management::session::Taker;
use crate::session_management::session_controller::SubmitOutcome;

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    /// The same request may succeed later without any change.
    pub retryable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failing_checks: Vec<CapabilityCheck>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            failing_checks: Vec::new(),
        }
    }
}

impl From<&SessionError> for ApiError {
    fn from(err: &SessionError) -> Self {
        let failing_checks = match err {
            SessionError::Admission(AdmissionError::ChecksFailed(checks)) => checks.clone(),
            _ => Vec::new(),
        };
        Self {
            message: err.to_string(),
            retryable: err.is_retryable(),
            failing_checks,
        }
    }
}

pub fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::NotFound | SessionError::UnknownExam(_) => StatusCode::NOT_FOUND,
        SessionError::AlreadyActive(_) | SessionError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        SessionError::SessionLimitReached => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::DeadlineOutOfRange(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::Admission(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::EnvironmentNotReady(_) => StatusCode::CONFLICT,
        SessionError::AnswerError(e) => match e {
            AnswerError::UnknownQuestion(_) => StatusCode::NOT_FOUND,
            AnswerError::InvalidValue(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AnswerError::NotAccepting(_) | AnswerError::SubmissionInProgress => {
                StatusCode::CONFLICT
            }
            AnswerError::StorageError(_) => StatusCode::SERVICE_UNAVAILABLE,
        },
        SessionError::SubmissionError(SubmissionError::Transient(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SessionError::SubmissionError(SubmissionError::Rejected(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SessionError::ViolationError(e) => match e {
            ViolationError::Stale(_) => StatusCode::GONE,
            ViolationError::UnknownViolation(_) => StatusCode::NOT_FOUND,
            ViolationError::SessionMismatch { .. } => StatusCode::BAD_REQUEST,
        },
        SessionError::StorageError(_) | SessionError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn error_reply(err: &SessionError) -> Response {
    reply::with_status(reply::json(&ApiError::from(err)), status_for(err)).into_response()
}

pub fn json_reply<T: Serialize>(result: Result<T, SessionError>, status: StatusCode) -> Response {
    match result {
        Ok(body) => reply::with_status(reply::json(&body), status).into_response(),
        Err(e) => error_reply(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub exam_id: String,
    pub taker: Taker,
}

#[derive(Debug, Deserialize)]
pub struct AdmitRequest {
    pub capabilities: ReportedCapabilities,
    pub consent: bool,
}

#[derive(Debug, Serialize)]
pub struct BeginResponse {
    pub deadline: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub already_submitted: bool,
    pub receipt: SubmissionReceipt,
}

impl From<SubmitOutcome> for SubmitResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Submitted(receipt) => Self {
                already_submitted: false,
                receipt,
            },
            SubmitOutcome::AlreadySubmitted(receipt) => Self {
                already_submitted: true,
                receipt,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WarnRequest {
    pub violation_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct DismissRequest {
    pub violation_id: String,
}

#[derive(Debug, Serialize)]
pub struct DismissResponse {
    pub changed: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TerminateRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::session::SessionState;
    use uuid::Uuid;

    #[test]
    fn admission_errors_list_failing_checks() {
        let err = SessionError::Admission(AdmissionError::ChecksFailed(vec![
            CapabilityCheck::Audio,
            CapabilityCheck::Fullscreen,
        ]));
        let body = ApiError::from(&err);
        assert_eq!(status_for(&err), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.failing_checks.len(), 2);
        assert!(!body.retryable);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["failing_checks"][1], "fullscreen");
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        let transient = SessionError::SubmissionError(SubmissionError::Transient("down".into()));
        assert_eq!(status_for(&transient), StatusCode::SERVICE_UNAVAILABLE);
        assert!(ApiError::from(&transient).retryable);

        let rejected = SessionError::SubmissionError(SubmissionError::Rejected("bad".into()));
        assert_eq!(status_for(&rejected), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!ApiError::from(&rejected).retryable);

        let conflict = SessionError::InvalidTransition {
            from: SessionState::Submitted,
            action: "terminate",
        };
        assert_eq!(status_for(&conflict), StatusCode::CONFLICT);
    }

    #[test]
    fn stale_violations_are_gone() {
        let stale = SessionError::ViolationError(ViolationError::Stale(Uuid::new_v4()));
        assert_eq!(status_for(&stale), StatusCode::GONE);
        assert_eq!(status_for(&SessionError::NotFound), StatusCode::NOT_FOUND);
    }

    #[test]
    fn submit_response_flags_duplicates() {
        let receipt = SubmissionReceipt {
            session_id: Uuid::new_v4(),
            accepted_at: chrono::Utc::now(),
            score: Some(0.5),
            duplicate: false,
        };
        let first = SubmitResponse::from(SubmitOutcome::Submitted(receipt.clone()));
        let again = SubmitResponse::from(SubmitOutcome::AlreadySubmitted(receipt));
        assert!(!first.already_submitted);
        assert!(again.already_submitted);
    }
}
