use std::fmt;

use uuid::Uuid;

use crate::capability::types::CapabilityCheck;
use crate::session_management::session::SessionState;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    ExamsEmpty(String),
    BadIdentifier(String),
    DuplicateIdentifier(String),
    BadPortsRange(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::ExamsEmpty(e) => write!(f, "Exams configuration error: {}", e),
            ConfigError::BadIdentifier(e) => write!(f, "Identifier error: {}", e),
            ConfigError::DuplicateIdentifier(e) => write!(f, "Duplicate identifier: {}", e),
            ConfigError::BadPortsRange(e) => write!(f, "Port range error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// The capability gate refused entry. Carries every check that has to be fixed before
/// the probe is worth running again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    ChecksFailed(Vec<CapabilityCheck>),
    ConsentMissing,
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::ChecksFailed(checks) => {
                let names: Vec<String> = checks.iter().map(|c| c.to_string()).collect();
                write!(f, "Capability checks failed: {}", names.join(", "))
            }
            AdmissionError::ConsentMissing => write!(f, "Monitoring consent was not acknowledged"),
        }
    }
}

impl std::error::Error for AdmissionError {}

/// The environment could not be committed (e.g. fullscreen denied) at the moment of entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentCommitError(pub String);

impl fmt::Display for EnvironmentCommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment not ready: {}", self.0)
    }
}

impl std::error::Error for EnvironmentCommitError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug, Clone, PartialEq)]
pub enum AnswerError {
    UnknownQuestion(String),
    InvalidValue(String),
    NotAccepting(SessionState),
    SubmissionInProgress,
    StorageError(StorageError),
}

impl fmt::Display for AnswerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerError::UnknownQuestion(q) => write!(f, "Unknown question: {}", q),
            AnswerError::InvalidValue(e) => write!(f, "Invalid answer: {}", e),
            AnswerError::NotAccepting(state) => {
                write!(f, "Answers are not accepted while the session is {}", state)
            }
            AnswerError::SubmissionInProgress => write!(f, "A submission is already in progress"),
            AnswerError::StorageError(e) => write!(f, "Answer storage error: {}", e),
        }
    }
}

impl std::error::Error for AnswerError {}

impl From<StorageError> for AnswerError {
    fn from(err: StorageError) -> Self {
        AnswerError::StorageError(err)
    }
}

/// Failures reported by the grading collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradingError {
    Unavailable(String),
    Rejected(String),
}

impl fmt::Display for GradingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradingError::Unavailable(e) => write!(f, "Grading service unavailable: {}", e),
            GradingError::Rejected(e) => write!(f, "Submission rejected: {}", e),
        }
    }
}

impl std::error::Error for GradingError {}

/// Submission failed and the answer buffer was kept. Only `Transient` is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    Transient(String),
    Rejected(String),
}

impl fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionError::Transient(e) => {
                write!(f, "Submission failed, answers kept, retry later: {}", e)
            }
            SubmissionError::Rejected(e) => write!(f, "Submission rejected: {}", e),
        }
    }
}

impl std::error::Error for SubmissionError {}

impl From<GradingError> for SubmissionError {
    fn from(err: GradingError) -> Self {
        match err {
            GradingError::Unavailable(e) => SubmissionError::Transient(e),
            GradingError::Rejected(e) => SubmissionError::Rejected(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationError {
    /// Delivered for a session that is not (or no longer) monitored.
    Stale(Uuid),
    UnknownViolation(String),
    SessionMismatch { expected: Uuid, found: Uuid },
}

impl fmt::Display for ViolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationError::Stale(id) => write!(f, "Session {} is not monitored", id),
            ViolationError::UnknownViolation(id) => write!(f, "Unknown violation: {}", id),
            ViolationError::SessionMismatch { expected, found } => write!(
                f,
                "Violation addressed to session {} delivered to {}",
                found, expected
            ),
        }
    }
}

impl std::error::Error for ViolationError {}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    NotFound,
    UnknownExam(String),
    AlreadyActive(Uuid),
    SessionLimitReached,
    InvalidTransition { from: SessionState, action: &'static str },
    /// The exam's time limit (seconds) does not fit a deadline.
    DeadlineOutOfRange(u64),
    Admission(AdmissionError),
    EnvironmentNotReady(EnvironmentCommitError),
    AnswerError(AnswerError),
    SubmissionError(SubmissionError),
    ViolationError(ViolationError),
    StorageError(StorageError),
    Closed,
}

impl SessionError {
    /// Whether the caller may retry the same request without changing anything else.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::SubmissionError(SubmissionError::Transient(_))
                | SessionError::EnvironmentNotReady(_)
        )
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotFound => write!(f, "Session not found"),
            SessionError::UnknownExam(e) => write!(f, "Unknown exam: {}", e),
            SessionError::AlreadyActive(id) => {
                write!(f, "Taker already has a live session for this exam: {}", id)
            }
            SessionError::SessionLimitReached => write!(f, "Session limit reached"),
            SessionError::InvalidTransition { from, action } => {
                write!(f, "Cannot {} a session that is {}", action, from)
            }
            SessionError::DeadlineOutOfRange(secs) => {
                write!(f, "Time limit of {}s cannot be scheduled", secs)
            }
            SessionError::Admission(e) => write!(f, "Admission refused: {}", e),
            SessionError::EnvironmentNotReady(e) => write!(f, "{}", e),
            SessionError::AnswerError(e) => write!(f, "{}", e),
            SessionError::SubmissionError(e) => write!(f, "{}", e),
            SessionError::ViolationError(e) => write!(f, "Violation error: {}", e),
            SessionError::StorageError(e) => write!(f, "Storage error: {}", e),
            SessionError::Closed => write!(f, "Session controller is no longer running"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<AdmissionError> for SessionError {
    fn from(err: AdmissionError) -> Self {
        SessionError::Admission(err)
    }
}

impl From<EnvironmentCommitError> for SessionError {
    fn from(err: EnvironmentCommitError) -> Self {
        SessionError::EnvironmentNotReady(err)
    }
}

impl From<AnswerError> for SessionError {
    fn from(err: AnswerError) -> Self {
        SessionError::AnswerError(err)
    }
}

impl From<SubmissionError> for SessionError {
    fn from(err: SubmissionError) -> Self {
        SessionError::SubmissionError(err)
    }
}

impl From<ViolationError> for SessionError {
    fn from(err: ViolationError) -> Self {
        SessionError::ViolationError(err)
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::StorageError(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    SessionError(SessionError),
    StorageError(StorageError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::SessionError(e) => write!(f, "Session error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<SessionError> for ControllerError {
    fn from(err: SessionError) -> Self {
        ControllerError::SessionError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}
