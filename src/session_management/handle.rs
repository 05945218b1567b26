use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::session::SessionState;
use super::session_controller::{Command, SubmitOutcome};
use super::snapshot::SessionSnapshot;
use crate::answers::types::{AnswerRecord, AnswerValue};
use crate::capability::probe::EnvironmentCommit;
use crate::capability::types::CapabilityReport;
use crate::error_handling::types::SessionError;

/// Cloneable address of one session controller.
///
/// Every mutating call is queued to the controller and answered once it has been applied;
/// [`view`](Self::view) reads the latest published snapshot without a round trip.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: Uuid,
        commands: mpsc::Sender<Command>,
        snapshot: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            id,
            commands,
            snapshot,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn view(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().session.state
    }

    /// Waits until the session reaches `state`.
    pub async fn wait_for_state(&self, state: SessionState) -> Result<SessionSnapshot, SessionError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| s.session.state == state)
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(snapshot.clone())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, SessionError>>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    /// `Pending -> Admitted` given an eligible probe report and the taker's consent.
    pub async fn admit(&self, report: CapabilityReport, consent: bool) -> Result<(), SessionError> {
        self.request(|reply| Command::Admit {
            report,
            consent,
            reply,
        })
        .await
    }

    /// `Admitted -> Active`. `commit` performs the real environment change (e.g. entering
    /// fullscreen) and is invoked at the moment of transition. Returns the deadline.
    pub async fn begin(
        &self,
        commit: impl EnvironmentCommit + 'static,
    ) -> Result<DateTime<Utc>, SessionError> {
        self.request(|reply| Command::Begin {
            commit: Box::new(commit),
            reply,
        })
        .await
    }

    /// Durably records an answer; returns once it is persisted.
    pub async fn write_answer(
        &self,
        question_id: impl Into<String>,
        value: AnswerValue,
    ) -> Result<AnswerRecord, SessionError> {
        let question_id = question_id.into();
        self.request(|reply| Command::WriteAnswer {
            question_id,
            value,
            reply,
        })
        .await
    }

    /// Taker acknowledgement of a suspension.
    pub async fn acknowledge(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Acknowledge { reply }).await
    }

    /// Submits the buffered answers. Safe to call repeatedly and concurrently; exactly one
    /// submission reaches grading.
    pub async fn submit(&self) -> Result<SubmitOutcome, SessionError> {
        self.request(|reply| Command::Submit { reply }).await
    }

    pub async fn terminate(&self, reason: Option<String>) -> Result<(), SessionError> {
        self.request(|reply| Command::Terminate { reason, reply })
            .await
    }

    pub async fn warn(
        &self,
        violation_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), SessionError> {
        let violation_id = violation_id.into();
        let message = message.into();
        self.request(|reply| Command::Warn {
            violation_id,
            message,
            reply,
        })
        .await
    }

    /// Marks a violation resolved. Returns `false` if it already was.
    pub async fn dismiss(&self, violation_id: impl Into<String>) -> Result<bool, SessionError> {
        let violation_id = violation_id.into();
        self.request(|reply| Command::Dismiss {
            violation_id,
            reply,
        })
        .await
    }
}
