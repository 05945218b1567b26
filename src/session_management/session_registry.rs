use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use uuid::Uuid;

use super::handle::SessionHandle;
use super::session::{Session, SessionState, Taker};
use super::session_controller::{ControllerContext, SessionController};
use super::snapshot::SessionSnapshot;
use crate::answers::buffer::AnswerBuffer;
use crate::configuration::catalog::ExamCatalog;
use crate::configuration::types::ExamConfig;
use crate::error_handling::types::SessionError;
use crate::storage::session_filter::unsubmitted;
use crate::storage::types::SessionRecord;
use crate::violations::accumulator::ViolationAccumulator;

/// Process-wide table of session controllers.
///
/// # Fields Overview
///
/// - `sessions`: handle of every session the process currently holds
/// - `catalog`: exams sessions can be created for
/// - `context`: storage, grading and violation channel handed to each controller
/// - `max_sessions`: upper bound on live (not yet terminated or submitted) sessions
///
/// The map lock is never held across an await and never while talking to a controller;
/// operator actions clone one handle and address that controller alone.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    catalog: Arc<ExamCatalog>,
    context: ControllerContext,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(catalog: Arc<ExamCatalog>, context: ControllerContext, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            catalog,
            context,
            max_sessions,
        }
    }

    pub fn catalog(&self) -> &ExamCatalog {
        &self.catalog
    }

    /// Creates a `Pending` session of `exam_id` for `taker` and starts its controller.
    ///
    /// Refused with [`SessionError::AlreadyActive`] while the taker has a session for the
    /// same exam that has not ended, and with [`SessionError::SessionLimitReached`] once
    /// `max_sessions` sessions are live.
    pub fn create_session(&self, exam_id: &str, taker: Taker) -> Result<SessionHandle, SessionError> {
        let exam = self
            .catalog
            .get(exam_id)
            .ok_or_else(|| SessionError::UnknownExam(exam_id.to_string()))?;
        {
            let sessions = self.sessions.read().map_err(|_| SessionError::Closed)?;
            self.check_admissible(&sessions, exam_id, &taker.id)?;
        }

        // the record is written without holding the map lock
        let session = Session::new(exam, taker, Utc::now());
        let id = session.id;
        let record = SessionRecord {
            session: session.clone(),
            violations: Vec::new(),
        };
        self.context.storage.save_session(&record)?;

        let mut sessions = self.sessions.write().map_err(|_| SessionError::Closed)?;
        if let Err(e) = self.check_admissible(&sessions, exam_id, &session.taker.id) {
            drop(sessions);
            debug!("[{}] Lost creation race: {}", id, e);
            if let Err(cleanup) = self.context.storage.delete_session(id) {
                error!("[{}] Failed to remove refused session record: {}", id, cleanup);
            }
            return Err(e);
        }
        info!(
            "[{}] Created session for {} on exam {}",
            id, session.taker.id, exam_id
        );
        let answers = AnswerBuffer::new(id, Arc::clone(&self.context.storage));
        let handle = self.start(session, exam.clone(), ViolationAccumulator::new(), answers);
        sessions.insert(id, handle.clone());
        Ok(handle)
    }

    fn check_admissible(
        &self,
        sessions: &HashMap<Uuid, SessionHandle>,
        exam_id: &str,
        taker_id: &str,
    ) -> Result<(), SessionError> {
        let mut live = 0usize;
        for handle in sessions.values() {
            let view = handle.view();
            if !view.session.state.is_live() {
                continue;
            }
            if view.session.taker.id == taker_id && view.session.exam_id == exam_id {
                return Err(SessionError::AlreadyActive(handle.id()));
            }
            live += 1;
        }
        if live >= self.max_sessions {
            warn!(
                "Refusing session for {} on {}: limit of {} live sessions reached",
                taker_id, exam_id, self.max_sessions
            );
            return Err(SessionError::SessionLimitReached);
        }
        Ok(())
    }

    fn start(
        &self,
        session: Session,
        exam: ExamConfig,
        violations: ViolationAccumulator,
        answers: AnswerBuffer,
    ) -> SessionHandle {
        let id = session.id;
        let (commands, snapshot) =
            SessionController::spawn(session, exam, violations, answers, self.context.clone());
        SessionHandle::new(id, commands, snapshot)
    }

    pub fn get(&self, session_id: Uuid) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .map_err(|_| SessionError::Closed)?
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::NotFound)
    }

    /// Latest snapshot of every session.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        match self.sessions.read() {
            Ok(sessions) => sessions.values().map(|h| h.view()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Drops every handle. Each controller stops once the last clone of its handle is
    /// gone; session state is already persisted.
    pub fn close(&self) -> usize {
        match self.sessions.write() {
            Ok(mut sessions) => {
                let closed = sessions.len();
                sessions.clear();
                info!("Released {} session handle(s)", closed);
                closed
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds every session that had not been submitted when the process stopped.
    ///
    /// Answers and violations come back from storage; the controllers re-arm the original
    /// deadline, terminate sessions whose deadline passed meanwhile and resubmit
    /// terminated ones.
    pub fn recover(&self) -> Result<usize, SessionError> {
        let records = self.context.storage.get_sessions(Some(unsubmitted()))?;
        let mut restored = 0usize;
        for record in records {
            let id = record.session.id;
            let Some(exam) = self.catalog.get(&record.session.exam_id) else {
                error!(
                    "[{}] Cannot restore session: exam {} is no longer configured",
                    id, record.session.exam_id
                );
                continue;
            };
            let answers = match AnswerBuffer::recover(id, Arc::clone(&self.context.storage)) {
                Ok(answers) => answers,
                Err(e) => {
                    error!("[{}] Cannot restore answers: {}", id, e);
                    continue;
                }
            };
            let violations = ViolationAccumulator::restore(record.violations);
            let mut sessions = self.sessions.write().map_err(|_| SessionError::Closed)?;
            if sessions.contains_key(&id) {
                continue;
            }
            debug!("[{}] Restoring {} session", id, record.session.state);
            let handle = self.start(record.session, exam.clone(), violations, answers);
            sessions.insert(id, handle);
            restored += 1;
        }
        info!("Restored {} session(s) from storage", restored);
        Ok(restored)
    }

    /// Drops submitted sessions whose submission is older than `older_than`, from the
    /// registry and from storage.
    pub fn cleanup_finished_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, SessionError> {
        let removed = {
            let mut sessions = self.sessions.write().map_err(|_| SessionError::Closed)?;
            let expired: Vec<Uuid> = sessions
                .values()
                .filter(|h| {
                    let view = h.view();
                    view.session.state == SessionState::Submitted
                        && view.session.submitted_at.map_or(false, |t| t < older_than)
                })
                .map(|h| h.id())
                .collect();
            for id in &expired {
                sessions.remove(id);
            }
            expired.len()
        };
        let purged = self.context.storage.cleanup_old_sessions(older_than)?;
        if removed > 0 || purged > 0 {
            info!(
                "Retention sweep dropped {} session(s), {} record(s)",
                removed, purged
            );
        }
        Ok(removed)
    }
}
