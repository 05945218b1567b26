use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, error};
use uuid::Uuid;

use crate::answers::types::AnswerRecord;
use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{SessionFilter, SessionRecord};

/// Volatile backend. Nothing survives the process, so crash recovery is not available;
/// used by tests and when no storage directory is wanted.
#[derive(Default)]
pub struct MemoryStorage {
    sessions: Mutex<HashMap<Uuid, SessionRecord>>,
    answers: Mutex<HashMap<Uuid, BTreeMap<String, AnswerRecord>>>,
    fail_writes: Mutex<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail, to exercise storage error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_writes.lock() {
            *flag = fail;
        }
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        match self.fail_writes.lock() {
            Ok(flag) if !*flag => Ok(()),
            _ => {
                error!("MemoryStorage rejected a write");
                Err(StorageError::WriteFailed)
            }
        }
    }
}

impl Storage for MemoryStorage {
    fn save_session(&self, record: &SessionRecord) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| StorageError::WriteFailed)?;
        sessions.insert(record.session.id, record.clone());
        Ok(())
    }

    fn delete_session(&self, session_id: Uuid) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| StorageError::WriteFailed)?;
        sessions.remove(&session_id);
        drop(sessions);
        self.clear_answers(session_id)
    }

    fn get_sessions(&self, filter: Option<SessionFilter>) -> Result<Vec<SessionRecord>, StorageError> {
        let sessions = self.sessions.lock().map_err(|_| StorageError::ReadFailed)?;
        let mut records: Vec<SessionRecord> = sessions
            .values()
            .filter(|r| filter.as_ref().map_or(true, |f| f.matches(r)))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.session.created_at);
        Ok(records)
    }

    fn save_answer(&self, session_id: Uuid, answer: &AnswerRecord) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut answers = self.answers.lock().map_err(|_| StorageError::WriteFailed)?;
        answers
            .entry(session_id)
            .or_default()
            .insert(answer.question_id.clone(), answer.clone());
        Ok(())
    }

    fn get_answers(&self, session_id: Uuid) -> Result<Vec<AnswerRecord>, StorageError> {
        let answers = self.answers.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(answers
            .get(&session_id)
            .map(|per_question| per_question.values().cloned().collect())
            .unwrap_or_default())
    }

    fn clear_answers(&self, session_id: Uuid) -> Result<(), StorageError> {
        let mut answers = self.answers.lock().map_err(|_| StorageError::WriteFailed)?;
        answers.remove(&session_id);
        Ok(())
    }

    fn cleanup_old_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut sessions = self.sessions.lock().map_err(|_| StorageError::WriteFailed)?;
        let expired: Vec<Uuid> = sessions
            .values()
            .filter(|r| r.finished_at().map_or(false, |t| t < older_than))
            .map(|r| r.session.id)
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        if let Ok(mut answers) = self.answers.lock() {
            for id in &expired {
                answers.remove(id);
            }
        }
        debug!("Removed {} old session(s) from memory", expired.len());
        Ok(expired.len())
    }
}
