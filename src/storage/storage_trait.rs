//! Storage Trait
//!
//! Backends persist session records and per-question answers. Calls are synchronous and
//! short; the session controller issues them from its own task and owns ordering, so a
//! backend only has to make each individual write durable before returning.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::answers::types::AnswerRecord;
use crate::error_handling::types::StorageError;
use crate::storage::types::{SessionFilter, SessionRecord};

pub trait Storage: Send + Sync {
    /// Saves (or replaces) the record of a session.
    fn save_session(&self, record: &SessionRecord) -> Result<(), StorageError>;

    /// Removes a session record together with its answers. Missing records are not an error.
    fn delete_session(&self, session_id: Uuid) -> Result<(), StorageError>;

    /// Retrieves session records, optionally filtered.
    fn get_sessions(&self, filter: Option<SessionFilter>) -> Result<Vec<SessionRecord>, StorageError>;

    /// Durably stores the latest answer to one question, replacing the previous one.
    /// Must not return `Ok` before the record would survive a crash.
    fn save_answer(&self, session_id: Uuid, answer: &AnswerRecord) -> Result<(), StorageError>;

    /// All stored answers of a session, one per question.
    fn get_answers(&self, session_id: Uuid) -> Result<Vec<AnswerRecord>, StorageError>;

    /// Drops a session's answers once they have been accepted by grading.
    fn clear_answers(&self, session_id: Uuid) -> Result<(), StorageError>;

    /// Removes submitted sessions whose submission is older than `older_than`.
    fn cleanup_old_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError>;
}
