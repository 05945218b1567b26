use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use uuid::Uuid;

use super::types::{AnswerRecord, AnswerSnapshot, AnswerValue};
use crate::error_handling::types::{AnswerError, StorageError};
use crate::storage::storage_trait::Storage;

/// Latest answer per question for one session, mirrored in durable storage.
///
/// Only the owning session controller touches a buffer, which serializes writes; the
/// last write to a question wins.
pub struct AnswerBuffer {
    session_id: Uuid,
    storage: Arc<dyn Storage>,
    entries: BTreeMap<String, AnswerRecord>,
}

impl AnswerBuffer {
    pub fn new(session_id: Uuid, storage: Arc<dyn Storage>) -> Self {
        Self {
            session_id,
            storage,
            entries: BTreeMap::new(),
        }
    }

    /// Rebuilds the buffer from whatever storage holds for `session_id`.
    pub fn recover(session_id: Uuid, storage: Arc<dyn Storage>) -> Result<Self, StorageError> {
        let entries: BTreeMap<String, AnswerRecord> = storage
            .get_answers(session_id)?
            .into_iter()
            .map(|record| (record.question_id.clone(), record))
            .collect();
        if !entries.is_empty() {
            info!(
                "[{}] Recovered {} stored answer(s)",
                session_id,
                entries.len()
            );
        }
        Ok(Self {
            session_id,
            storage,
            entries,
        })
    }

    /// Records `value` as the answer to `question_id`.
    ///
    /// The record is persisted first; if storage fails, the in-memory state is left
    /// untouched and the error is returned so the client can retry.
    pub fn write(
        &mut self,
        question_id: &str,
        value: AnswerValue,
        now: DateTime<Utc>,
    ) -> Result<&AnswerRecord, AnswerError> {
        let revision = self
            .entries
            .get(question_id)
            .map_or(1, |previous| previous.revision + 1);
        let record = AnswerRecord {
            question_id: question_id.to_string(),
            value,
            last_written_at: now,
            revision,
        };
        if let Err(e) = self.storage.save_answer(self.session_id, &record) {
            error!(
                "[{}] Answer to {} not saved: {}",
                self.session_id, question_id, e
            );
            return Err(AnswerError::StorageError(e));
        }
        debug!(
            "[{}] Answer to {} saved (revision {})",
            self.session_id, question_id, revision
        );
        self.entries.insert(question_id.to_string(), record);
        Ok(&self.entries[question_id])
    }

    pub fn get(&self, question_id: &str) -> Option<&AnswerRecord> {
        self.entries.get(question_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deep copy of the current answers; later writes do not affect it.
    pub fn flush(&self, now: DateTime<Utc>) -> AnswerSnapshot {
        AnswerSnapshot {
            taken_at: now,
            answers: self
                .entries
                .iter()
                .map(|(q, record)| (q.clone(), record.value.clone()))
                .collect(),
        }
    }

    /// Drops the buffer after the grading collaborator accepted it.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.storage.clear_answers(self.session_id)?;
        self.entries.clear();
        debug!("[{}] Answer buffer cleared", self.session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file_storage::FileStorage;
    use crate::storage::memory_storage::MemoryStorage;
    use tempfile::TempDir;

    fn single(choice: &str) -> AnswerValue {
        AnswerValue::Single(choice.into())
    }

    #[test]
    fn last_write_wins_and_revisions_count() {
        let mut buffer = AnswerBuffer::new(Uuid::new_v4(), Arc::new(MemoryStorage::new()));
        buffer.write("q1", single("a"), Utc::now()).unwrap();
        let record = buffer.write("q1", single("b"), Utc::now()).unwrap();
        assert_eq!(record.revision, 2);
        assert_eq!(record.value, single("b"));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn flush_is_a_detached_copy() {
        let mut buffer = AnswerBuffer::new(Uuid::new_v4(), Arc::new(MemoryStorage::new()));
        buffer.write("q1", single("a"), Utc::now()).unwrap();
        let snapshot = buffer.flush(Utc::now());
        buffer.write("q1", single("c"), Utc::now()).unwrap();
        buffer.write("q2", single("d"), Utc::now()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.answers["q1"], single("a"));
    }

    #[test]
    fn failed_persist_leaves_buffer_unchanged() {
        let storage = Arc::new(MemoryStorage::new());
        let mut buffer = AnswerBuffer::new(Uuid::new_v4(), storage.clone());
        buffer.write("q1", single("a"), Utc::now()).unwrap();

        storage.set_fail_writes(true);
        assert_eq!(
            buffer.write("q1", single("b"), Utc::now()).unwrap_err(),
            AnswerError::StorageError(StorageError::WriteFailed)
        );
        assert_eq!(buffer.get("q1").unwrap().value, single("a"));
        assert_eq!(buffer.get("q1").unwrap().revision, 1);
    }

    #[test]
    fn acknowledged_writes_survive_restart() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        {
            let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
            let mut buffer = AnswerBuffer::new(id, storage);
            buffer.write("q1", single("a"), Utc::now()).unwrap();
            buffer.write("q2", AnswerValue::Text("essay".into()), Utc::now()).unwrap();
            buffer.write("q1", single("b"), Utc::now()).unwrap();
            // process dies here: buffer dropped without flush
        }

        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
        let recovered = AnswerBuffer::recover(id, storage).unwrap();
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered.get("q1").unwrap().value, single("b"));
        assert_eq!(recovered.get("q1").unwrap().revision, 2);
        let snapshot = recovered.flush(Utc::now());
        assert_eq!(snapshot.answers["q2"], AnswerValue::Text("essay".into()));
    }

    #[test]
    fn clear_removes_durable_copy() {
        let storage = Arc::new(MemoryStorage::new());
        let id = Uuid::new_v4();
        let mut buffer = AnswerBuffer::new(id, storage.clone());
        buffer.write("q1", single("a"), Utc::now()).unwrap();
        buffer.clear().unwrap();
        assert!(buffer.is_empty());
        assert!(storage.get_answers(id).unwrap().is_empty());
    }
}
