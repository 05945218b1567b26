use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::answers::types::AnswerRecord;
use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{SessionFilter, SessionRecord};

/// Filesystem backend.
///
/// ```text
/// <base>/sessions/<session-id>.json
/// <base>/answers/<session-id>/<question-id>.json
/// ```
///
/// Every file is written to a temporary sibling, synced and renamed into place, so a
/// reader sees either the previous record or the new one.
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        for dir in [base_path.join("sessions"), base_path.join("answers")] {
            fs::create_dir_all(&dir).map_err(|e| {
                error!("Failed to create storage dir {}: {}", dir.display(), e);
                StorageError::WriteFailed
            })?;
        }
        info!("FileStorage initialized at {}", base_path.display());
        Ok(Self { base_path })
    }

    fn sessions_dir(&self) -> PathBuf {
        self.base_path.join("sessions")
    }

    fn answers_dir_for(&self, id: Uuid) -> PathBuf {
        self.base_path.join("answers").join(id.to_string())
    }

    fn session_file_path(&self, id: Uuid) -> PathBuf {
        self.sessions_dir().join(format!("{}.json", id))
    }

    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(value).map_err(|e| {
            error!("Failed to serialize {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        let tmp = path.with_extension("json.tmp");
        let mut f = File::create(&tmp).map_err(|e| {
            error!("Failed to create {}: {}", tmp.display(), e);
            StorageError::WriteFailed
        })?;
        f.write_all(&body)
            .and_then(|_| f.sync_all())
            .map_err(|e| {
                error!("Failed to write {}: {}", tmp.display(), e);
                StorageError::WriteFailed
            })?;
        fs::rename(&tmp, path).map_err(|e| {
            error!("Failed to move {} into place: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        // persist the rename itself
        if let Some(parent) = path.parent() {
            if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
                debug!("Directory sync of {} skipped: {}", parent.display(), e);
            }
        }
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
        let raw = fs::read(path).map_err(|e| {
            error!("Failed to read {}: {}", path.display(), e);
            StorageError::ReadFailed
        })?;
        serde_json::from_slice(&raw).map_err(|e| {
            error!("Corrupt record {}: {}", path.display(), e);
            StorageError::ReadFailed
        })
    }

    /// `.json` files of `dir`, skipping temporaries left by an interrupted write.
    fn json_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
        let entries = fs::read_dir(dir).map_err(|e| {
            error!("Failed to read dir {}: {}", dir.display(), e);
            StorageError::ReadFailed
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| {
                    error!("Dir entry error: {}", e);
                    StorageError::ReadFailed
                })?
                .path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl Storage for FileStorage {
    fn save_session(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let path = self.session_file_path(record.session.id);
        self.write_atomic(&path, record)?;
        debug!(
            "[{}] Saved session record ({}) to {}",
            record.session.id,
            record.session.state,
            path.display()
        );
        Ok(())
    }

    fn delete_session(&self, session_id: Uuid) -> Result<(), StorageError> {
        let path = self.session_file_path(session_id);
        match fs::remove_file(&path) {
            Ok(()) => debug!("[{}] Deleted session record", session_id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!("Failed to remove {}: {}", path.display(), e);
                return Err(StorageError::WriteFailed);
            }
        }
        self.clear_answers(session_id)
    }

    fn get_sessions(&self, filter: Option<SessionFilter>) -> Result<Vec<SessionRecord>, StorageError> {
        let mut records = Vec::new();
        for path in Self::json_files(&self.sessions_dir())? {
            match Self::read_json::<SessionRecord>(&path) {
                Ok(record) => records.push(record),
                Err(_) => warn!("Skipping unreadable session record {}", path.display()),
            }
        }
        let original_len = records.len();
        if let Some(f) = filter {
            records.retain(|r| f.matches(r));
        }
        debug!(
            "Loaded {} session(s), {} after filter",
            original_len,
            records.len()
        );
        Ok(records)
    }

    fn save_answer(&self, session_id: Uuid, answer: &AnswerRecord) -> Result<(), StorageError> {
        let dir = self.answers_dir_for(session_id);
        fs::create_dir_all(&dir).map_err(|e| {
            error!("Failed to create answers dir {}: {}", dir.display(), e);
            StorageError::WriteFailed
        })?;
        let path = dir.join(format!("{}.json", answer.question_id));
        self.write_atomic(&path, answer)?;
        debug!(
            "[{}] Persisted answer {} (revision {})",
            session_id, answer.question_id, answer.revision
        );
        Ok(())
    }

    fn get_answers(&self, session_id: Uuid) -> Result<Vec<AnswerRecord>, StorageError> {
        let dir = self.answers_dir_for(session_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        Self::json_files(&dir)?
            .iter()
            .map(|path| Self::read_json(path))
            .collect()
    }

    fn clear_answers(&self, session_id: Uuid) -> Result<(), StorageError> {
        let dir = self.answers_dir_for(session_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("[{}] Cleared stored answers", session_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!("Failed to remove {}: {}", dir.display(), e);
                Err(StorageError::WriteFailed)
            }
        }
    }

    fn cleanup_old_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0usize;
        for record in self.get_sessions(None)? {
            let Some(finished) = record.finished_at() else {
                continue;
            };
            if finished < older_than {
                let id = record.session.id;
                let _ = fs::remove_file(self.session_file_path(id));
                let _ = fs::remove_dir_all(self.answers_dir_for(id));
                removed += 1;
            }
        }
        info!(
            "Removed {} old session(s) (cutoff: {})",
            removed,
            older_than.to_rfc3339()
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answers::types::AnswerValue;
    use crate::configuration::types::ExamConfig;
    use crate::grading::types::SubmissionReceipt;
    use crate::session_management::session::{Session, SessionState, Taker};
    use crate::storage::session_filter::{by_state, by_taker_and_exam, unsubmitted};
    use crate::violations::types::{Severity, Violation, ViolationKind};
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(taker: &str) -> SessionRecord {
        let exam = ExamConfig {
            id: "chem".into(),
            title: "Chemistry".into(),
            duration_secs: 60,
            grace_secs: 0,
            max_violations: 3,
            questions: vec![],
        };
        let taker = Taker {
            id: taker.into(),
            name: taker.to_uppercase(),
            department: "Science".into(),
        };
        let session = Session::new(&exam, taker, Utc::now());
        let violation = Violation::new("v1", session.id, ViolationKind::TabSwitch, Severity::Low);
        SessionRecord {
            session,
            violations: vec![violation],
        }
    }

    fn answer(question: &str, text: &str, revision: u64) -> AnswerRecord {
        AnswerRecord {
            question_id: question.into(),
            value: AnswerValue::Text(text.into()),
            last_written_at: Utc::now(),
            revision,
        }
    }

    #[test]
    fn test_save_and_get_session() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let a = record("alice");
        let mut b = record("bob");
        b.session.state = SessionState::Active;
        storage.save_session(&a).unwrap();
        storage.save_session(&b).unwrap();

        let all = storage.get_sessions(None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&a));

        let active = storage.get_sessions(Some(by_state(SessionState::Active))).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session.id, b.session.id);

        let alice = storage
            .get_sessions(Some(by_taker_and_exam("alice", "chem")))
            .unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].violations.len(), 1);
    }

    #[test]
    fn test_delete_session_removes_record_and_answers() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let a = record("alice");
        let id = a.session.id;
        storage.save_session(&a).unwrap();
        storage.save_answer(id, &answer("q1", "x", 1)).unwrap();

        storage.delete_session(id).unwrap();
        assert!(storage.get_sessions(None).unwrap().is_empty());
        assert!(storage.get_answers(id).unwrap().is_empty());
        // already gone
        storage.delete_session(id).unwrap();
    }

    #[test]
    fn test_answers_replace_per_question() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let id = Uuid::new_v4();
        storage.save_answer(id, &answer("q1", "first", 1)).unwrap();
        storage.save_answer(id, &answer("q2", "other", 1)).unwrap();
        storage.save_answer(id, &answer("q1", "second", 2)).unwrap();

        let answers = storage.get_answers(id).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[0].value, AnswerValue::Text("second".into()));
        assert_eq!(answers[0].revision, 2);

        storage.clear_answers(id).unwrap();
        assert!(storage.get_answers(id).unwrap().is_empty());
        storage.clear_answers(id).unwrap();
    }

    #[test]
    fn test_answers_survive_reopen_and_ignore_partial_writes() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        {
            let storage = FileStorage::new(dir.path()).unwrap();
            storage.save_answer(id, &answer("q1", "kept", 1)).unwrap();
        }
        // what a crash between create and rename leaves behind
        fs::write(
            dir.path().join("answers").join(id.to_string()).join("q2.json.tmp"),
            b"{\"question_id\":",
        )
        .unwrap();

        let reopened = FileStorage::new(dir.path()).unwrap();
        let answers = reopened.get_answers(id).unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].question_id, "q1");
    }

    #[test]
    fn test_cleanup_only_removes_old_submissions() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let now = Utc::now();

        let mut old = record("old");
        old.session.state = SessionState::Submitted;
        old.session.submitted_at = Some(now - Duration::days(2));
        old.session.receipt = Some(SubmissionReceipt {
            session_id: old.session.id,
            accepted_at: now - Duration::days(2),
            score: None,
            duplicate: false,
        });
        let mut terminated = record("terminated");
        terminated.session.state = SessionState::Terminated;
        let mut recent = record("recent");
        recent.session.state = SessionState::Submitted;
        recent.session.submitted_at = Some(now);

        for r in [&old, &terminated, &recent] {
            storage.save_session(r).unwrap();
        }
        storage.save_answer(old.session.id, &answer("q1", "x", 1)).unwrap();

        let removed = storage
            .cleanup_old_sessions(now - Duration::days(1))
            .unwrap();
        assert_eq!(removed, 1);
        let left = storage.get_sessions(None).unwrap();
        assert_eq!(left.len(), 2);
        assert!(storage.get_answers(old.session.id).unwrap().is_empty());

        let pending = storage.get_sessions(Some(unsubmitted())).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].session.taker.id, "terminated");
    }
}
