use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema, Set};
use uuid::Uuid;

use super::db_entities::{ActiveModel, Column, Entity, Model};
use super::service::{score, GradingService};
use super::types::{Submission, SubmissionReceipt};
use crate::configuration::catalog::ExamCatalog;
use crate::error_handling::types::{GradingError, StorageError};

/// Grading store on a local SQLite file.
///
/// The session id is the table's primary key and inserts ignore conflicts, so concurrent
/// or repeated submissions for one session leave exactly one row.
pub struct DatabaseGrading {
    db: DatabaseConnection,
    catalog: Arc<ExamCatalog>,
}

impl DatabaseGrading {
    /// Opens (creating if needed) the database at `path` and ensures the schema.
    pub async fn new_file<P: AsRef<Path>>(
        path: P,
        catalog: Arc<ExamCatalog>,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create {}: {}", parent.display(), e);
                StorageError::WriteFailed
            })?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let db = Database::connect(&url).await.map_err(|e| {
            error!("Failed to open grading database {}: {}", path.display(), e);
            StorageError::ConnectionFailed
        })?;

        let backend = db.get_database_backend();
        let mut create = Schema::new(backend).create_table_from_entity(Entity);
        create.if_not_exists();
        db.execute(backend.build(&create)).await.map_err(|e| {
            error!("Failed to create submissions table: {}", e);
            StorageError::WriteFailed
        })?;

        info!("Grading database ready at {}", path.display());
        Ok(Self { db, catalog })
    }

    fn to_receipt(model: &Model, duplicate: bool) -> Result<SubmissionReceipt, GradingError> {
        let session_id = Uuid::parse_str(&model.session_id)
            .map_err(|e| GradingError::Unavailable(format!("corrupt submission row: {}", e)))?;
        let accepted_at = DateTime::parse_from_rfc3339(&model.accepted_at)
            .map_err(|e| GradingError::Unavailable(format!("corrupt submission row: {}", e)))?
            .with_timezone(&Utc);
        Ok(SubmissionReceipt {
            session_id,
            accepted_at,
            score: model.score,
            duplicate,
        })
    }

    /// The stored row for `session_id`, if grading already holds one.
    pub async fn find(&self, session_id: Uuid) -> Result<Option<SubmissionReceipt>, GradingError> {
        let row = Entity::find_by_id(session_id.to_string())
            .one(&self.db)
            .await
            .map_err(|e| GradingError::Unavailable(e.to_string()))?;
        row.map(|m| Self::to_receipt(&m, false)).transpose()
    }
}

#[async_trait]
impl GradingService for DatabaseGrading {
    async fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, GradingError> {
        let answers = serde_json::to_string(&submission.answers)
            .map_err(|e| GradingError::Rejected(format!("unserializable answers: {}", e)))?;
        let termination = submission
            .termination
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| GradingError::Rejected(format!("unserializable termination: {}", e)))?;
        let accepted_at = Utc::now();
        let score = score(&self.catalog, submission);

        let row = ActiveModel {
            session_id: Set(submission.session_id.to_string()),
            exam_id: Set(submission.exam_id.clone()),
            taker_id: Set(submission.taker_id.clone()),
            answers: Set(answers),
            violation_count: Set(submission.violation_count as i64),
            termination: Set(termination),
            submitted_at: Set(submission.submitted_at.to_rfc3339()),
            accepted_at: Set(accepted_at.to_rfc3339()),
            score: Set(score),
        };
        let inserted = Entity::insert(row)
            .on_conflict(OnConflict::column(Column::SessionId).do_nothing().to_owned())
            .exec_without_returning(&self.db)
            .await;

        match inserted {
            Ok(n) if n > 0 => {
                info!(
                    "[{}] Submission stored ({} answer(s), score {:?})",
                    submission.session_id,
                    submission.answers.len(),
                    score
                );
                Ok(SubmissionReceipt {
                    session_id: submission.session_id,
                    accepted_at,
                    score,
                    duplicate: false,
                })
            }
            Ok(_) | Err(DbErr::RecordNotInserted) => {
                debug!(
                    "[{}] Submission already stored, returning first receipt",
                    submission.session_id
                );
                let existing = Entity::find_by_id(submission.session_id.to_string())
                    .one(&self.db)
                    .await
                    .map_err(|e| GradingError::Unavailable(e.to_string()))?
                    .ok_or_else(|| {
                        GradingError::Unavailable("conflicting row disappeared".to_string())
                    })?;
                Self::to_receipt(&existing, true)
            }
            Err(e) => {
                error!(
                    "[{}] Failed to store submission: {}",
                    submission.session_id, e
                );
                Err(GradingError::Unavailable(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::service::tests::{catalog, submission};
    use tempfile::TempDir;

    #[tokio::test]
    async fn stores_one_row_per_session() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let grading = DatabaseGrading::new_file(dir.path().join("grading.sqlite3"), catalog())
            .await
            .unwrap();
        let id = Uuid::new_v4();

        let first = grading
            .submit(&submission(id, &[("q1", "a"), ("q2", "b")]))
            .await
            .unwrap();
        assert!(!first.duplicate);
        assert_eq!(first.score, Some(1.0));

        let again = grading
            .submit(&submission(id, &[("q1", "b")]))
            .await
            .unwrap();
        assert!(again.duplicate);
        assert_eq!(again.score, Some(1.0));
        assert_eq!(again.session_id, id);

        let stored = grading.find(id).await.unwrap().unwrap();
        assert_eq!(stored.score, Some(1.0));
        assert!(grading.find(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reopening_keeps_submissions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("grading.sqlite3");
        let id = Uuid::new_v4();
        {
            let grading = DatabaseGrading::new_file(&path, catalog()).await.unwrap();
            grading.submit(&submission(id, &[])).await.unwrap();
        }
        let grading = DatabaseGrading::new_file(&path, catalog()).await.unwrap();
        assert!(grading.submit(&submission(id, &[])).await.unwrap().duplicate);
    }
}
