use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use super::types::{Submission, SubmissionReceipt};
use crate::configuration::catalog::ExamCatalog;
use crate::error_handling::types::GradingError;

/// Receives finished sessions.
///
/// Implementations must be idempotent per session id: a repeated submission returns the
/// first receipt with `duplicate` set instead of storing anything new.
#[async_trait]
pub trait GradingService: Send + Sync {
    async fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, GradingError>;
}

/// Fraction of auto-gradable questions answered correctly, `None` when the exam has no
/// question with a configured answer.
pub fn score(catalog: &ExamCatalog, submission: &Submission) -> Option<f64> {
    let exam = catalog.get(&submission.exam_id)?;
    let mut gradable = 0usize;
    let mut correct = 0usize;
    for question in exam.questions.iter().filter(|q| q.correct.is_some()) {
        gradable += 1;
        let right = submission
            .answers
            .answers
            .get(&question.id)
            .and_then(|given| question.is_correct(given))
            .unwrap_or(false);
        if right {
            correct += 1;
        }
    }
    (gradable > 0).then(|| correct as f64 / gradable as f64)
}

/// Keeps receipts in memory. Used when no grading database is configured and by tests,
/// which can make it report outages.
pub struct InMemoryGrading {
    catalog: Arc<ExamCatalog>,
    receipts: Mutex<HashMap<Uuid, SubmissionReceipt>>,
    outages: Mutex<u32>,
    attempts: Mutex<u32>,
}

impl InMemoryGrading {
    pub fn new(catalog: Arc<ExamCatalog>) -> Self {
        Self {
            catalog,
            receipts: Mutex::new(HashMap::new()),
            outages: Mutex::new(0),
            attempts: Mutex::new(0),
        }
    }

    /// The next `count` submissions fail with [`GradingError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        if let Ok(mut outages) = self.outages.lock() {
            *outages = count;
        }
    }

    /// Submissions seen, including failed and duplicate ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.lock().map(|a| *a).unwrap_or(0)
    }

    /// Sessions with a stored submission.
    pub fn accepted(&self) -> usize {
        self.receipts.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl GradingService for InMemoryGrading {
    async fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, GradingError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            *attempts += 1;
        }
        if let Ok(mut outages) = self.outages.lock() {
            if *outages > 0 {
                *outages -= 1;
                warn!(
                    "[{}] Grading unavailable, submission not stored",
                    submission.session_id
                );
                return Err(GradingError::Unavailable("grading offline".to_string()));
            }
        }

        let mut receipts = self
            .receipts
            .lock()
            .map_err(|_| GradingError::Unavailable("receipt store poisoned".to_string()))?;
        if let Some(existing) = receipts.get(&submission.session_id) {
            return Ok(SubmissionReceipt {
                duplicate: true,
                ..existing.clone()
            });
        }
        let receipt = SubmissionReceipt {
            session_id: submission.session_id,
            accepted_at: Utc::now(),
            score: score(&self.catalog, submission),
            duplicate: false,
        };
        receipts.insert(submission.session_id, receipt.clone());
        info!(
            "[{}] Submission accepted ({} answer(s))",
            submission.session_id,
            submission.answers.len()
        );
        Ok(receipt)
    }
}
