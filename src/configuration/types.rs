use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::answers::types::AnswerValue;
use crate::error_handling::types::AnswerError;

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub web_ui_enabled: bool,
    pub web_ui_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            web_ui_enabled: true,
            web_ui_port: 8080,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for answer buffers and session records.
    pub path: PathBuf,
    /// SQLite file of the grading store, relative to `path` unless absolute.
    pub database_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vigil-data"),
            database_file: PathBuf::from("grading.sqlite3"),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        if self.database_file.is_absolute() {
            self.database_file.clone()
        } else {
            self.path.join(&self.database_file)
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Upper bound on sessions held by the registry at once.
    pub max_sessions: usize,
    /// How long submitted sessions stay listed before the retention sweep drops them.
    pub retention_secs: u64,
    /// Backoff between automatic resubmissions of a terminated session.
    pub submit_retry_secs: u64,
    /// Suspend on any high-severity violation, not only on environment exits.
    pub suspend_on_high_severity: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            retention_secs: 86_400,
            submit_retry_secs: 15,
            suspend_on_high_severity: true,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Maximum age of the supervisor projection before it is rebuilt.
    pub refresh_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 5,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Single,
    Multiple,
    Text,
}

/// Constraints for one question. The question text lives with the question bank; the
/// engine only needs enough to validate answers and score them.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct QuestionConfig {
    pub id: String,
    pub kind: QuestionKind,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub correct: Option<AnswerValue>,
}

impl QuestionConfig {
    /// Checks `value` against the question's kind and options.
    pub fn accepts(&self, value: &AnswerValue) -> Result<(), AnswerError> {
        let known = |choice: &String| self.options.is_empty() || self.options.contains(choice);
        match (self.kind, value) {
            (QuestionKind::Single, AnswerValue::Single(choice)) => {
                if known(choice) {
                    Ok(())
                } else {
                    Err(AnswerError::InvalidValue(format!(
                        "'{}' is not an option of {}",
                        choice, self.id
                    )))
                }
            }
            (QuestionKind::Multiple, AnswerValue::Multiple(choices)) => {
                match choices.iter().find(|c| !known(*c)) {
                    Some(c) => Err(AnswerError::InvalidValue(format!(
                        "'{}' is not an option of {}",
                        c, self.id
                    ))),
                    None => Ok(()),
                }
            }
            (QuestionKind::Text, AnswerValue::Text(text)) => match self.max_length {
                Some(max) if text.chars().count() > max => Err(AnswerError::InvalidValue(
                    format!("answer to {} exceeds {} characters", self.id, max),
                )),
                _ => Ok(()),
            },
            (kind, _) => Err(AnswerError::InvalidValue(format!(
                "{} expects a {:?} answer",
                self.id, kind
            ))),
        }
    }

    /// Whether `value` matches the configured correct answer. Multiple-choice answers
    /// compare as sets.
    pub fn is_correct(&self, value: &AnswerValue) -> Option<bool> {
        let correct = self.correct.as_ref()?;
        Some(match (correct, value) {
            (AnswerValue::Multiple(expected), AnswerValue::Multiple(given)) => {
                let mut expected = expected.clone();
                let mut given = given.clone();
                expected.sort();
                expected.dedup();
                given.sort();
                given.dedup();
                expected == given
            }
            (AnswerValue::Text(expected), AnswerValue::Text(given)) => {
                expected.trim().eq_ignore_ascii_case(given.trim())
            }
            (expected, given) => expected == given,
        })
    }
}

/// Exam parameters copied into each session at creation time.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ExamConfig {
    pub id: String,
    pub title: String,
    pub duration_secs: u64,
    #[serde(default)]
    pub grace_secs: u64,
    pub max_violations: u32,
    #[serde(default)]
    pub questions: Vec<QuestionConfig>,
}

impl ExamConfig {
    pub fn question(&self, question_id: &str) -> Option<&QuestionConfig> {
        self.questions.iter().find(|q| q.id == question_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single() -> QuestionConfig {
        QuestionConfig {
            id: "q1".into(),
            kind: QuestionKind::Single,
            options: vec!["a".into(), "b".into()],
            max_length: None,
            correct: Some(AnswerValue::Single("b".into())),
        }
    }

    #[test]
    fn accepts_matching_kind_and_option() {
        let q = single();
        assert!(q.accepts(&AnswerValue::Single("a".into())).is_ok());
        assert!(matches!(
            q.accepts(&AnswerValue::Single("z".into())),
            Err(AnswerError::InvalidValue(_))
        ));
        assert!(matches!(
            q.accepts(&AnswerValue::Text("a".into())),
            Err(AnswerError::InvalidValue(_))
        ));
    }

    #[test]
    fn text_length_is_bounded() {
        let q = QuestionConfig {
            id: "essay".into(),
            kind: QuestionKind::Text,
            options: vec![],
            max_length: Some(5),
            correct: None,
        };
        assert!(q.accepts(&AnswerValue::Text("héllo".into())).is_ok());
        assert!(q.accepts(&AnswerValue::Text("too long".into())).is_err());
        assert_eq!(q.is_correct(&AnswerValue::Text("x".into())), None);
    }

    #[test]
    fn multiple_choice_scores_as_a_set() {
        let q = QuestionConfig {
            id: "m".into(),
            kind: QuestionKind::Multiple,
            options: vec!["a".into(), "b".into(), "c".into()],
            max_length: None,
            correct: Some(AnswerValue::Multiple(vec!["a".into(), "c".into()])),
        };
        assert_eq!(
            q.is_correct(&AnswerValue::Multiple(vec!["c".into(), "a".into(), "a".into()])),
            Some(true)
        );
        assert_eq!(
            q.is_correct(&AnswerValue::Multiple(vec!["a".into()])),
            Some(false)
        );
        assert_eq!(single().is_correct(&AnswerValue::Single("b".into())), Some(true));
    }
}
