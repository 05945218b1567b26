use std::collections::HashMap;

use super::types::ExamConfig;

/// Read-only lookup of configured exams by id.
///
/// Stands in for the question bank: sessions only need an exam's limits, its ordered
/// question constraints and the question count for progress display.
#[derive(Debug, Clone, Default)]
pub struct ExamCatalog {
    exams: HashMap<String, ExamConfig>,
}

impl ExamCatalog {
    pub fn new(exams: Vec<ExamConfig>) -> Self {
        Self {
            exams: exams.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    pub fn get(&self, exam_id: &str) -> Option<&ExamConfig> {
        self.exams.get(exam_id)
    }

    pub fn len(&self) -> usize {
        self.exams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exams.is_empty()
    }
}
