use std::collections::{BTreeMap, HashSet};

use super::types::{Severity, Violation};
use crate::error_handling::types::ViolationError;

/// Ordered, deduplicated violation log for one session.
///
/// Violations are never removed, so the total count only grows and a breached threshold
/// stays breached even when individual entries are resolved afterwards.
#[derive(Debug, Clone, Default)]
pub struct ViolationAccumulator {
    entries: Vec<Violation>,
    seen: HashSet<String>,
    terminal: bool,
}

impl ViolationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the log from persisted violations, keeping their order.
    pub fn restore(violations: Vec<Violation>) -> Self {
        let mut acc = Self::new();
        for v in violations {
            acc.append(v);
        }
        acc
    }

    /// Appends `violation` unless its id was already recorded. Returns whether it was
    /// accepted.
    pub fn append(&mut self, violation: Violation) -> bool {
        if !self.seen.insert(violation.id.clone()) {
            return false;
        }
        self.terminal |= violation.terminal;
        self.entries.push(violation);
        true
    }

    pub fn count(&self, unresolved_only: bool) -> usize {
        if unresolved_only {
            self.entries.iter().filter(|v| !v.resolved).count()
        } else {
            self.entries.len()
        }
    }

    /// Whether the session must be ended: the total count (resolved or not, any severity)
    /// reached `max`, or a source flagged a violation as immediately terminal.
    pub fn threshold_breached(&self, max: u32) -> bool {
        self.terminal || self.entries.len() >= max as usize
    }

    /// Marks a violation resolved. Returns `false` if it already was.
    pub fn resolve(&mut self, violation_id: &str) -> Result<bool, ViolationError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|v| v.id == violation_id)
            .ok_or_else(|| ViolationError::UnknownViolation(violation_id.to_string()))?;
        let changed = !entry.resolved;
        entry.resolved = true;
        Ok(changed)
    }

    pub fn get(&self, violation_id: &str) -> Option<&Violation> {
        self.entries.iter().find(|v| v.id == violation_id)
    }

    /// Violations in arrival order.
    pub fn violations(&self) -> &[Violation] {
        &self.entries
    }

    pub fn count_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for v in &self.entries {
            *counts.entry(v.severity).or_insert(0) += 1;
        }
        counts
    }
}
