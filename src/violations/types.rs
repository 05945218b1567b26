use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of integrity anomaly reported by a signal source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    TabSwitch,
    CopyPaste,
    FaceNotVisible,
    MultipleFaces,
    CameraLost,
    MicrophoneLost,
    FullscreenExit,
    Timeout,
    #[serde(other)]
    Other,
}

impl ViolationKind {
    /// Anomalies that leave the monitored environment and must be acknowledged by the
    /// taker before the session continues.
    pub fn requires_acknowledgement(self) -> bool {
        matches!(self, ViolationKind::TabSwitch | ViolationKind::FullscreenExit)
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationKind::TabSwitch => "tab-switch",
            ViolationKind::CopyPaste => "copy-paste",
            ViolationKind::FaceNotVisible => "face-not-visible",
            ViolationKind::MultipleFaces => "multiple-faces",
            ViolationKind::CameraLost => "camera-lost",
            ViolationKind::MicrophoneLost => "microphone-lost",
            ViolationKind::FullscreenExit => "fullscreen-exit",
            ViolationKind::Timeout => "timeout",
            ViolationKind::Other => "other",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A detected integrity anomaly.
///
/// `id` is assigned by the signal source and must be globally unique; it is the
/// deduplication key under at-least-once delivery. Only `resolved` ever changes after
/// the violation is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: String,
    pub session_id: Uuid,
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub description: String,
    /// Set by the source when this single event must end the session
    /// (e.g. a timeout after missed heartbeats).
    #[serde(default)]
    pub terminal: bool,
}

impl Violation {
    pub fn new(
        id: impl Into<String>,
        session_id: Uuid,
        kind: ViolationKind,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            session_id,
            kind,
            severity,
            timestamp: Utc::now(),
            resolved: false,
            description: String::new(),
            terminal: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn immediately_terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_type_and_kebab_case() {
        let v = Violation::new("v-1", Uuid::nil(), ViolationKind::TabSwitch, Severity::High);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["type"], "tab-switch");
        assert_eq!(json["severity"], "high");
    }

    #[test]
    fn unknown_kinds_and_missing_flags_are_tolerated() {
        let json = format!(
            r#"{{"id":"x","session_id":"{}","type":"eye-tracking","severity":"low","timestamp":"2024-05-01T10:00:00Z"}}"#,
            Uuid::nil()
        );
        let v: Violation = serde_json::from_str(&json).unwrap();
        assert_eq!(v.kind, ViolationKind::Other);
        assert!(!v.resolved);
        assert!(!v.terminal);
    }

    #[test]
    fn only_environment_exits_need_acknowledgement() {
        assert!(ViolationKind::TabSwitch.requires_acknowledgement());
        assert!(ViolationKind::FullscreenExit.requires_acknowledgement());
        assert!(!ViolationKind::CopyPaste.requires_acknowledgement());
        assert!(!ViolationKind::Timeout.requires_acknowledgement());
    }
}
