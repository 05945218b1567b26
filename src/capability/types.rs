use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One environment check performed before admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCheck {
    Audio,
    Video,
    Network,
    Fullscreen,
}

impl CapabilityCheck {
    /// Checks that gate admission.
    pub const REQUIRED: [CapabilityCheck; 4] = [
        CapabilityCheck::Audio,
        CapabilityCheck::Video,
        CapabilityCheck::Network,
        CapabilityCheck::Fullscreen,
    ];
}

impl fmt::Display for CapabilityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapabilityCheck::Audio => "audio",
            CapabilityCheck::Video => "video",
            CapabilityCheck::Network => "network",
            CapabilityCheck::Fullscreen => "fullscreen",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a single check.
///
/// `Failed` covers a present-but-denied capability (permission refused, device busy),
/// `Unsupported` an absent one. `Checking` means the probe has not settled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Working,
    Failed,
    Checking,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

impl CheckResult {
    pub fn working() -> Self {
        Self {
            status: CheckStatus::Working,
            detail: None,
        }
    }

    pub fn with_status(status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }
}

/// Transient result of one probe run, consumed once by admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub results: BTreeMap<CapabilityCheck, CheckResult>,
    pub checked_at: DateTime<Utc>,
}

impl CapabilityReport {
    pub fn new(results: BTreeMap<CapabilityCheck, CheckResult>) -> Self {
        Self {
            results,
            checked_at: Utc::now(),
        }
    }

    /// Status of `check`; a check that was never run counts as still `Checking`.
    pub fn status(&self, check: CapabilityCheck) -> CheckStatus {
        self.results
            .get(&check)
            .map(|r| r.status)
            .unwrap_or(CheckStatus::Checking)
    }

    /// Required checks that are not `Working`, in check order.
    pub fn failing_checks(&self) -> Vec<CapabilityCheck> {
        CapabilityCheck::REQUIRED
            .iter()
            .copied()
            .filter(|c| self.status(*c) != CheckStatus::Working)
            .collect()
    }

    /// Logical AND of every required check.
    pub fn eligible(&self) -> bool {
        self.failing_checks().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(statuses: &[(CapabilityCheck, CheckStatus)]) -> CapabilityReport {
        CapabilityReport::new(
            statuses
                .iter()
                .map(|(c, s)| {
                    (
                        *c,
                        CheckResult {
                            status: *s,
                            detail: None,
                        },
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn all_working_is_eligible() {
        let r = report(&[
            (CapabilityCheck::Audio, CheckStatus::Working),
            (CapabilityCheck::Video, CheckStatus::Working),
            (CapabilityCheck::Network, CheckStatus::Working),
            (CapabilityCheck::Fullscreen, CheckStatus::Working),
        ]);
        assert!(r.eligible());
        assert!(r.failing_checks().is_empty());
    }

    #[test]
    fn failing_checks_name_every_blocker() {
        let r = report(&[
            (CapabilityCheck::Audio, CheckStatus::Working),
            (CapabilityCheck::Video, CheckStatus::Failed),
            (CapabilityCheck::Network, CheckStatus::Working),
        ]);
        assert!(!r.eligible());
        // fullscreen was never reported, so it is still pending
        assert_eq!(
            r.failing_checks(),
            vec![CapabilityCheck::Video, CapabilityCheck::Fullscreen]
        );
        assert_eq!(r.status(CapabilityCheck::Fullscreen), CheckStatus::Checking);
    }

    #[test]
    fn unsupported_blocks_admission() {
        let r = report(&[
            (CapabilityCheck::Audio, CheckStatus::Unsupported),
            (CapabilityCheck::Video, CheckStatus::Working),
            (CapabilityCheck::Network, CheckStatus::Working),
            (CapabilityCheck::Fullscreen, CheckStatus::Working),
        ]);
        assert_eq!(r.failing_checks(), vec![CapabilityCheck::Audio]);
    }

    #[test]
    fn statuses_serialize_in_snake_case() {
        let json = serde_json::to_string(&CheckStatus::Unsupported).unwrap();
        assert_eq!(json, "\"unsupported\"");
        let check: CapabilityCheck = serde_json::from_str("\"fullscreen\"").unwrap();
        assert_eq!(check, CapabilityCheck::Fullscreen);
    }
}
