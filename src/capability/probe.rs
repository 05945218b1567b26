use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use super::types::{CapabilityCheck, CapabilityReport, CheckResult, CheckStatus};
use crate::error_handling::types::EnvironmentCommitError;

/// Source of capability checks.
///
/// Each check is independent and synchronous; failures are reported in the
/// [`CapabilityReport`], never raised.
pub trait CapabilityProbe {
    /// Runs a single check.
    fn check(&self, check: CapabilityCheck) -> CheckResult;

    /// Runs every required check and collects the results.
    fn run(&self) -> CapabilityReport {
        let results: BTreeMap<CapabilityCheck, CheckResult> = CapabilityCheck::REQUIRED
            .iter()
            .map(|c| (*c, self.check(*c)))
            .collect();
        CapabilityReport::new(results)
    }
}

/// Second phase of the fullscreen check: performs the real switch into the monitored
/// environment. Invoked by the session controller while it transitions to `Active`, so it
/// can fail even though the earlier report said fullscreen was allowed.
pub trait EnvironmentCommit: Send {
    fn commit(&mut self) -> Result<(), EnvironmentCommitError>;
}

impl<F> EnvironmentCommit for F
where
    F: FnMut() -> Result<(), EnvironmentCommitError> + Send,
{
    fn commit(&mut self) -> Result<(), EnvironmentCommitError> {
        self()
    }
}

/// Capabilities measured by the taker's client and sent with the admission request.
///
/// Checks missing from the payload are reported as `Checking`, which keeps the gate closed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportedCapabilities {
    #[serde(default)]
    pub checks: BTreeMap<CapabilityCheck, CheckResult>,
}

impl ReportedCapabilities {
    pub fn with(mut self, check: CapabilityCheck, status: CheckStatus) -> Self {
        self.checks.insert(
            check,
            CheckResult {
                status,
                detail: None,
            },
        );
        self
    }

    /// Every required check reported as working.
    pub fn all_working() -> Self {
        CapabilityCheck::REQUIRED
            .iter()
            .fold(Self::default(), |acc, c| acc.with(*c, CheckStatus::Working))
    }
}

impl CapabilityProbe for ReportedCapabilities {
    fn check(&self, check: CapabilityCheck) -> CheckResult {
        let result = self.checks.get(&check).cloned().unwrap_or(CheckResult {
            status: CheckStatus::Checking,
            detail: Some("not reported".to_string()),
        });
        debug!("capability {} reported as {:?}", check, result.status);
        result
    }
}

/// Result of the client's fullscreen request, taken at the moment it asks to begin.
///
/// On targets without a fullscreen concept the client reports `entered = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedCommit {
    pub entered: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ReportedCommit {
    pub fn entered() -> Self {
        Self {
            entered: true,
            detail: None,
        }
    }

    pub fn denied(detail: impl Into<String>) -> Self {
        Self {
            entered: false,
            detail: Some(detail.into()),
        }
    }
}

impl EnvironmentCommit for ReportedCommit {
    fn commit(&mut self) -> Result<(), EnvironmentCommitError> {
        if self.entered {
            Ok(())
        } else {
            Err(EnvironmentCommitError(
                self.detail
                    .clone()
                    .unwrap_or_else(|| "fullscreen request was denied".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_reports_keep_the_gate_closed() {
        let probe = ReportedCapabilities::default()
            .with(CapabilityCheck::Audio, CheckStatus::Working)
            .with(CapabilityCheck::Video, CheckStatus::Working);
        let report = probe.run();
        assert!(!report.eligible());
        assert_eq!(
            report.failing_checks(),
            vec![CapabilityCheck::Network, CapabilityCheck::Fullscreen]
        );
    }

    #[test]
    fn all_working_probe_admits() {
        assert!(ReportedCapabilities::all_working().run().eligible());
    }

    #[test]
    fn denied_commit_carries_detail() {
        let mut commit = ReportedCommit {
            entered: false,
            detail: Some("user dismissed prompt".into()),
        };
        assert_eq!(
            commit.commit(),
            Err(EnvironmentCommitError("user dismissed prompt".into()))
        );

        let mut ok = ReportedCommit {
            entered: true,
            detail: None,
        };
        assert!(ok.commit().is_ok());
    }

    #[test]
    fn closures_can_commit() {
        let mut calls = 0;
        let mut commit = move || {
            calls += 1;
            if calls == 1 {
                Err(EnvironmentCommitError("not yet".into()))
            } else {
                Ok(())
            }
        };
        assert!(commit.commit().is_err());
        assert!(commit.commit().is_ok());
    }
}
