//! Pre-admission capability gate.
//!
//! A probe reports whether the taker's environment can be monitored (audio, video,
//! network, fullscreen). Fullscreen is two-phase: the report only says it is *allowed*,
//! the actual switch is an [`EnvironmentCommit`] run by the session controller at the
//! instant the session becomes active.

pub mod probe;
pub mod types;

pub use probe::{CapabilityProbe, EnvironmentCommit, ReportedCapabilities, ReportedCommit};
pub use types::{CapabilityCheck, CapabilityReport, CheckResult, CheckStatus};
