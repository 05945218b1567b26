//! Supervisor-facing read side.
//!
//! The aggregator keeps a projection of every session built from controller snapshots.
//! It is rebuilt on a fixed interval and whenever a reader finds it older than that
//! interval, and every response carries the time it was built. Operator actions bypass
//! the projection and go to the target session's controller.

pub mod aggregator;
pub mod types;

pub use aggregator::Aggregator;
pub use types::{MonitoringFilter, MonitoringList, MonitoringStats, MonitoringView};
