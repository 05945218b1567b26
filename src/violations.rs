//! Integrity violations: the event model, the per-session accumulator and the
//! delivery channel from signal sources into session controllers.

pub mod accumulator;
pub mod channel;
pub mod types;

pub use accumulator::ViolationAccumulator;
pub use channel::ViolationChannel;
pub use types::{Severity, Violation, ViolationKind};
