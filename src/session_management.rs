//! Session management core module.
//!
//! A session is one taker's attempt at one exam. Its data model and pure transitions live
//! in `session`; `session_controller` runs one actor per session that applies taker
//! requests, operator actions, violations and timers in order; `handle` is the cloneable
//! address of such an actor; `session_registry` tracks every session of the process.

pub mod handle;
pub mod session;
pub mod session_controller;
pub mod session_registry;
pub mod snapshot;

pub use handle::SessionHandle;
pub use session::{DeviceSignals, OperatorNotice, Session, SessionState, Taker, TerminationReason};
pub use session_controller::{ControllerContext, ControllerSettings, SubmitOutcome};
pub use session_registry::SessionRegistry;
pub use snapshot::SessionSnapshot;
