//! Proctored, timed assessment engine.
//!
//! A taker passes a capability gate, consents to monitoring and begins a timed session.
//! Integrity violations stream into the session's controller, which suspends, terminates
//! and auto-submits according to the exam's violation limit and deadline. Answers are
//! durable as soon as they are written and are submitted exactly once. Supervisors watch
//! every live session through the monitoring aggregator.

pub mod answers;
pub mod capability;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod grading;
pub mod monitoring;
pub mod session_management;
pub mod storage;
pub mod violations;
pub mod web_interface;
