//! Durable session state.
//!
//! Two kinds of records are kept per session: the latest answer for every question (so a
//! crash loses at most the write in flight) and a full snapshot of the session with its
//! violations (so the registry can be rebuilt on restart).
//!
//! Components:
//! - `storage_trait`: the `Storage` trait shared by the backends.
//! - `types`: `SessionRecord` and `SessionFilter`.
//! - `file_storage`: one JSON file per record, written atomically.
//! - `memory_storage`: in-process backend for tests and ephemeral deployments.
//! - `session_filter`: helpers to build session queries.

pub mod file_storage;
pub mod memory_storage;
pub mod session_filter;
pub mod storage_trait;
pub mod types;
