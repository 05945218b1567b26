//! The grading collaborator that accepts submissions.
//!
//! Components:
//! - `types`: `Submission` and `SubmissionReceipt`.
//! - `service`: the `GradingService` trait, scoring and the in-memory service.
//! - `database_grading`: SQLite-backed service built on SeaORM.
//! - `db_entities`: SeaORM entity for the submissions table.

pub mod database_grading;
pub mod db_entities;
pub mod service;
pub mod types;

pub use service::{GradingService, InMemoryGrading};
pub use types::{Submission, SubmissionReceipt};
