//! SeaORM entity model used by the database grading backend.
//!
//! One row per session; the session id is the primary key so a second submission for the
//! same session can never be stored.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "submissions")]
pub struct Model {
    /// Session UUID as string
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: String,
    pub exam_id: String,
    pub taker_id: String,
    /// JSON-serialized `AnswerSnapshot`
    pub answers: String,
    pub violation_count: i64,
    /// JSON-serialized `TerminationReason` for automatic submissions
    pub termination: Option<String>,
    /// RFC3339 timestamps
    pub submitted_at: String,
    pub accepted_at: String,
    pub score: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
