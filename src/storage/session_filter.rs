//! Helpers for building `SessionFilter` values.

pub use crate::storage::types::SessionFilter;
use crate::session_management::session::SessionState;

/// Sessions currently in `state`.
pub fn by_state(state: SessionState) -> SessionFilter {
    SessionFilter {
        state: Some(state),
        ..Default::default()
    }
}

/// Sessions of one taker on one exam.
pub fn by_taker_and_exam<S: Into<String>>(taker_id: S, exam_id: S) -> SessionFilter {
    SessionFilter {
        taker_id: Some(taker_id.into()),
        exam_id: Some(exam_id.into()),
        ..Default::default()
    }
}

/// Sessions that still need to be restored on startup.
pub fn unsubmitted() -> SessionFilter {
    SessionFilter {
        unsubmitted: true,
        ..Default::default()
    }
}
