use ulid::Ulid;

use crate::model::Span;

#[derive(Debug)]
pub enum EngineError {
    /// Referenced staff member, service, or booking does not exist.
    NotFound(Ulid),
    InvalidInput(String),
    /// The requested interval is not bookable for this staff member.
    SlotUnavailable {
        staff_id: Ulid,
        span: Span,
        /// Occupying booking the request collided with, if any.
        conflict: Option<Ulid>,
    },
    /// Daily appointment cap reached.
    CapacityExceeded(u32),
    /// Gave up waiting for the staff member's day lock.
    Timeout,
    Persistence(String),
}

impl EngineError {
    /// Short machine-readable kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::SlotUnavailable { .. } => "slot_unavailable",
            EngineError::CapacityExceeded(_) => "capacity_exceeded",
            EngineError::Timeout => "timeout",
            EngineError::Persistence(_) => "persistence_fault",
        }
    }

    /// HTTP-equivalent status code for the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::NotFound(_) => 404,
            EngineError::InvalidInput(_) => 400,
            EngineError::SlotUnavailable { .. } | EngineError::CapacityExceeded(_) => 409,
            EngineError::Timeout => 503,
            EngineError::Persistence(_) => 500,
        }
    }

    /// Business conflicts and lock timeouts can be retried after re-querying
    /// availability. Input errors and storage faults cannot.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::SlotUnavailable { .. }
                | EngineError::CapacityExceeded(_)
                | EngineError::Timeout
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::SlotUnavailable {
                staff_id,
                span,
                conflict: Some(booking),
            } => write!(
                f,
                "slot {span} unavailable for staff {staff_id}: conflicts with booking {booking}"
            ),
            EngineError::SlotUnavailable { staff_id, span, .. } => {
                write!(f, "slot {span} unavailable for staff {staff_id}")
            }
            EngineError::CapacityExceeded(cap) => {
                write!(f, "daily limit of {cap} appointments reached")
            }
            EngineError::Timeout => write!(f, "timed out waiting for booking lock"),
            EngineError::Persistence(e) => write!(f, "persistence error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
