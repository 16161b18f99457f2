use ulid::Ulid;

use crate::model::{BookingStatus, TimeWindow};

/// Every expected failure of a scheduling operation. None of these are faults:
/// callers decide how to message and whether to retry.
#[derive(Debug)]
pub enum SchedulerError {
    InvalidWindow {
        start: i64,
        end: i64,
    },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested interval is not (or no longer) inside a free segment.
    SlotUnavailable {
        requested: TimeWindow,
    },
    MissingStudent,
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    NotPermitted(&'static str),
    LimitExceeded(&'static str),
    StorageError(String),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::InvalidWindow { start, end } => {
                write!(f, "invalid window: start {start} must be before end {end}")
            }
            SchedulerError::NotFound(id) => write!(f, "not found: {id}"),
            SchedulerError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            SchedulerError::SlotUnavailable { requested } => write!(
                f,
                "slot unavailable: [{}, {}) is not inside a free segment",
                requested.start, requested.end
            ),
            SchedulerError::MissingStudent => {
                write!(f, "follow-up meetings require a student")
            }
            SchedulerError::InvalidTransition { from, to } => write!(
                f,
                "invalid status transition: {} -> {}",
                from.as_str(),
                to.as_str()
            ),
            SchedulerError::NotPermitted(msg) => write!(f, "not permitted: {msg}"),
            SchedulerError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            SchedulerError::StorageError(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}
