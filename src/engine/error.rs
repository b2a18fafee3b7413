use ulid::Ulid;

use crate::model::{BookingStatus, Span};

#[derive(Debug)]
pub enum EngineError {
    UnknownUser(Ulid),
    UnknownGroup(Ulid),
    UnknownPermission(Ulid),
    UnknownResource(Ulid),
    UnknownBooking(Ulid),
    AlreadyExists(Ulid),
    DuplicateName(String),
    /// Authorization failure — distinct from the Unknown* reference errors.
    Forbidden(&'static str),
    /// Overlap with an existing active booking (or a saturated capacity
    /// window); carries the id of one blocking booking.
    Conflict(Ulid),
    InvalidInterval(&'static str),
    OutOfWindow {
        span: Span,
        window: Span,
    },
    ResourceInactive(Ulid),
    /// A state-machine transition the booking's current status forbids
    /// (confirming a cancelled booking, rescheduling an expired one).
    InvalidStatus(Ulid, BookingStatus),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::UnknownUser(id) => write!(f, "unknown user: {id}"),
            EngineError::UnknownGroup(id) => write!(f, "unknown group: {id}"),
            EngineError::UnknownPermission(id) => write!(f, "unknown permission: {id}"),
            EngineError::UnknownResource(id) => write!(f, "unknown resource: {id}"),
            EngineError::UnknownBooking(id) => write!(f, "unknown booking: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicateName(name) => write!(f, "name already in use: {name}"),
            EngineError::Forbidden(reason) => write!(f, "forbidden: {reason}"),
            EngineError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            EngineError::InvalidInterval(msg) => write!(f, "invalid interval: {msg}"),
            EngineError::OutOfWindow { span, window } => {
                write!(
                    f,
                    "interval [{}, {}) outside availability window [{}, {})",
                    span.start, span.end, window.start, window.end
                )
            }
            EngineError::ResourceInactive(id) => write!(f, "resource inactive: {id}"),
            EngineError::InvalidStatus(id, status) => {
                write!(f, "booking {id} is {status:?}: transition not allowed")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
