use ulid::Ulid;

use crate::model::AppointmentStatus;

/// Business-rule rejection reasons, surfaced as stable codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyReason {
    OutOfWindow,
    PastDate,
    MaxPerDayReached,
}

impl PolicyReason {
    pub fn code(&self) -> &'static str {
        match self {
            PolicyReason::OutOfWindow => "out_of_window",
            PolicyReason::PastDate => "past_date",
            PolicyReason::MaxPerDayReached => "max_per_day_reached",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    SlotUnavailable,
}

impl ConflictReason {
    pub fn code(&self) -> &'static str {
        match self {
            ConflictReason::SlotUnavailable => "slot_unavailable",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input; the message is shown to the caller verbatim.
    Validation(String),
    Policy(PolicyReason),
    Conflict(ConflictReason),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Forbidden(&'static str),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Policy(_) => "policy",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation error: {msg}"),
            EngineError::Policy(reason) => write!(f, "policy error: {}", reason.code()),
            EngineError::Conflict(reason) => write!(f, "conflict: {}", reason.code()),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
