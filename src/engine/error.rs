use ulid::Ulid;

use crate::model::SlotKey;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or off-grid input. Terminal; never retried.
    Validation(String),
    /// Unknown entity; the label names what was looked up.
    NotFound(&'static str, Ulid),
    /// No verified identity could be bound to the request.
    AuthFailure(String),
    /// Capacity exhausted (or the slot lock timed out) at commit time.
    SlotUnavailable {
        key: SlotKey,
        reason: &'static str,
    },
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable label surfaced to callers next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound(..) => "not_found",
            EngineError::AuthFailure(_) => "auth_failure",
            EngineError::SlotUnavailable { .. } => "slot_unavailable",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "storage_error",
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(what, id) => write!(f, "{what} not found: {id}"),
            EngineError::AuthFailure(msg) => write!(f, "authorization failed: {msg}"),
            EngineError::SlotUnavailable { key, reason } => {
                write!(f, "slot {} {} unavailable: {reason}", key.date, key.time)
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "ledger error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
