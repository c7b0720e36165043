use crate::engine::TimerId;
use thiserror::Error;

/// Errors surfaced by the registry and the timer state machine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation invoked in a state that forbids it. Always caller-fixable.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("timer {0} not found")]
    NotFound(TimerId),

    /// A save is already in flight for this timer
    #[error("save already in progress for timer {0}")]
    Conflict(TimerId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        EngineError::Precondition(message.into())
    }

    pub(crate) fn poisoned(e: impl std::fmt::Display) -> Self {
        EngineError::Internal(format!("Mutex poisoned: {}", e))
    }
}

/// Ledger collaborator failures. Both leave the local timer intact.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger rejected the entry; retrying the same payload will not help
    #[error("ledger rejected entry: {0}")]
    Validation(String),

    /// Network, timeout or server-side failure; a retry may succeed
    #[error("ledger unreachable: {0}")]
    Transport(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned: {0}")]
    Poisoned(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("work-item directory unreachable: {0}")]
    Transport(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
