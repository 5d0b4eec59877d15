//! Error types for the session ledger and interceptor.

use thiserror::Error;

/// Failure modes of [`crate::ledger::SessionLedger::sign_for_challenge`] and
/// session lifecycle operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("session has expired")]
    SessionExpired,

    #[error("challenge rejected: {0}")]
    ChallengeRejected(String),

    #[error("challenge does not match the current request: {0}")]
    ChallengeMismatch(String),

    #[error("requested amount {requested} exceeds available spend {available}")]
    SpendLimitExceeded { requested: u64, available: u64 },

    #[error("session {session_id} is bound to payer {existing}, not {requested}")]
    PayerMismatch {
        session_id: String,
        existing: String,
        requested: String,
    },

    #[error("ttlSeconds must be positive, got {0}")]
    InvalidTtl(i64),

    #[error("no session state found for {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Core(#[from] ace_x402_core::error::CoreError),

    #[error("session store I/O error: {0}")]
    Store(String),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
