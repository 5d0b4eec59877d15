//! Error types for the origin verifier and payment ledger.

use thiserror::Error;

/// Any verification failure is terminal for the request — the origin never
/// partially accepts a payment. Returned to the caller as `422` with the
/// message.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("invalid payment: {0}")]
    InvalidPayment(String),

    #[error(transparent)]
    Core(#[from] ace_x402_core::error::CoreError),
}

pub type VerifyResult<T> = std::result::Result<T, VerifyError>;

/// A ledger hit whose stored fields don't match the incoming request.
/// Returned to the caller as `409`.
#[derive(Error, Debug)]
#[error("idempotency key {idempotency_key} already recorded with different payer/amount/requestHash")]
pub struct IdempotencyConflict {
    pub idempotency_key: String,
}

#[derive(Error, Debug)]
pub enum LedgerStoreError {
    #[error("payment ledger I/O error: {0}")]
    Io(String),

    #[error("corrupt payment ledger file: {0}")]
    Corrupt(String),
}
