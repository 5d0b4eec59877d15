//! Error types for ace-x402-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid x402 header format: {0}")]
    InvalidHeader(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("challenge MAC verification failed")]
    InvalidMac,

    #[error("challenge has expired")]
    ChallengeExpired,

    #[error("amount must be a finite, positive value: {0}")]
    InvalidAmount(f64),
}

pub type Result<T> = std::result::Result<T, CoreError>;
