//! ace-x402-core: canonical JSON, hashing, MAC-authenticated challenges,
//! and payment signing primitives for the ace-x402 protocol.
//!
//! This crate provides:
//! - Canonical JSON serialization and SHA-256/HMAC-SHA-256 hashing
//! - The `PaymentChallenge`/`UnsignedPayment`/`SignedPayment`/`SessionState` wire types
//! - The challenge factory and MAC verifier
//! - Request/challenge hashing, idempotency key derivation, and the
//!   canonical signing message
//! - Personal-sign digest construction and secp256k1 signature recovery
//!
//! This crate does not perform signing itself — signing is delegated to
//! whatever wallet the caller provides (see `ace-x402-client::Wallet`).

pub mod canon;
pub mod challenge;
pub mod error;
pub mod protocol;
pub mod signing;
pub mod types;

pub use canon::*;
pub use challenge::*;
pub use error::*;
pub use protocol::*;
pub use signing::*;
pub use types::*;
