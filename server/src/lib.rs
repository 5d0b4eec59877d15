//! ace-x402-server: the origin side of the protocol — challenge issuance,
//! payment verification, and the idempotent payment ledger.
//!
//! - [`config`] — environment-variable configuration
//! - [`verifier`] — challenge issuance and the ordered verification pipeline
//! - [`ledger`] — the atomic, file-backed payment log
//! - [`router`] — the axum router wiring it all into an HTTP service

pub mod config;
pub mod error;
pub mod ledger;
pub mod router;
pub mod verifier;

pub use config::OriginConfig;
pub use error::{IdempotencyConflict, LedgerStoreError, VerifyError, VerifyResult};
pub use ledger::{LedgerLookup, PaymentLedger};
pub use router::{build_router, ComputeHandler, OriginState};
pub use verifier::{ChallengeIssuer, OriginVerifier, VerifiedPayment};
