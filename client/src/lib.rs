//! ace-x402-client: the session-keyed HTTP micropayment client.
//!
//! - [`store`] — the session store capability (in-memory and file-backed)
//! - [`ledger`] — the session ledger: spend accounting and the signing gate
//! - [`interceptor`] — the 402-detect/sign/retry state machine
//! - [`wallet`] — the signer capability consumed by the ledger

pub mod error;
pub mod interceptor;
pub mod ledger;
pub mod store;
pub mod wallet;

pub use error::{LedgerError, LedgerResult};
pub use interceptor::{Interceptor, InterceptorError, Request, Response, Transport};
pub use ledger::SessionLedger;
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore};
pub use wallet::Wallet;
