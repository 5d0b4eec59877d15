//! The signer capability consumed by the session ledger.
//!
//! Wallet key custody is out of scope for this system (§1): callers supply
//! an implementation of [`Wallet`] backed by whatever key material they
//! control (KMS, hardware wallet, in-memory key for tests, ...).

use alloy_primitives::Address;
use async_trait::async_trait;
use std::fmt;

/// A signer capable of producing a personal-sign signature and reporting
/// its own address.
#[async_trait]
pub trait Wallet: Send + Sync {
    type Error: fmt::Display + fmt::Debug + Send + Sync + 'static;

    /// The wallet's address, lowercase-normalized by callers as needed.
    fn address(&self) -> Address;

    /// Personal-sign `message` (the literal bytes, *before* the
    /// `\x19Ethereum Signed Message:\n<len>` framing — the wallet applies
    /// that framing itself), returning a 65-byte recoverable signature.
    async fn sign_message(&self, message: &str) -> Result<Vec<u8>, Self::Error>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::*;
    use ace_x402_core::signing::personal_sign_digest;
    use k256::ecdsa::SigningKey;

    /// An in-memory secp256k1 wallet, for tests and local experimentation.
    pub struct LocalWallet {
        signing_key: SigningKey,
        address: Address,
    }

    impl LocalWallet {
        pub fn random() -> Self {
            let signing_key = SigningKey::random(&mut rand::thread_rng());
            let address = Self::address_of(&signing_key);
            Self {
                signing_key,
                address,
            }
        }

        fn address_of(signing_key: &SigningKey) -> Address {
            let verifying_key = signing_key.verifying_key();
            let public_key_bytes = verifying_key.to_encoded_point(false);
            let hash = alloy_primitives::keccak256(&public_key_bytes.as_bytes()[1..]);
            Address::from_slice(&hash[12..])
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("local wallet signing error: {0}")]
    pub struct LocalWalletError(String);

    #[async_trait]
    impl Wallet for LocalWallet {
        type Error = LocalWalletError;

        fn address(&self) -> Address {
            self.address
        }

        async fn sign_message(&self, message: &str) -> Result<Vec<u8>, Self::Error> {
            let digest = personal_sign_digest(message);
            let (signature, recovery_id) = self
                .signing_key
                .sign_prehash_recoverable(&digest)
                .map_err(|e| LocalWalletError(e.to_string()))?;
            let mut bytes = signature.to_bytes().to_vec();
            bytes.push(27 + recovery_id.to_byte());
            Ok(bytes)
        }
    }
}
