//! Wire types for the ace-x402 protocol: the challenge, the unsigned and
//! signed payment, the persisted session state, and the origin's payment
//! log record.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};

/// Fixed protocol version tag carried on every challenge and payment.
pub const ACE_PAYMENT_VERSION: &str = "ace-x402-v1";

/// Fixed asset tag; this protocol is USDC-only.
pub const CURRENCY_USDC: &str = "USDC";

/// Literal ASCII prefix prepended before the canonical signing message.
pub const SIGNING_MESSAGE_PREFIX: &str = "ACE_PAYMENT_V1\n";

/// Serialize an [`Address`] as lowercase hex (`0x...`), the canonical form
/// this protocol hashes and MACs over. `alloy_primitives`'s own `Serialize`
/// impl emits EIP-55 checksummed hex, which is not byte-stable for hashing
/// purposes, so every address field in a hashed/MACed type goes through
/// this helper instead.
pub fn serialize_address_lowercase<S: Serializer>(
    addr: &Address,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&addr.to_string().to_lowercase())
}

pub fn deserialize_address_lowercase<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Address, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse::<Address>().map_err(DeError::custom)
}

/// The server-issued, MAC-authenticated token describing a single paid
/// resource access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    pub version: String,
    pub challenge_id: String,
    pub resource: String,
    pub method: String,
    pub amount_micro_usdc: u64,
    pub currency: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub nonce: String,
    /// Present once the challenge factory has MACed it. Absent while the
    /// MAC itself is being computed over the rest of the fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

impl PaymentChallenge {
    /// This challenge with `mac` cleared, for MAC computation/verification.
    pub fn without_mac(&self) -> PaymentChallenge {
        let mut c = self.clone();
        c.mac = None;
        c
    }
}

/// The signer's authorization, prior to signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedPayment {
    pub version: String,
    pub session_id: String,
    #[serde(
        serialize_with = "serialize_address_lowercase",
        deserialize_with = "deserialize_address_lowercase"
    )]
    pub payer: Address,
    pub challenge_id: String,
    pub challenge: PaymentChallenge,
    pub idempotency_key: String,
    pub request_hash: String,
    pub challenge_hash: String,
    pub amount_micro_usdc: u64,
    pub currency: String,
    pub session_expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

/// An [`UnsignedPayment`] plus the wallet's recoverable signature over its
/// canonical signing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayment {
    #[serde(flatten)]
    pub unsigned: UnsignedPayment,
    /// Hex-encoded 65-byte recoverable secp256k1 signature.
    pub signature: String,
}

impl std::ops::Deref for SignedPayment {
    type Target = UnsignedPayment;
    fn deref(&self) -> &UnsignedPayment {
        &self.unsigned
    }
}

/// Persisted, restart-safe accounting state for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    #[serde(
        serialize_with = "serialize_address_lowercase",
        deserialize_with = "deserialize_address_lowercase"
    )]
    pub payer: Address,
    pub spend_limit_micro_usdc: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cumulative_spend_micro_usdc: u64,
    /// Idempotency key -> the full signed payment of that in-flight attempt.
    pub pending_attempts: BTreeMap<String, SignedPayment>,
}

impl SessionState {
    pub fn new(
        session_id: String,
        payer: Address,
        spend_limit_micro_usdc: u64,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            payer,
            spend_limit_micro_usdc,
            created_at,
            expires_at,
            cumulative_spend_micro_usdc: 0,
            pending_attempts: BTreeMap::new(),
        }
    }

    pub fn pending_spend_micro_usdc(&self) -> u64 {
        self.pending_attempts
            .values()
            .map(|p| p.unsigned.amount_micro_usdc)
            .sum()
    }

    pub fn available_spend_micro_usdc(&self) -> u64 {
        self.spend_limit_micro_usdc
            .saturating_sub(self.cumulative_spend_micro_usdc)
            .saturating_sub(self.pending_spend_micro_usdc())
    }
}

/// A snapshot of a session's accounting, returned by `SessionLedger::snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    #[serde(
        serialize_with = "serialize_address_lowercase",
        deserialize_with = "deserialize_address_lowercase"
    )]
    pub payer: Address,
    pub spend_limit_micro_usdc: u64,
    pub expires_at: DateTime<Utc>,
    pub cumulative_spend_micro_usdc: u64,
    pub pending_spend_micro_usdc: u64,
    pub available_spend_micro_usdc: u64,
}

/// An immutable origin-side record of one paid, computed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLogRecord {
    pub idempotency_key: String,
    #[serde(
        serialize_with = "serialize_address_lowercase",
        deserialize_with = "deserialize_address_lowercase"
    )]
    pub payer: Address,
    pub amount_micro_usdc: u64,
    pub request_hash: String,
    pub challenge_id: String,
    pub paid_at: DateTime<Utc>,
    pub result: serde_json::Value,
}
