//! Origin verifier (component G, verification half): challenge issuance
//! and the ordered signature/shape verification pipeline from `spec.md`
//! §4.G.

use ace_x402_core::challenge::{create_challenge, verify_challenge};
use ace_x402_core::signing::{
    derive_challenge_hash, derive_idempotency_key, derive_request_hash, recover_signer_of_message,
    IdempotencyInputs, RequestContext,
};
use ace_x402_core::types::{
    PaymentChallenge, SignedPayment, ACE_PAYMENT_VERSION, CURRENCY_USDC,
};
use chrono::{Duration, Utc};
use tracing::instrument;

use crate::error::{VerifyError, VerifyResult};

/// Issues MAC-authenticated challenges bound to this origin's secret,
/// configured amount, and TTL.
#[derive(Clone)]
pub struct ChallengeIssuer {
    secret: String,
    amount_micro_usdc: u64,
    ttl_seconds: i64,
}

impl ChallengeIssuer {
    pub fn new(secret: impl Into<String>, amount_micro_usdc: u64, ttl_seconds: i64) -> Self {
        Self {
            secret: secret.into(),
            amount_micro_usdc,
            ttl_seconds,
        }
    }

    pub fn issue(&self, resource: &str, method: &str) -> VerifyResult<PaymentChallenge> {
        let now = Utc::now();
        let challenge = create_challenge(
            &self.secret,
            resource,
            method,
            self.amount_micro_usdc,
            now,
            now + Duration::seconds(self.ttl_seconds),
            None,
            None,
        )?;
        Ok(challenge)
    }

    pub fn amount_micro_usdc(&self) -> u64 {
        self.amount_micro_usdc
    }
}

/// Verifies a [`SignedPayment`] against the origin's secret and configured
/// amount, for a given current request.
#[derive(Clone)]
pub struct OriginVerifier {
    secret: String,
    amount_micro_usdc: u64,
}

impl OriginVerifier {
    pub fn new(secret: impl Into<String>, amount_micro_usdc: u64) -> Self {
        Self {
            secret: secret.into(),
            amount_micro_usdc,
        }
    }

    /// Run every check in `spec.md` §4.G step 2, in order; the first
    /// failure short-circuits. Returns the recovered request hash and
    /// idempotency key on success (the ledger needs both).
    #[instrument(skip(self, payment, ctx), fields(challenge_id = %payment.unsigned.challenge_id))]
    pub fn verify(
        &self,
        payment: &SignedPayment,
        ctx: &RequestContext,
    ) -> VerifyResult<VerifiedPayment> {
        let unsigned = &payment.unsigned;
        let now = Utc::now();

        if unsigned.version != ACE_PAYMENT_VERSION {
            return Err(VerifyError::InvalidPayment(format!(
                "unsupported version {}",
                unsigned.version
            )));
        }
        if unsigned.currency != CURRENCY_USDC {
            return Err(VerifyError::InvalidPayment(format!(
                "unsupported currency {}",
                unsigned.currency
            )));
        }
        if unsigned.challenge_id != unsigned.challenge.challenge_id {
            return Err(VerifyError::InvalidPayment(
                "challengeId does not match embedded challenge".to_string(),
            ));
        }

        let current_resource = ace_x402_core::signing::derive_resource(&ctx.url)?;
        if unsigned.challenge.resource != current_resource {
            return Err(VerifyError::InvalidPayment(format!(
                "challenge resource {} does not match current resource {}",
                unsigned.challenge.resource, current_resource
            )));
        }
        let current_method = ctx.method.to_uppercase();
        if unsigned.challenge.method != current_method {
            return Err(VerifyError::InvalidPayment(format!(
                "challenge method {} does not match current method {}",
                unsigned.challenge.method, current_method
            )));
        }

        let expected_challenge_hash = derive_challenge_hash(&unsigned.challenge)?;
        if unsigned.challenge_hash != expected_challenge_hash {
            return Err(VerifyError::InvalidPayment(
                "challengeHash does not match embedded challenge".to_string(),
            ));
        }

        let expected_request_hash = derive_request_hash(ctx)?;
        if unsigned.request_hash != expected_request_hash {
            return Err(VerifyError::InvalidPayment(
                "requestHash does not match the current request".to_string(),
            ));
        }

        verify_challenge(&unsigned.challenge, &self.secret)
            .map_err(|_| VerifyError::InvalidPayment("challenge MAC is invalid".to_string()))?;

        if unsigned.challenge.expires_at <= now {
            return Err(VerifyError::InvalidPayment("challenge has expired".to_string()));
        }

        let payer_hex = format!("{:#x}", unsigned.payer).to_lowercase();
        let expected_idempotency_key = derive_idempotency_key(&IdempotencyInputs {
            session_id: &unsigned.session_id,
            payer: &payer_hex,
            challenge_id: &unsigned.challenge_id,
            request_hash: &unsigned.request_hash,
            amount_micro_usdc: unsigned.amount_micro_usdc,
        })?;
        if unsigned.idempotency_key != expected_idempotency_key {
            return Err(VerifyError::InvalidPayment(
                "idempotencyKey does not match its own derivation".to_string(),
            ));
        }

        if unsigned.amount_micro_usdc != self.amount_micro_usdc {
            return Err(VerifyError::InvalidPayment(format!(
                "amount {} does not match configured amount {}",
                unsigned.amount_micro_usdc, self.amount_micro_usdc
            )));
        }

        if unsigned.session_expires_at <= now {
            return Err(VerifyError::InvalidPayment(
                "session has expired".to_string(),
            ));
        }

        let message = ace_x402_core::signing::build_payment_signing_message(unsigned)?;
        let signature_bytes = hex::decode(&payment.signature)
            .map_err(|e| VerifyError::InvalidPayment(format!("invalid signature hex: {e}")))?;
        let recovered = recover_signer_of_message(&message, &signature_bytes)
            .map_err(|e| VerifyError::InvalidPayment(format!("signature recovery failed: {e}")))?;
        if recovered.to_string().to_lowercase() != payer_hex {
            return Err(VerifyError::InvalidPayment(
                "recovered signer does not match payer".to_string(),
            ));
        }

        Ok(VerifiedPayment {
            payer: payer_hex,
            amount_micro_usdc: unsigned.amount_micro_usdc,
            request_hash: unsigned.request_hash.clone(),
            idempotency_key: unsigned.idempotency_key.clone(),
            challenge_id: unsigned.challenge_id.clone(),
        })
    }
}

/// The fields the payment ledger needs after a payment has passed every
/// verification check.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub payer: String,
    pub amount_micro_usdc: u64,
    pub request_hash: String,
    pub idempotency_key: String,
    pub challenge_id: String,
}
