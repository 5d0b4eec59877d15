//! Payment signing primitives (component C): request/challenge hashing,
//! idempotency key derivation, the canonical signing message, and
//! personal-sign digest/recovery.

use alloy_primitives::{keccak256, Address};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde_json::json;
use url::Url;

use crate::canon::{canonicalize, sha256_hex};
use crate::error::{CoreError, Result};
use crate::types::{PaymentChallenge, UnsignedPayment, SIGNING_MESSAGE_PREFIX};

/// Request context the client signs a payment against.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
}

/// `pathname + search` of `url`, exactly as given — no normalization.
pub fn derive_resource(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| CoreError::InvalidHeader(format!("invalid url: {e}")))?;
    let mut resource = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        resource.push('?');
        resource.push_str(query);
    }
    Ok(resource)
}

/// `sha256Hex(canonical({bodyHash, method, resource}))`.
pub fn derive_request_hash(ctx: &RequestContext) -> Result<String> {
    let resource = derive_resource(&ctx.url)?;
    let method = ctx.method.to_uppercase();
    let body_hash = match &ctx.body {
        Some(b) if !b.is_empty() => sha256_hex(b),
        _ => String::new(),
    };
    let value = json!({
        "bodyHash": body_hash,
        "method": method,
        "resource": resource,
    });
    Ok(sha256_hex(&canonicalize(&value)?))
}

/// `sha256Hex(canonical(challenge))` — MAC included, since the signer
/// authorizes a specific *issued* challenge.
pub fn derive_challenge_hash(challenge: &PaymentChallenge) -> Result<String> {
    Ok(sha256_hex(&canonicalize(challenge)?))
}

/// Inputs to [`derive_idempotency_key`].
#[derive(Debug, Clone)]
pub struct IdempotencyInputs<'a> {
    pub session_id: &'a str,
    pub payer: &'a str,
    pub challenge_id: &'a str,
    pub request_hash: &'a str,
    pub amount_micro_usdc: u64,
}

/// `"aceid_" + sha256Hex(canonical({amountMicrousdc, challengeId, payer (lowercased), requestHash, sessionId}))`.
pub fn derive_idempotency_key(inputs: &IdempotencyInputs) -> Result<String> {
    let value = json!({
        "amountMicrousdc": inputs.amount_micro_usdc,
        "challengeId": inputs.challenge_id,
        "payer": inputs.payer.to_lowercase(),
        "requestHash": inputs.request_hash,
        "sessionId": inputs.session_id,
    });
    Ok(format!("aceid_{}", sha256_hex(&canonicalize(&value)?)))
}

/// `ACE_PAYMENT_V1\n` followed by `canonical(unsigned)` — the exact bytes
/// passed to personal-sign.
pub fn build_payment_signing_message(unsigned: &UnsignedPayment) -> Result<String> {
    Ok(format!(
        "{SIGNING_MESSAGE_PREFIX}{}",
        canonicalize(unsigned)?
    ))
}

/// Frame `message` the way `eth_sign`/personal_sign does
/// (`\x19Ethereum Signed Message:\n<len>` + message) and Keccak-256 it.
pub fn personal_sign_digest(message: &str) -> [u8; 32] {
    let framed = format!(
        "\x19Ethereum Signed Message:\n{}{}",
        message.len(),
        message
    );
    *keccak256(framed.as_bytes())
}

/// Recover the signer's address from a 65-byte recoverable signature
/// (`r || s || v`, `v` either `0/1` or `27/28`) over `digest`.
pub fn recover_address(digest: &[u8; 32], signature: &[u8]) -> Result<Address> {
    if signature.len() != 65 {
        return Err(CoreError::InvalidSignature(format!(
            "signature must be 65 bytes, got {}",
            signature.len()
        )));
    }
    let (r_s, v_slice) = signature.split_at(64);
    let v = v_slice[0];
    let recovery_id = if v >= 27 {
        RecoveryId::try_from(v - 27)
    } else {
        RecoveryId::try_from(v)
    }
    .map_err(|_| CoreError::InvalidSignature("invalid recovery id".to_string()))?;

    let sig = Signature::from_slice(r_s)
        .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;

    let verifying_key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;

    let public_key_bytes = verifying_key.to_encoded_point(false);
    let public_key_hash = keccak256(&public_key_bytes.as_bytes()[1..]);
    Ok(Address::from_slice(&public_key_hash[12..]))
}

/// Recover the address that personal-signed `message` with `signature`.
pub fn recover_signer_of_message(message: &str, signature: &[u8]) -> Result<Address> {
    let digest = personal_sign_digest(message);
    recover_address(&digest, signature)
}
