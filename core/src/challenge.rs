//! Challenge factory and verifier (component B).
//!
//! A [`PaymentChallenge`] is MAC-authenticated: the origin computes an
//! HMAC-SHA-256 over the canonical form of the challenge with `mac` absent,
//! then attaches it. Verification recomputes the same MAC and
//! constant-time-compares it.

use chrono::{DateTime, Utc};
use rand::RngCore;

use crate::canon::{canonicalize, hmac_sha256_hex, mac_eq};
use crate::error::{CoreError, Result};
use crate::types::{PaymentChallenge, ACE_PAYMENT_VERSION, CURRENCY_USDC};

fn random_hex_128() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Build and MAC a new [`PaymentChallenge`].
///
/// `challenge_id` and `nonce` default to independent 128-bit random hex
/// values when not supplied by the caller.
#[allow(clippy::too_many_arguments)]
pub fn create_challenge(
    secret: &str,
    resource: &str,
    method: &str,
    amount_micro_usdc: u64,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    challenge_id: Option<String>,
    nonce: Option<String>,
) -> Result<PaymentChallenge> {
    let challenge = PaymentChallenge {
        version: ACE_PAYMENT_VERSION.to_string(),
        challenge_id: challenge_id.unwrap_or_else(|| format!("chal_{}", random_hex_128())),
        resource: resource.to_string(),
        method: method.to_uppercase(),
        amount_micro_usdc,
        currency: CURRENCY_USDC.to_string(),
        issued_at,
        expires_at,
        nonce: nonce.unwrap_or_else(random_hex_128),
        mac: None,
    };
    let mac = compute_mac(secret, &challenge)?;
    Ok(PaymentChallenge {
        mac: Some(mac),
        ..challenge
    })
}

fn compute_mac(secret: &str, challenge: &PaymentChallenge) -> Result<String> {
    let unmaced = challenge.without_mac();
    let canonical = canonicalize(&unmaced)?;
    Ok(hmac_sha256_hex(secret, &canonical))
}

/// Recompute the MAC over `challenge` (with its own `mac` field ignored)
/// and constant-time-compare against the one it carries.
pub fn verify_challenge(challenge: &PaymentChallenge, secret: &str) -> Result<()> {
    let carried = challenge.mac.as_deref().ok_or(CoreError::InvalidMac)?;
    let recomputed = compute_mac(secret, challenge)?;
    if mac_eq(carried, &recomputed) {
        Ok(())
    } else {
        Err(CoreError::InvalidMac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now, now + Duration::seconds(60))
    }

    #[test]
    fn created_challenge_verifies_with_correct_secret() {
        let (issued, expires) = window();
        let challenge = create_challenge(
            "topsecret",
            "/compute?task=demo",
            "get",
            250_000,
            issued,
            expires,
            None,
            None,
        )
        .unwrap();
        assert_eq!(challenge.method, "GET");
        assert!(challenge.mac.is_some());
        verify_challenge(&challenge, "topsecret").unwrap();
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let (issued, expires) = window();
        let challenge = create_challenge(
            "topsecret",
            "/compute",
            "GET",
            1,
            issued,
            expires,
            None,
            None,
        )
        .unwrap();
        assert!(verify_challenge(&challenge, "wrong").is_err());
    }

    #[test]
    fn tampered_field_fails_verification() {
        let (issued, expires) = window();
        let mut challenge = create_challenge(
            "topsecret",
            "/compute",
            "GET",
            1,
            issued,
            expires,
            None,
            None,
        )
        .unwrap();
        challenge.amount_micro_usdc = 999_999;
        assert!(verify_challenge(&challenge, "topsecret").is_err());
    }

    #[test]
    fn defaulted_ids_are_independent_and_random() {
        let (issued, expires) = window();
        let a = create_challenge("s", "/r", "GET", 1, issued, expires, None, None).unwrap();
        let b = create_challenge("s", "/r", "GET", 1, issued, expires, None, None).unwrap();
        assert_ne!(a.challenge_id, b.challenge_id);
        assert_ne!(a.nonce, b.nonce);
    }
}
