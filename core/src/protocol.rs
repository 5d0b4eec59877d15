//! Wire envelopes and header encode/decode for the ace-x402 protocol.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::types::{PaymentChallenge, ACE_PAYMENT_VERSION};

/// Header carrying the base64-encoded `X402PaymentRequired` envelope on a
/// `402` response.
pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";

/// Header carrying the base64-encoded [`crate::types::SignedPayment`] on a
/// paid retry, and echoed back on success.
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";

/// Alternate header names a client's payment may arrive under; inspection
/// of an incoming request must be case-insensitive across all three.
pub const PAYMENT_HEADER_ALIASES: [&str; 3] = ["PAYMENT-SIGNATURE", "X-PAYMENT", "x-ace-payment"];

/// Advisory header carrying the idempotency key, redundant with the signed
/// payload itself.
pub const IDEMPOTENCY_HEADER: &str = "x-ace-idempotency-key";

/// Header carrying the base64-encoded settlement acknowledgment on success.
pub const PAYMENT_RESPONSE_HEADER: &str = "PAYMENT-RESPONSE";

/// One accepted payment method inside a [`X402PaymentRequired`] envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X402Accept {
    pub scheme: String,
    pub network: String,
    /// Decimal string of the micro-USDC amount.
    pub amount: String,
    pub asset: String,
    pub pay_to: String,
    pub extra: X402AcceptExtra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X402AcceptExtra {
    pub challenge: PaymentChallenge,
}

/// The envelope carried (base64-encoded) in the `PAYMENT-REQUIRED` header
/// and, as a JSON fallback, in the `402` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X402PaymentRequired {
    pub x402_version: u32,
    pub error: String,
    pub accepts: Vec<X402Accept>,
}

impl X402PaymentRequired {
    pub fn single(challenge: PaymentChallenge, network: &str, pay_to: &str) -> Self {
        let amount = challenge.amount_micro_usdc.to_string();
        let asset = challenge.currency.clone();
        X402PaymentRequired {
            x402_version: 2,
            error: "payment_required".to_string(),
            accepts: vec![X402Accept {
                scheme: "exact".to_string(),
                network: network.to_string(),
                amount,
                asset,
                pay_to: pay_to.to_string(),
                extra: X402AcceptExtra { challenge },
            }],
        }
    }

    /// Find the first accepted entry whose embedded challenge carries this
    /// protocol's version tag.
    pub fn ace_challenge(&self) -> Option<&PaymentChallenge> {
        self.accepts
            .iter()
            .map(|a| &a.extra.challenge)
            .find(|c| c.version == ACE_PAYMENT_VERSION)
    }
}

/// The JSON body fallback carried on a `402` response for clients that
/// cannot read response headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub error: String,
    pub challenge: PaymentChallenge,
}

/// The settlement acknowledgment carried (base64-encoded) in the
/// `PAYMENT-RESPONSE` header on a paid, successful response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSettledResponse {
    pub x402_version: u32,
    pub settled: bool,
    pub idempotency_key: String,
}

impl PaymentSettledResponse {
    pub fn new(idempotency_key: String) -> Self {
        Self {
            x402_version: 2,
            settled: true,
            idempotency_key,
        }
    }
}

/// base64(utf8(json(value))) — the encoding used for every header in this
/// protocol.
pub fn encode_header<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(BASE64.encode(json.as_bytes()))
}

/// The inverse of [`encode_header`].
pub fn decode_header<T: for<'de> Deserialize<'de>>(header: &str) -> Result<T> {
    let bytes = BASE64
        .decode(header)
        .map_err(|e| CoreError::InvalidHeader(format!("base64 decode failed: {e}")))?;
    let json = String::from_utf8(bytes)
        .map_err(|e| CoreError::InvalidHeader(format!("invalid UTF-8: {e}")))?;
    serde_json::from_str(&json)
        .map_err(|e| CoreError::InvalidHeader(format!("JSON parse failed: {e}")))
}

/// Decode a header value as a raw [`Value`], for callers that only need to
/// probe shape before committing to a concrete type (e.g. the interceptor's
/// body-fallback decoding path).
pub fn decode_header_value(header: &str) -> Result<Value> {
    decode_header(header)
}

/// True if `name` case-insensitively matches one of [`PAYMENT_HEADER_ALIASES`].
pub fn is_payment_header_name(name: &str) -> bool {
    PAYMENT_HEADER_ALIASES
        .iter()
        .any(|alias| alias.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CURRENCY_USDC;
    use chrono::Utc;

    fn sample_challenge() -> PaymentChallenge {
        PaymentChallenge {
            version: ACE_PAYMENT_VERSION.to_string(),
            challenge_id: "chal_1".to_string(),
            resource: "/compute?task=demo".to_string(),
            method: "GET".to_string(),
            amount_micro_usdc: 250_000,
            currency: CURRENCY_USDC.to_string(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
            nonce: "abcd1234".to_string(),
            mac: Some("deadbeef".to_string()),
        }
    }

    #[test]
    fn payment_required_roundtrips_through_header_encoding() {
        let envelope =
            X402PaymentRequired::single(sample_challenge(), "off-chain", "0xpayee");
        let encoded = encode_header(&envelope).unwrap();
        let decoded: X402PaymentRequired = decode_header(&encoded).unwrap();
        assert_eq!(decoded.accepts.len(), 1);
        assert_eq!(
            decoded.ace_challenge().unwrap().challenge_id,
            "chal_1"
        );
    }

    #[test]
    fn payment_header_aliases_are_case_insensitive() {
        assert!(is_payment_header_name("payment-signature"));
        assert!(is_payment_header_name("X-PAYMENT"));
        assert!(is_payment_header_name("x-ace-payment"));
        assert!(!is_payment_header_name("content-type"));
    }
}
