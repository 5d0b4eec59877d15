//! Session ledger (component E): spend accounting, pending attempts,
//! snapshot math, and the signing gate.

use std::sync::Arc;

use ace_x402_core::signing::{
    derive_idempotency_key, derive_request_hash, derive_resource, IdempotencyInputs,
    RequestContext,
};
use ace_x402_core::types::{
    PaymentChallenge, SessionSnapshot, SessionState, SignedPayment, UnsignedPayment,
    ACE_PAYMENT_VERSION, CURRENCY_USDC,
};
use alloy_primitives::Address;
use chrono::{Duration, Utc};
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::error::{LedgerError, LedgerResult};
use crate::store::SessionStore;
use crate::wallet::Wallet;

fn random_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("sess_{}", hex::encode(bytes))
}

/// A spending authorization bound to one payer, one wallet, and one
/// persistent store entry.
pub struct SessionLedger<W: Wallet, S: SessionStore> {
    wallet: Arc<W>,
    store: Arc<S>,
    session_id: String,
    /// Guards the read-modify-write sequence of every state transition so
    /// that concurrent calls into the same ledger serialize correctly.
    state: Mutex<SessionState>,
}

impl<W: Wallet, S: SessionStore> SessionLedger<W, S> {
    /// Authorize a new session, or reattach to an existing one if
    /// `session_id` already has stored state.
    #[instrument(skip(wallet, store))]
    pub async fn create(
        wallet: Arc<W>,
        store: Arc<S>,
        spend_limit_micro_usdc: u64,
        ttl_seconds: i64,
        session_id: Option<String>,
        now: Option<chrono::DateTime<Utc>>,
    ) -> LedgerResult<Self> {
        if ttl_seconds <= 0 {
            return Err(LedgerError::InvalidTtl(ttl_seconds));
        }
        let now = now.unwrap_or_else(Utc::now);
        let payer = wallet.address();
        let session_id = session_id.unwrap_or_else(random_session_id);

        if let Some(existing) = store.load(&session_id).await? {
            if existing.payer != payer {
                return Err(LedgerError::PayerMismatch {
                    session_id,
                    existing: format!("{:#x}", existing.payer).to_lowercase(),
                    requested: format!("{payer:#x}").to_lowercase(),
                });
            }
            return Ok(Self {
                wallet,
                store,
                session_id,
                state: Mutex::new(existing),
            });
        }

        let expires_at = now + Duration::seconds(ttl_seconds);
        let state = SessionState::new(session_id.clone(), payer, spend_limit_micro_usdc, now, expires_at);
        store.save(&session_id, &state).await?;
        Ok(Self {
            wallet,
            store,
            session_id,
            state: Mutex::new(state),
        })
    }

    /// Reattach to an existing session; fails if absent or payer mismatch.
    pub async fn restore(wallet: Arc<W>, store: Arc<S>, session_id: String) -> LedgerResult<Self> {
        let state = store
            .load(&session_id)
            .await?
            .ok_or_else(|| LedgerError::SessionNotFound(session_id.clone()))?;
        let payer = wallet.address();
        if state.payer != payer {
            return Err(LedgerError::PayerMismatch {
                session_id,
                existing: format!("{:#x}", state.payer).to_lowercase(),
                requested: format!("{payer:#x}").to_lowercase(),
            });
        }
        Ok(Self {
            wallet,
            store,
            session_id,
            state: Mutex::new(state),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            session_id: state.session_id.clone(),
            payer: state.payer,
            spend_limit_micro_usdc: state.spend_limit_micro_usdc,
            expires_at: state.expires_at,
            cumulative_spend_micro_usdc: state.cumulative_spend_micro_usdc,
            pending_spend_micro_usdc: state.pending_spend_micro_usdc(),
            available_spend_micro_usdc: state.available_spend_micro_usdc(),
        }
    }

    /// Sign a payment authorizing `challenge` for the given request
    /// context. See `spec.md` §4.E for the ordered check list this
    /// implements verbatim.
    #[instrument(skip(self, challenge, ctx), fields(session_id = %self.session_id))]
    pub async fn sign_for_challenge(
        &self,
        challenge: &PaymentChallenge,
        ctx: &RequestContext,
    ) -> LedgerResult<SignedPayment> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        // 1. Session not expired.
        if state.expires_at <= now {
            return Err(LedgerError::SessionExpired);
        }

        // 2. Challenge shape: version, currency, not expired.
        if challenge.version != ACE_PAYMENT_VERSION {
            return Err(LedgerError::ChallengeRejected(format!(
                "unsupported version {}",
                challenge.version
            )));
        }
        if challenge.currency != CURRENCY_USDC {
            return Err(LedgerError::ChallengeRejected(format!(
                "unsupported currency {}",
                challenge.currency
            )));
        }
        if challenge.expires_at <= now {
            return Err(LedgerError::ChallengeRejected("challenge has expired".to_string()));
        }

        // 3. Challenge must match the current request.
        let method = ctx.method.to_uppercase();
        if challenge.method != method {
            return Err(LedgerError::ChallengeMismatch(format!(
                "method {} != challenge method {}",
                method, challenge.method
            )));
        }
        let resource = derive_resource(&ctx.url)?;
        if challenge.resource != resource {
            return Err(LedgerError::ChallengeMismatch(format!(
                "resource {} != challenge resource {}",
                resource, challenge.resource
            )));
        }

        // 4. Derive requestHash and idempotencyKey.
        let request_hash = derive_request_hash(ctx)?;
        let payer_hex = format!("{:#x}", state.payer).to_lowercase();
        let idempotency_key = derive_idempotency_key(&IdempotencyInputs {
            session_id: &self.session_id,
            payer: &payer_hex,
            challenge_id: &challenge.challenge_id,
            request_hash: &request_hash,
            amount_micro_usdc: challenge.amount_micro_usdc,
        })?;

        // 5. Idempotent short-circuit.
        if let Some(existing) = state.pending_attempts.get(&idempotency_key) {
            return Ok(existing.clone());
        }

        // 6. Spend limit check.
        let available = state.available_spend_micro_usdc();
        if challenge.amount_micro_usdc > available {
            return Err(LedgerError::SpendLimitExceeded {
                requested: challenge.amount_micro_usdc,
                available,
            });
        }

        // 7. Build and sign.
        let unsigned = UnsignedPayment {
            version: ACE_PAYMENT_VERSION.to_string(),
            session_id: self.session_id.clone(),
            payer: state.payer,
            challenge_id: challenge.challenge_id.clone(),
            challenge: challenge.clone(),
            idempotency_key: idempotency_key.clone(),
            request_hash,
            challenge_hash: ace_x402_core::signing::derive_challenge_hash(challenge)?,
            amount_micro_usdc: challenge.amount_micro_usdc,
            currency: CURRENCY_USDC.to_string(),
            session_expires_at: state.expires_at,
            issued_at: now,
        };
        let message = ace_x402_core::signing::build_payment_signing_message(&unsigned)?;
        let signature_bytes = self
            .wallet
            .sign_message(&message)
            .await
            .map_err(|e| LedgerError::Store(format!("wallet signing failed: {e}")))?;
        let signed = SignedPayment {
            unsigned,
            signature: hex::encode(signature_bytes),
        };

        // 8. Insert, persist, return.
        state
            .pending_attempts
            .insert(idempotency_key, signed.clone());
        self.store.save(&self.session_id, &state).await?;
        Ok(signed)
    }

    /// Move a pending attempt's amount into cumulative spend. No-op if the
    /// key is unknown (idempotent).
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn commit_payment(&self, idempotency_key: &str) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        if let Some(attempt) = state.pending_attempts.remove(idempotency_key) {
            state.cumulative_spend_micro_usdc += attempt.unsigned.amount_micro_usdc;
            self.store.save(&self.session_id, &state).await?;
        }
        Ok(())
    }

    /// Drop a pending attempt without charging it. No-op if the key is
    /// unknown (idempotent).
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn release_payment(&self, idempotency_key: &str) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        if state.pending_attempts.remove(idempotency_key).is_some() {
            self.store.save(&self.session_id, &state).await?;
        }
        Ok(())
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }
}
