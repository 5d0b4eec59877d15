//! Interceptor (component F): the 402-detect / challenge-extract / sign /
//! retry / commit-or-release state machine, generic over a [`Transport`]
//! so the concrete HTTP client stays out of this system's scope.

use std::collections::HashMap;
use std::fmt;

use ace_x402_core::protocol::{
    decode_header, is_payment_header_name, PaymentRequiredBody, X402PaymentRequired,
    PAYMENT_REQUIRED_HEADER, PAYMENT_SIGNATURE_HEADER,
};
use ace_x402_core::signing::RequestContext;
use ace_x402_core::types::{SignedPayment, ACE_PAYMENT_VERSION};
use async_trait::async_trait;
use tracing::warn;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::SessionLedger;
use crate::store::SessionStore;
use crate::wallet::Wallet;

/// A minimal, transport-agnostic HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    fn has_any_payment_header(&self) -> bool {
        self.headers
            .keys()
            .any(|k| is_payment_header_name(k))
    }
}

/// A minimal, transport-agnostic HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The HTTP transport consumed by the interceptor. Out of scope per §1: the
/// caller supplies a concrete implementation (`reqwest`, a test double, ...).
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: fmt::Display + fmt::Debug + Send + Sync + 'static;

    async fn send(&self, req: Request) -> Result<Response, Self::Error>;
}

/// Errors the interceptor surfaces to the caller.
#[derive(thiserror::Error, Debug)]
pub enum InterceptorError<T> {
    #[error("signing failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("transport error on paid retry: {0}")]
    Transport(T),
}

fn extract_challenge(response: &Response) -> Option<ace_x402_core::types::PaymentChallenge> {
    if let Some(header) = response.header(PAYMENT_REQUIRED_HEADER) {
        match decode_header::<X402PaymentRequired>(header) {
            Ok(envelope) => {
                if let Some(challenge) = envelope.ace_challenge() {
                    return Some(challenge.clone());
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to decode PAYMENT-REQUIRED header, falling back to body");
            }
        }
    }

    let is_json = response
        .header("content-type")
        .map(|ct| ct.contains("json"))
        .unwrap_or(false);
    if is_json {
        if let Some(body) = &response.body {
            if let Ok(parsed) = serde_json::from_str::<PaymentRequiredBody>(body) {
                if parsed.challenge.version == ACE_PAYMENT_VERSION {
                    return Some(parsed.challenge);
                }
            }
        }
    }
    None
}

/// Wraps a [`Transport`] with automatic 402 detection, challenge signing,
/// and paid retry. See `spec.md` §4.F for the step-by-step behavior this
/// implements verbatim.
pub struct Interceptor<W: Wallet, S: SessionStore, T: Transport> {
    session: std::sync::Arc<SessionLedger<W, S>>,
    transport: T,
}

impl<W: Wallet, S: SessionStore, T: Transport> Interceptor<W, S, T> {
    pub fn new(session: std::sync::Arc<SessionLedger<W, S>>, transport: T) -> Self {
        Self { session, transport }
    }

    /// Perform one logical request, transparently paying for it if the
    /// origin responds `402`.
    pub async fn fetch(&self, req: Request) -> Result<Response, InterceptorError<T::Error>> {
        let original_headers = req.headers.clone();
        let method = req.method.clone();
        let url = req.url.clone();
        let body = req.body.clone();

        let already_has_payment = req.has_any_payment_header();
        let response = self
            .transport
            .send(req)
            .await
            .map_err(InterceptorError::Transport)?;

        if response.status != 402 {
            return Ok(response);
        }

        // Don't attach a second payment to an already-paid request.
        if already_has_payment {
            return Ok(response);
        }

        let Some(challenge) = extract_challenge(&response) else {
            return Ok(response);
        };

        let ctx = RequestContext {
            method: method.clone(),
            url: url.clone(),
            body: body.clone(),
        };
        let signed = self.session.sign_for_challenge(&challenge, &ctx).await?;

        let mut retry_headers = original_headers;
        retry_headers.insert(
            PAYMENT_SIGNATURE_HEADER.to_string(),
            ace_x402_core::protocol::encode_header(&signed)
                .map_err(LedgerError::Core)?,
        );
        retry_headers.insert(
            "x-ace-idempotency-key".to_string(),
            signed.unsigned.idempotency_key.clone(),
        );

        let retry_req = Request {
            method,
            url,
            headers: retry_headers,
            body,
        };

        let retry_result = self.transport.send(retry_req).await;
        let retry_response = match retry_result {
            Ok(resp) => resp,
            Err(e) => {
                self.session
                    .release_payment(&signed.unsigned.idempotency_key)
                    .await?;
                return Err(InterceptorError::Transport(e));
            }
        };

        if retry_response.is_success() {
            let echoed_key = retry_response
                .header(PAYMENT_SIGNATURE_HEADER)
                .and_then(|h| decode_header::<SignedPayment>(h).ok())
                .map(|p| p.unsigned.idempotency_key);
            match echoed_key {
                Some(echoed) if echoed != signed.unsigned.idempotency_key => {
                    warn!(
                        original = %signed.unsigned.idempotency_key,
                        echoed = %echoed,
                        "echoed PAYMENT-SIGNATURE idempotency key differs from the signed original; \
                         committing the echoed key and leaving the original pending until session expiry"
                    );
                    self.session.commit_payment(&echoed).await?;
                }
                Some(echoed) => self.session.commit_payment(&echoed).await?,
                None => {
                    self.session
                        .commit_payment(&signed.unsigned.idempotency_key)
                        .await?
                }
            }
        } else {
            self.session
                .release_payment(&signed.unsigned.idempotency_key)
                .await?;
        }

        Ok(retry_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySessionStore;
    use crate::wallet::test_util::LocalWallet;
    use ace_x402_core::challenge::create_challenge;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, thiserror::Error)]
    #[error("mock transport error")]
    struct MockTransportError;

    enum Step {
        Response(Response),
        Error,
    }

    struct MockTransport {
        steps: TokioMutex<Vec<Step>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for MockTransport {
        type Error = MockTransportError;

        async fn send(&self, _req: Request) -> Result<Response, Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut steps = self.steps.lock().await;
            match steps.remove(0) {
                Step::Response(r) => Ok(r),
                Step::Error => Err(MockTransportError),
            }
        }
    }

    fn challenge_402_response(resource: &str, method: &str, amount: u64) -> Response {
        let challenge = create_challenge(
            "secret",
            resource,
            method,
            amount,
            Utc::now(),
            Utc::now() + Duration::seconds(60),
            None,
            None,
        )
        .unwrap();
        let envelope = X402PaymentRequired::single(challenge, "off-chain", "0xpayee");
        let encoded = ace_x402_core::protocol::encode_header(&envelope).unwrap();
        let mut headers = HashMap::new();
        headers.insert(PAYMENT_REQUIRED_HEADER.to_string(), encoded);
        Response {
            status: 402,
            headers,
            body: None,
        }
    }

    async fn build_interceptor(
        steps: Vec<Step>,
        spend_limit: u64,
    ) -> (
        Interceptor<LocalWallet, InMemorySessionStore, MockTransport>,
        Arc<SessionLedger<LocalWallet, InMemorySessionStore>>,
    ) {
        let wallet = Arc::new(LocalWallet::random());
        let store = Arc::new(InMemorySessionStore::new());
        let session = Arc::new(
            SessionLedger::create(wallet, store, spend_limit, 86_400, None, None)
                .await
                .unwrap(),
        );
        let transport = MockTransport {
            steps: TokioMutex::new(steps),
            calls: AtomicUsize::new(0),
        };
        (Interceptor::new(session.clone(), transport), session)
    }

    #[tokio::test]
    async fn s1_happy_path_retries_and_commits() {
        let ok_response = Response {
            status: 200,
            headers: HashMap::new(),
            body: Some(r#"{"status":"ok"}"#.to_string()),
        };
        let (interceptor, session) = build_interceptor(
            vec![
                Step::Response(challenge_402_response("/compute?task=demo", "GET", 250_000)),
                Step::Response(ok_response),
            ],
            5_000_000,
        )
        .await;

        let resp = interceptor
            .fetch(Request::new("GET", "https://origin.test/compute?task=demo"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);

        let snap = session.snapshot().await;
        assert_eq!(snap.cumulative_spend_micro_usdc, 250_000);
        assert_eq!(snap.pending_spend_micro_usdc, 0);
        assert_eq!(snap.available_spend_micro_usdc, 4_750_000);
    }

    #[tokio::test]
    async fn s2_retry_server_error_releases_pending_spend() {
        let error_response = Response {
            status: 500,
            headers: HashMap::new(),
            body: None,
        };
        let (interceptor, session) = build_interceptor(
            vec![
                Step::Response(challenge_402_response("/compute", "GET", 1_000)),
                Step::Response(error_response),
            ],
            5_000_000,
        )
        .await;

        let resp = interceptor
            .fetch(Request::new("GET", "https://origin.test/compute"))
            .await
            .unwrap();
        assert_eq!(resp.status, 500);

        let snap = session.snapshot().await;
        assert_eq!(snap.cumulative_spend_micro_usdc, 0);
        assert_eq!(snap.pending_spend_micro_usdc, 0);
    }

    #[tokio::test]
    async fn s3_retry_transport_failure_releases_and_propagates() {
        let (interceptor, session) = build_interceptor(
            vec![
                Step::Response(challenge_402_response("/compute", "GET", 1_000)),
                Step::Error,
            ],
            5_000_000,
        )
        .await;

        let err = interceptor
            .fetch(Request::new("GET", "https://origin.test/compute"))
            .await
            .unwrap_err();
        assert!(matches!(err, InterceptorError::Transport(_)));

        let snap = session.snapshot().await;
        assert_eq!(snap.cumulative_spend_micro_usdc, 0);
        assert_eq!(snap.pending_spend_micro_usdc, 0);
    }

    #[tokio::test]
    async fn non_402_response_passes_through_unchanged() {
        let (interceptor, _session) = build_interceptor(
            vec![Step::Response(Response {
                status: 200,
                headers: HashMap::new(),
                body: None,
            })],
            5_000_000,
        )
        .await;
        let resp = interceptor
            .fetch(Request::new("GET", "https://origin.test/free"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn request_already_carrying_payment_header_is_not_retried() {
        let (interceptor, _session) = build_interceptor(
            vec![Step::Response(challenge_402_response("/compute", "GET", 1_000))],
            5_000_000,
        )
        .await;
        let mut req = Request::new("GET", "https://origin.test/compute");
        req.headers.insert("X-PAYMENT".to_string(), "already-here".to_string());
        let resp = interceptor.fetch(req).await.unwrap();
        assert_eq!(resp.status, 402);
    }
}
