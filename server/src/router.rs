//! The origin's axum router: challenge issuance, payment verification, and
//! ledger-gated dispatch to the injected compute workload.

use std::sync::Arc;

use ace_x402_core::protocol::{
    decode_header, encode_header, is_payment_header_name, PaymentRequiredBody,
    PaymentSettledResponse, X402PaymentRequired, IDEMPOTENCY_HEADER, PAYMENT_REQUIRED_HEADER,
    PAYMENT_RESPONSE_HEADER, PAYMENT_SIGNATURE_HEADER,
};
use ace_x402_core::signing::RequestContext;
use ace_x402_core::types::{PaymentLogRecord, SignedPayment};
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::{IdempotencyConflict, VerifyError};
use crate::ledger::{LedgerLookup, PaymentLedger};
use crate::verifier::{ChallengeIssuer, OriginVerifier};

/// The actual paid workload behind this origin. Left to the caller: this
/// crate only gates access to it.
#[async_trait]
pub trait ComputeHandler: Send + Sync + 'static {
    async fn compute(&self, method: &Method, uri: &Uri, body: &[u8]) -> Value;
}

pub struct OriginState<C: ComputeHandler> {
    pub issuer: ChallengeIssuer,
    pub verifier: OriginVerifier,
    pub ledger: PaymentLedger,
    pub network: String,
    pub pay_to: String,
    pub compute: Arc<C>,
}

/// Build the single protected route, instrumented with a request trace layer.
pub fn build_router<C: ComputeHandler>(state: Arc<OriginState<C>>) -> Router {
    Router::new()
        .route("/compute", get(handle_compute).post(handle_compute))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_compute<C: ComputeHandler>(
    State(state): State<Arc<OriginState<C>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payment_header = headers.iter().find_map(|(name, value)| {
        if is_payment_header_name(name.as_str()) {
            value.to_str().ok().map(str::to_string)
        } else {
            None
        }
    });

    let resource = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or(uri.path());
    let method_str = method.as_str().to_uppercase();

    let Some(header_value) = payment_header else {
        return challenge_response(&state, resource, &method_str);
    };

    let signed: SignedPayment = match decode_header(&header_value) {
        Ok(s) => s,
        Err(e) => return invalid_payment_response(&format!("malformed payment header: {e}")),
    };

    let url = format!("https://origin.local{resource}");
    let body_str = if body.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&body).into_owned())
    };
    let ctx = RequestContext {
        method: method_str.clone(),
        url,
        body: body_str,
    };

    let verified = match state.verifier.verify(&signed, &ctx) {
        Ok(v) => v,
        Err(VerifyError::InvalidPayment(msg)) => return invalid_payment_response(&msg),
        Err(VerifyError::Core(e)) => return invalid_payment_response(&e.to_string()),
    };

    let lookup = match state
        .ledger
        .lookup(
            &verified.idempotency_key,
            &verified.payer,
            verified.amount_micro_usdc,
            &verified.request_hash,
        )
        .await
    {
        Ok(l) => l,
        Err(e) => return internal_error_response(&e.to_string()),
    };

    let replayed = matches!(lookup, LedgerLookup::ReplayMatch(_));
    let record = match lookup {
        LedgerLookup::ReplayMatch(existing) => existing,
        LedgerLookup::Conflict(_) => {
            let conflict = IdempotencyConflict {
                idempotency_key: verified.idempotency_key.clone(),
            };
            return (
                StatusCode::CONFLICT,
                Json(json!({ "error": conflict.to_string() })),
            )
                .into_response();
        }
        LedgerLookup::Miss => {
            let result = state.compute.compute(&method, &uri, &body).await;
            let new_record = PaymentLogRecord {
                idempotency_key: verified.idempotency_key.clone(),
                payer: signed.unsigned.payer,
                amount_micro_usdc: verified.amount_micro_usdc,
                request_hash: verified.request_hash.clone(),
                challenge_id: verified.challenge_id.clone(),
                paid_at: Utc::now(),
                result,
            };
            match state.ledger.insert_if_absent(new_record).await {
                Ok(authoritative) => authoritative,
                Err(e) => return internal_error_response(&e.to_string()),
            }
        }
    };

    let settled = PaymentSettledResponse::new(record.idempotency_key.clone());
    let body = json!({
        "status": "ok",
        "replayed": replayed,
        "result": record.result.clone(),
        "payment": {
            "idempotencyKey": record.idempotency_key.clone(),
            "amountMicrousdc": record.amount_micro_usdc,
        },
    });
    let mut response = (StatusCode::OK, Json(body)).into_response();
    let resp_headers = response.headers_mut();
    if let Ok(value) = header_value.parse() {
        resp_headers.insert(PAYMENT_SIGNATURE_HEADER, value);
    }
    if let Ok(encoded) = encode_header(&settled) {
        if let Ok(value) = encoded.parse() {
            resp_headers.insert(PAYMENT_RESPONSE_HEADER, value);
        }
    }
    if let Ok(value) = record.idempotency_key.parse() {
        resp_headers.insert(IDEMPOTENCY_HEADER, value);
    }
    response
}

fn challenge_response<C: ComputeHandler>(
    state: &OriginState<C>,
    resource: &str,
    method: &str,
) -> Response {
    let challenge = match state.issuer.issue(resource, method) {
        Ok(c) => c,
        Err(e) => return internal_error_response(&e.to_string()),
    };
    let envelope = X402PaymentRequired::single(challenge.clone(), &state.network, &state.pay_to);
    let body = PaymentRequiredBody {
        error: "payment_required".to_string(),
        challenge,
    };
    let mut response = (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response();
    if let Ok(encoded) = encode_header(&envelope) {
        if let Ok(value) = encoded.parse() {
            response.headers_mut().insert(PAYMENT_REQUIRED_HEADER, value);
        }
    } else {
        warn!("failed to encode PAYMENT-REQUIRED header");
    }
    response
}

fn invalid_payment_response(message: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "error": "invalid_payment", "message": message })),
    )
        .into_response()
}

fn internal_error_response(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal_error", "message": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_x402_client::interceptor::{Interceptor, Request as ClientRequest, Transport};
    use ace_x402_client::ledger::SessionLedger;
    use ace_x402_client::store::InMemorySessionStore;
    use ace_x402_client::wallet::test_util::LocalWallet;
    use async_trait::async_trait as client_async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use std::sync::Arc as StdArc;
    use tower::ServiceExt;

    struct EchoCompute;

    #[async_trait]
    impl ComputeHandler for EchoCompute {
        async fn compute(&self, _method: &Method, uri: &Uri, _body: &[u8]) -> Value {
            json!({ "computed": uri.path() })
        }
    }

    fn test_state() -> StdArc<OriginState<EchoCompute>> {
        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("ledger.json");
        // Leaked deliberately: the ledger file only needs to outlive this
        // process's test run, and OriginState has no natural place to hold
        // the TempDir guard alongside it.
        std::mem::forget(dir);
        StdArc::new(OriginState {
            issuer: ChallengeIssuer::new("origin-secret", 1_000, 60),
            verifier: OriginVerifier::new("origin-secret", 1_000),
            ledger: PaymentLedger::new(ledger_path),
            network: "off-chain".to_string(),
            pay_to: "ace-origin".to_string(),
            compute: StdArc::new(EchoCompute),
        })
    }

    #[tokio::test]
    async fn s6_unpaid_request_gets_402_with_challenge() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("GET")
                    .uri("/compute")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert!(response.headers().get(PAYMENT_REQUIRED_HEADER).is_some());
    }

    struct RouterTransport {
        app: Router,
    }

    #[client_async_trait]
    impl Transport for RouterTransport {
        type Error = std::convert::Infallible;

        async fn send(
            &self,
            request: ClientRequest,
        ) -> Result<ace_x402_client::interceptor::Response, Self::Error> {
            let mut builder = HttpRequest::builder()
                .method(request.method.as_str())
                .uri(&request.url);
            for (k, v) in &request.headers {
                builder = builder.header(k, v);
            }
            let body = request.body.clone().unwrap_or_default();
            let http_req = builder.body(Body::from(body)).unwrap();
            let response = self.app.clone().oneshot(http_req).await.unwrap();
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = String::from_utf8_lossy(&bytes).into_owned();
            Ok(ace_x402_client::interceptor::Response {
                status,
                headers,
                body: if body.is_empty() { None } else { Some(body) },
            })
        }
    }

    #[tokio::test]
    async fn full_round_trip_through_interceptor_and_router() {
        let state = test_state();
        let app = build_router(state);
        let transport = RouterTransport { app };

        let wallet = StdArc::new(LocalWallet::random());
        let store = StdArc::new(InMemorySessionStore::new());
        let session = StdArc::new(
            SessionLedger::create(wallet, store, 1_000_000, 86_400, None, None)
                .await
                .unwrap(),
        );
        let interceptor = Interceptor::new(session, transport);

        let request = ClientRequest::new("GET", "https://origin.local/compute");
        let response = interceptor.fetch(request).await.unwrap();
        assert_eq!(response.status, 200);
    }
}
