//! # REST API
//!
//! Builds the axum router that exposes the verification gate over HTTP.
//! All endpoints share application state through axum's `State` extractor
//! and speak JSON only.
//!
//! ## Endpoints
//!
//! | Method | Path                 | Description                                |
//! |--------|----------------------|--------------------------------------------|
//! | GET    | `/health`            | Liveness check                             |
//! | GET    | `/api/nonce`         | Issue a single-use sign-in nonce           |
//! | POST   | `/api/verify-siwe`   | Verify a wallet sign-in, open a session    |
//! | POST   | `/api/verify-proof`  | Verify an identity proof for an action     |
//! | POST   | `/api/verify`        | Same, with the default action as fallback  |
//! | GET    | `/api/session/:id`   | Look up a session                          |
//! | DELETE | `/api/session/:id`   | End a session                              |

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use mystic_protocol::auth::{AuthenticatedUser, Session, WalletAuthPayload};
use mystic_protocol::identity::{IdentityProof, ProofGrant, VerificationLevel};
use mystic_protocol::{GateError, VerificationService};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The gateway's reported version string.
    pub version: String,
    pub service: Arc<VerificationService>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/nonce", get(nonce_handler))
        .route("/api/verify-siwe", post(verify_siwe_handler))
        .route("/api/verify-proof", post(verify_proof_handler))
        .route("/api/verify", post(verify_default_handler))
        .route(
            "/api/session/:id",
            get(session_handler).delete(end_session_handler),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request & Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /api/verify-siwe`.
#[derive(Debug, Deserialize)]
pub struct SiweRequest {
    pub payload: WalletAuthPayload,
    /// The nonce this client obtained from `GET /api/nonce`.
    pub nonce: String,
}

/// Body of `POST /api/verify-proof` and `POST /api/verify`.
#[derive(Debug, Deserialize)]
pub struct ProofRequest {
    pub payload: IdentityProof,
    pub action: Option<String>,
    pub signal: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    /// RFC 3339.
    pub expires_at: String,
}

/// Successful `POST /api/verify-siwe`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SiweResponse {
    pub success: bool,
    pub user: AuthenticatedUser,
    pub session: SessionSummary,
}

/// Successful proof verification.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProofResponse {
    pub success: bool,
    pub action: String,
    pub nullifier_hash: String,
    pub verification_level: VerificationLevel,
    pub idempotent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl From<ProofGrant> for ProofResponse {
    fn from(grant: ProofGrant) -> Self {
        Self {
            success: true,
            action: grant.action,
            nullifier_hash: grant.nullifier_hash,
            verification_level: grant.verification_level,
            idempotent: grant.idempotent,
            uses: grant.uses,
            created_at: grant.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Which failure shape an endpoint speaks. The sign-in endpoint reports its
/// code under `error`, the proof endpoints under `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Siwe,
    Proof,
}

/// A failure on its way to becoming an HTTP response.
#[derive(Debug)]
struct ApiError {
    surface: Surface,
    status: StatusCode,
    code: String,
    detail: String,
    attribute: Option<String>,
    retryable: bool,
}

impl ApiError {
    fn from_gate(surface: Surface, err: GateError) -> Self {
        match &err {
            GateError::Internal(reason) => {
                tracing::error!(error = %reason, "internal error while handling request");
            }
            GateError::Config(reason) => {
                tracing::error!(error = %reason, "verification refused: gateway is misconfigured");
            }
            _ => {}
        }

        let (code, detail) = (err.code().to_string(), err.public_detail());
        let attribute = match &err {
            GateError::ProofRejected { attribute, .. } => attribute.clone(),
            _ => None,
        };
        Self {
            surface,
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code,
            detail,
            attribute,
            retryable: err.is_retryable(),
        }
    }

    fn invalid_request(surface: Surface, detail: impl Into<String>) -> Self {
        Self {
            surface,
            status: StatusCode::BAD_REQUEST,
            code: "invalid_request".into(),
            detail: detail.into(),
            attribute: None,
            retryable: false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "success": false,
            "detail": self.detail,
        });
        let key = match self.surface {
            Surface::Siwe => "error",
            Surface::Proof => "code",
        };
        body[key] = self.code.into();
        if let Some(attribute) = self.attribute {
            body["attribute"] = attribute.into();
        }
        if self.retryable {
            body["retryable"] = true.into();
        }
        (self.status, Json(body)).into_response()
    }
}

fn json_body<T>(surface: Surface, body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::invalid_request(surface, rejection.body_text()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is alive.
/// Answers even when the authority credentials are missing.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "version": state.version })),
    )
}

/// `GET /api/nonce`: a fresh single-use nonce, never cached.
async fn nonce_handler(State(state): State<AppState>) -> Response {
    match state.service.issue_nonce() {
        Ok(nonce) => {
            state.metrics.nonces_issued_total.inc();
            (
                StatusCode::OK,
                [(header::CACHE_CONTROL, "no-store")],
                Json(NonceResponse { nonce: nonce.value }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to issue nonce");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CACHE_CONTROL, "no-store")],
                Json(serde_json::json!({ "error": "Failed to generate nonce" })),
            )
                .into_response()
        }
    }
}

/// `POST /api/verify-siwe`: verifies the signed message against the issued
/// nonce and opens a session.
async fn verify_siwe_handler(
    State(state): State<AppState>,
    body: Result<Json<SiweRequest>, JsonRejection>,
) -> Result<Json<SiweResponse>, ApiError> {
    let req = json_body(Surface::Siwe, body)?;

    match state.service.verify_wallet_auth(&req.payload, &req.nonce) {
        Ok((user, session)) => {
            state.metrics.wallet_auth_success_total.inc();
            Ok(Json(SiweResponse {
                success: true,
                user,
                session: summarize(&session),
            }))
        }
        Err(err) => {
            state
                .metrics
                .wallet_auth_failure_total
                .with_label_values(&[err.code()])
                .inc();
            Err(ApiError::from_gate(Surface::Siwe, err))
        }
    }
}

/// `POST /api/verify-proof`: `action` is required.
async fn verify_proof_handler(
    State(state): State<AppState>,
    body: Result<Json<ProofRequest>, JsonRejection>,
) -> Result<Json<ProofResponse>, ApiError> {
    let req = json_body(Surface::Proof, body)?;
    if req.action.as_deref().map_or(true, str::is_empty) {
        return Err(ApiError::invalid_request(
            Surface::Proof,
            "`action` is required.",
        ));
    }
    verify_proof(&state, req).await
}

/// `POST /api/verify`: `action` falls back to the configured default.
async fn verify_default_handler(
    State(state): State<AppState>,
    body: Result<Json<ProofRequest>, JsonRejection>,
) -> Result<Json<ProofResponse>, ApiError> {
    let req = json_body(Surface::Proof, body)?;
    verify_proof(&state, req).await
}

async fn verify_proof(state: &AppState, req: ProofRequest) -> Result<Json<ProofResponse>, ApiError> {
    let timer = state.metrics.authority_latency_seconds.start_timer();
    let result = state
        .service
        .verify_identity_proof(req.payload, req.action.as_deref(), req.signal)
        .await;
    timer.observe_duration();

    match result {
        Ok(grant) => {
            if grant.idempotent {
                state.metrics.proofs_idempotent_total.inc();
            } else {
                state.metrics.proofs_verified_total.inc();
            }
            Ok(Json(grant.into()))
        }
        Err(err) => {
            match &err {
                GateError::VerificationUnavailable(_) => {
                    state.metrics.authority_unavailable_total.inc()
                }
                GateError::ProofRejected { .. } => state.metrics.proofs_rejected_total.inc(),
                _ => {}
            }
            Err(ApiError::from_gate(Surface::Proof, err))
        }
    }
}

/// `GET /api/session/:id`
async fn session_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match parse_session_id(&id).and_then(|id| state.service.session(&id)) {
        Some(session) => (StatusCode::OK, Json(session)).into_response(),
        None => session_not_found(),
    }
}

/// `DELETE /api/session/:id`
async fn end_session_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match parse_session_id(&id) {
        Some(id) if state.service.end_session(&id) => StatusCode::NO_CONTENT.into_response(),
        _ => session_not_found(),
    }
}

fn parse_session_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

fn session_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Session not found" })),
    )
        .into_response()
}

fn summarize(session: &Session) -> SessionSummary {
    SessionSummary {
        id: session.id,
        expires_at: session.expires_at.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use mystic_protocol::auth::SiweMessage;
    use mystic_protocol::config::{Credentials, GateConfig};
    use mystic_protocol::identity::{
        AuthorityAcceptance, AuthorityClient, AuthorityRejection, AuthorityVerdict,
        TransportError,
    };
    use tower::ServiceExt;

    /// Answers every proof with the same scripted verdict.
    struct ScriptedAuthority(Result<AuthorityVerdict, TransportError>);

    #[async_trait]
    impl AuthorityClient for ScriptedAuthority {
        async fn verify_cloud_proof(
            &self,
            _proof: &IdentityProof,
            _credentials: &Credentials,
            _action: &str,
            _signal: Option<&str>,
        ) -> Result<AuthorityVerdict, TransportError> {
            self.0.clone()
        }
    }

    fn accepting() -> ScriptedAuthority {
        ScriptedAuthority(Ok(AuthorityVerdict::Accepted(AuthorityAcceptance {
            uses: Some(1),
            max_uses: Some(1),
            created_at: Some("2026-03-14T12:00:00Z".into()),
        })))
    }

    fn rejecting(code: &str) -> ScriptedAuthority {
        ScriptedAuthority(Ok(AuthorityVerdict::Rejected(AuthorityRejection {
            code: code.into(),
            detail: "The proof was rejected.".into(),
            attribute: None,
        })))
    }

    fn test_router(authority: ScriptedAuthority, with_credentials: bool) -> (Router, AppState) {
        let credentials = if with_credentials {
            Credentials::new("app_test", "sk_test")
        } else {
            Credentials::from_parts(None, Some("sk_test"))
        };
        let state = AppState {
            version: "0.1.0-test".into(),
            service: Arc::new(VerificationService::new(
                GateConfig::new(credentials),
                Arc::new(authority),
            )),
            metrics: Arc::new(crate::metrics::NodeMetrics::new().unwrap()),
        };
        (create_router(state.clone()), state)
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, headers, body)
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let (status, _, body) = send(router, req).await;
        (status, body)
    }

    async fn post_json(router: &Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let (status, _, body) = send(router, req).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn fetch_nonce(router: &Router) -> String {
        let (status, body) = get(router, "/api/nonce").await;
        assert_eq!(status, StatusCode::OK);
        let resp: NonceResponse = serde_json::from_slice(&body).unwrap();
        resp.nonce
    }

    fn signed_payload(signer: &PrivateKeySigner, nonce: &str) -> serde_json::Value {
        let message = SiweMessage {
            domain: "mysticpath.app".into(),
            address: signer.address().to_checksum(None),
            statement: Some("Sign in to Mystic Path.".into()),
            uri: "https://mysticpath.app".into(),
            version: "1".into(),
            chain_id: 480,
            nonce: nonce.into(),
            issued_at: "2026-01-01T00:00:00Z".into(),
            expiration_time: None,
            not_before: None,
            request_id: None,
            resources: vec![],
        }
        .to_string();
        let sig = signer.sign_message_sync(message.as_bytes()).unwrap();
        serde_json::json!({
            "status": "success",
            "message": message,
            "signature": format!("0x{}", hex::encode(sig.as_bytes())),
            "address": signer.address().to_checksum(None),
            "nonce": nonce,
            "version": 1
        })
    }

    fn proof_body(action: Option<&str>) -> serde_json::Value {
        let mut body = serde_json::json!({
            "payload": {
                "merkle_root": "0x1f38b57f3bdf96f05ea62fa68814871bf0ca8ce4dbe073d8497d5a6b0a53e5e0",
                "nullifier_hash": "0x2bf8406809dcefb1486dadc96c0a897db9bab002053054cf64272db512c6fbd8",
                "proof": "0x0a0b0c",
                "verification_level": "orb"
            },
            "signal": "0x71C7656EC7ab88b098defB751B7401B5f6d8976F"
        });
        if let Some(action) = action {
            body["action"] = action.into();
        }
        body
    }

    // -- Health & nonce ------------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (router, _) = test_router(accepting(), false);
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn nonce_endpoint_returns_distinct_uncached_nonces() {
        let (router, state) = test_router(accepting(), true);

        let req = Request::builder().uri("/api/nonce").body(Body::empty()).unwrap();
        let (status, headers, body) = send(&router, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let first: NonceResponse = serde_json::from_slice(&body).unwrap();

        let second = fetch_nonce(&router).await;
        assert_ne!(first.nonce, second);
        assert_eq!(first.nonce.len(), second.len());
        assert!(first.nonce.len() >= 32);
        assert_eq!(state.metrics.nonces_issued_total.get(), 2);
    }

    // -- Wallet sign-in ------------------------------------------------------

    #[tokio::test]
    async fn siwe_success_opens_a_session() {
        let (router, state) = test_router(accepting(), true);
        let signer = PrivateKeySigner::random();
        let nonce = fetch_nonce(&router).await;

        let (status, json) = post_json(
            &router,
            "/api/verify-siwe",
            serde_json::json!({ "payload": signed_payload(&signer, &nonce), "nonce": nonce }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["user"]["address"], signer.address().to_checksum(None));
        assert_eq!(state.metrics.wallet_auth_success_total.get(), 1);

        let session_id = json["session"]["id"].as_str().unwrap().to_string();
        let (status, body) = get(&router, &format!("/api/session/{session_id}")).await;
        assert_eq!(status, StatusCode::OK);
        let session: Session = serde_json::from_slice(&body).unwrap();
        assert_eq!(session.address, signer.address().to_checksum(None));
    }

    #[tokio::test]
    async fn siwe_with_other_nonce_fails() {
        let (router, _) = test_router(accepting(), true);
        let signer = PrivateKeySigner::random();
        let nonce = fetch_nonce(&router).await;

        let (status, json) = post_json(
            &router,
            "/api/verify-siwe",
            serde_json::json!({ "payload": signed_payload(&signer, &nonce), "nonce": "other" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "nonce_mismatch");
    }

    #[tokio::test]
    async fn siwe_replay_is_rejected() {
        let (router, _) = test_router(accepting(), true);
        let signer = PrivateKeySigner::random();
        let nonce = fetch_nonce(&router).await;
        let body = serde_json::json!({ "payload": signed_payload(&signer, &nonce), "nonce": nonce });

        let (status, _) = post_json(&router, "/api/verify-siwe", body.clone()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = post_json(&router, "/api/verify-siwe", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "nonce_replayed");
    }

    #[tokio::test]
    async fn siwe_wallet_error_status_is_remote_rejected() {
        let (router, _) = test_router(accepting(), true);
        let nonce = fetch_nonce(&router).await;
        let (status, json) = post_json(
            &router,
            "/api/verify-siwe",
            serde_json::json!({
                "payload": { "status": "error", "error_code": "user_rejected" },
                "nonce": nonce
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "remote_rejected");
    }

    #[tokio::test]
    async fn session_can_be_ended() {
        let (router, _) = test_router(accepting(), true);
        let signer = PrivateKeySigner::random();
        let nonce = fetch_nonce(&router).await;
        let (_, json) = post_json(
            &router,
            "/api/verify-siwe",
            serde_json::json!({ "payload": signed_payload(&signer, &nonce), "nonce": nonce }),
        )
        .await;
        let path = format!("/api/session/{}", json["session"]["id"].as_str().unwrap());

        let delete = |path: String| Request::builder().method("DELETE").uri(path).body(Body::empty()).unwrap();
        let (status, _, _) = send(&router, delete(path.clone())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, _) = send(&router, delete(path.clone())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(&router, &path).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(&router, "/api/session/not-a-uuid").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- Identity proofs -----------------------------------------------------

    #[tokio::test]
    async fn proof_accepted_then_idempotent() {
        let (router, state) = test_router(accepting(), true);

        let (status, json) = post_json(&router, "/api/verify-proof", proof_body(Some("daily-reading"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["action"], "daily-reading");
        assert_eq!(json["verification_level"], "orb");
        assert_eq!(json["idempotent"], false);
        assert_eq!(json["uses"], 1);

        let (status, json) = post_json(&router, "/api/verify-proof", proof_body(Some("daily-reading"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["idempotent"], true);
        assert_eq!(state.metrics.proofs_verified_total.get(), 1);
        assert_eq!(state.metrics.proofs_idempotent_total.get(), 1);
    }

    #[tokio::test]
    async fn proof_rejection_carries_authority_code() {
        let (router, state) = test_router(rejecting("invalid_merkle_root"), true);
        let (status, json) = post_json(&router, "/api/verify-proof", proof_body(Some("daily-reading"))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "invalid_merkle_root");
        assert_eq!(json["detail"], "The proof was rejected.");
        assert!(json.get("retryable").is_none());
        assert_eq!(state.metrics.proofs_rejected_total.get(), 1);
    }

    #[tokio::test]
    async fn proof_unavailable_is_retryable_502() {
        let (router, state) = test_router(ScriptedAuthority(Err(TransportError::Timeout)), true);
        let (status, json) = post_json(&router, "/api/verify-proof", proof_body(Some("daily-reading"))).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["code"], "verification_unavailable");
        assert_eq!(json["retryable"], true);
        assert!(!json["detail"].as_str().unwrap().contains("timed out"));
        assert_eq!(state.metrics.authority_unavailable_total.get(), 1);
    }

    #[tokio::test]
    async fn verify_proof_requires_action_but_verify_defaults_it() {
        let (router, _) = test_router(accepting(), true);

        let (status, json) = post_json(&router, "/api/verify-proof", proof_body(None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "invalid_request");

        let (status, json) = post_json(&router, "/api/verify", proof_body(None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["action"], "krishna-ji-chat");
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let (router, _) = test_router(accepting(), true);
        let (status, json) = post_json(&router, "/api/verify", proof_body(Some("ouija"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "invalid_action");
        assert_eq!(json["attribute"], "action");
    }

    #[tokio::test]
    async fn malformed_bodies_are_invalid_requests() {
        let (router, _) = test_router(accepting(), true);

        let req = Request::builder()
            .method("POST")
            .uri("/api/verify-proof")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, body) = send(&router, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "invalid_request");

        let (status, json) = post_json(&router, "/api/verify-siwe", serde_json::json!({ "nonce": 7 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid_request");
    }

    // -- Missing configuration -----------------------------------------------

    #[tokio::test]
    async fn missing_secrets_fail_every_verification_endpoint_with_500() {
        let (router, _) = test_router(accepting(), false);
        let signer = PrivateKeySigner::random();
        let nonce = fetch_nonce(&router).await;

        let (status, json) = post_json(
            &router,
            "/api/verify-siwe",
            serde_json::json!({ "payload": signed_payload(&signer, &nonce), "nonce": nonce }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "missing_secrets");

        for path in ["/api/verify-proof", "/api/verify"] {
            let (status, json) = post_json(&router, path, proof_body(Some("daily-reading"))).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{path}");
            assert_eq!(json["code"], "missing_secrets", "{path}");
        }
    }

    #[tokio::test]
    async fn concurrent_identical_proofs_credit_once() {
        let (router, state) = test_router(accepting(), true);

        let requests = (0..8).map(|_| {
            let router = router.clone();
            async move { post_json(&router, "/api/verify-proof", proof_body(Some("krishna-ji-chat"))).await }
        });
        let results = futures::future::join_all(requests).await;

        let fresh = results
            .iter()
            .filter(|(status, json)| *status == StatusCode::OK && json["idempotent"] == false)
            .count();
        assert_eq!(fresh, 1);
        assert!(results.iter().all(|(status, _)| *status == StatusCode::OK));
        assert_eq!(state.service.ledger().len(), 1);
    }
}
