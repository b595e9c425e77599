//! # Verification Authority Client
//!
//! The remote "verify cloud proof" collaborator. The authority checks the
//! zero-knowledge proof and keeps the global nullifier registry; this
//! module only carries the question over and classifies the answer.
//!
//! ## Wire contract
//!
//! `POST {base}/api/v2/verify/{app_id}` with a bearer credential and
//!
//! ```json
//! { "nullifier_hash": "0x..", "merkle_root": "0x..", "proof": "0x..",
//!   "verification_level": "orb", "action": "daily-reading",
//!   "signal_hash": "0x00.." }
//! ```
//!
//! | Answer                         | Outcome                           |
//! |--------------------------------|-----------------------------------|
//! | 200                            | `Accepted`                        |
//! | 4xx with `{code, detail, ..}`  | `Rejected`, verbatim              |
//! | 429, 5xx, timeout, connect     | retried, then `TransportError`    |
//! | anything else                  | `TransportError::InvalidResponse` |

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{self, Credentials, GateConfig};
use crate::identity::proof::{hash_signal, IdentityProof, VerificationLevel};

/// Failure to get a definitive answer from the authority.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("authority request timed out")]
    Timeout,

    #[error("could not connect to authority: {0}")]
    Connect(String),

    #[error("authority returned transient status {0}")]
    Status(u16),

    #[error("authority request failed: {0}")]
    Request(String),

    #[error("unexpected authority response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::Connect(_) | TransportError::Status(_)
        )
    }
}

/// Details the authority returns with a successful verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityAcceptance {
    /// Verifications recorded for this nullifier and action, this one included.
    #[serde(default)]
    pub uses: Option<u64>,
    #[serde(default)]
    pub max_uses: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Body of a 2xx answer. `success` is absent on older deployments.
#[derive(Debug, Deserialize)]
struct AcceptanceBody {
    #[serde(default)]
    success: Option<bool>,
    #[serde(flatten)]
    acceptance: AuthorityAcceptance,
}

/// A 2xx only counts as acceptance when its body says so.
fn parse_acceptance(bytes: &[u8]) -> Result<AuthorityAcceptance, TransportError> {
    let body: AcceptanceBody = serde_json::from_slice(bytes).map_err(|e| {
        tracing::warn!(error = %e, "authority answered success with an unreadable body");
        TransportError::InvalidResponse(format!("unreadable success body: {e}"))
    })?;
    if body.success == Some(false) {
        tracing::warn!("authority answered success with `success: false`");
        return Err(TransportError::InvalidResponse(
            "success status with `success: false`".into(),
        ));
    }
    Ok(body.acceptance)
}

/// The authority's reason for refusing a proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRejection {
    pub code: String,
    pub detail: String,
    #[serde(default)]
    pub attribute: Option<String>,
}

impl AuthorityRejection {
    /// Whether the authority refused because this nullifier has already
    /// used up its verifications for the action.
    pub fn is_already_verified(&self) -> bool {
        config::ALREADY_VERIFIED_CODES.contains(&self.code.as_str())
    }
}

/// A definitive answer from the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityVerdict {
    Accepted(AuthorityAcceptance),
    Rejected(AuthorityRejection),
}

/// The remote verification authority.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Asks the authority whether `proof` is valid for `action` and
    /// `signal` under the deployment's `credentials`.
    async fn verify_cloud_proof(
        &self,
        proof: &IdentityProof,
        credentials: &Credentials,
        action: &str,
        signal: Option<&str>,
    ) -> Result<AuthorityVerdict, TransportError>;
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    nullifier_hash: &'a str,
    merkle_root: &'a str,
    proof: &'a str,
    verification_level: VerificationLevel,
    action: &'a str,
    signal_hash: String,
}

/// HTTP client for the identity authority's developer portal.
#[derive(Debug, Clone)]
pub struct DeveloperPortalClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
}

impl DeveloperPortalClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
            max_retries,
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(
            config.authority_url.clone(),
            config.authority_timeout,
            config.authority_retries,
        )
    }

    fn verify_url(&self, app_id: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url.trim_end_matches('/'),
            config::AUTHORITY_VERIFY_PATH,
            app_id
        )
    }

    async fn send_once(
        &self,
        url: &str,
        secret: &str,
        body: &VerifyRequest<'_>,
    ) -> Result<reqwest::Response, TransportError> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header(
                "User-Agent",
                format!("mystic-protocol/{}", env!("CARGO_PKG_VERSION")),
            )
            .bearer_auth(secret)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout
                } else if err.is_connect() {
                    TransportError::Connect(err.to_string())
                } else {
                    TransportError::Request(err.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl AuthorityClient for DeveloperPortalClient {
    async fn verify_cloud_proof(
        &self,
        proof: &IdentityProof,
        credentials: &Credentials,
        action: &str,
        signal: Option<&str>,
    ) -> Result<AuthorityVerdict, TransportError> {
        let url = self.verify_url(credentials.app_id());
        let body = VerifyRequest {
            nullifier_hash: &proof.nullifier_hash,
            merkle_root: &proof.merkle_root,
            proof: &proof.proof,
            verification_level: proof.verification_level,
            action,
            signal_hash: hash_signal(signal),
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(config::AUTHORITY_MAX_BACKOFF)
            .with_max_times(self.max_retries as usize);

        let response = (|| async { self.send_once(&url, credentials.secret(), &body).await })
            .retry(backoff)
            .when(|err: &TransportError| err.is_retryable())
            .notify(|err: &TransportError, after: Duration| {
                tracing::warn!(error = %err, retry_in = ?after, "authority call failed, retrying");
            })
            .await?;

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
            return parse_acceptance(&bytes).map(AuthorityVerdict::Accepted);
        }

        if status.is_client_error() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
            return serde_json::from_slice::<AuthorityRejection>(&bytes)
                .map(AuthorityVerdict::Rejected)
                .map_err(|e| {
                    TransportError::InvalidResponse(format!("{status} with unreadable body: {e}"))
                });
        }

        Err(TransportError::InvalidResponse(format!(
            "unexpected status {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const PATH: &str = "/api/v2/verify/app_staging_123";

    fn creds() -> Credentials {
        Credentials::new("app_staging_123", "sk_test_secret").unwrap()
    }

    fn proof() -> IdentityProof {
        IdentityProof {
            merkle_root: "0x1f38b57f3bdf96f05ea62fa68814871bf0ca8ce4dbe073d8497d5a6b0a53e5e0".into(),
            nullifier_hash: "0x2bf8406809dcefb1486dadc96c0a897db9bab002053054cf64272db512c6fbd8".into(),
            proof: "0x0a".into(),
            verification_level: VerificationLevel::Orb,
        }
    }

    fn client(server: &Server, retries: u32) -> DeveloperPortalClient {
        DeveloperPortalClient::new(server.url(), Duration::from_secs(2), retries)
    }

    #[tokio::test]
    async fn test_accepted_proof() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_header("authorization", "Bearer sk_test_secret")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "action": "daily-reading",
                "verification_level": "orb",
                "signal_hash": hash_signal(Some("0xabcd")),
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"uses":1,"max_uses":1,"created_at":"2026-03-14T12:00:00Z"}"#)
            .create_async()
            .await;

        let verdict = client(&server, 0)
            .verify_cloud_proof(&proof(), &creds(), "daily-reading", Some("0xabcd"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            verdict,
            AuthorityVerdict::Accepted(AuthorityAcceptance {
                uses: Some(1),
                max_uses: Some(1),
                created_at: Some("2026-03-14T12:00:00Z".into()),
            })
        );
    }

    #[tokio::test]
    async fn test_rejection_is_verbatim() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .with_status(400)
            .expect(1)
            .with_body(
                r#"{"code":"max_verifications_reached","detail":"This person has already verified for this action.","attribute":null}"#,
            )
            .create_async()
            .await;

        let verdict = client(&server, 2)
            .verify_cloud_proof(&proof(), &creds(), "krishna-ji-chat", None)
            .await
            .unwrap();

        // Rejections are final, never retried.
        mock.assert_async().await;
        assert_eq!(
            verdict,
            AuthorityVerdict::Rejected(AuthorityRejection {
                code: "max_verifications_reached".into(),
                detail: "This person has already verified for this action.".into(),
                attribute: None,
            })
        );
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = client(&server, 2)
            .verify_cloud_proof(&proof(), &creds(), "daily-reading", None)
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert_eq!(err, TransportError::Status(503));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreadable_rejection_is_invalid_response() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", PATH)
            .with_status(404)
            .with_body("<html>not found</html>")
            .create_async()
            .await;

        let err = client(&server, 0)
            .verify_cloud_proof(&proof(), &creds(), "daily-reading", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_success_status_needs_a_readable_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", PATH)
            .with_status(200)
            .with_body("<html>ok</html>")
            .create_async()
            .await;

        let err = client(&server, 0)
            .verify_cloud_proof(&proof(), &creds(), "daily-reading", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_success_status_with_success_false_is_not_acceptance() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", PATH)
            .with_status(200)
            .with_body(r#"{"success":false}"#)
            .create_async()
            .await;

        let err = client(&server, 0)
            .verify_cloud_proof(&proof(), &creds(), "daily-reading", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
    }

    #[test]
    fn test_already_verified_codes() {
        let rejection = |code: &str| AuthorityRejection {
            code: code.into(),
            detail: String::new(),
            attribute: None,
        };
        assert!(rejection("max_verifications_reached").is_already_verified());
        assert!(rejection("already_verified").is_already_verified());
        assert!(!rejection("invalid_proof").is_already_verified());
        assert!(!rejection("invalid_merkle_root").is_already_verified());
    }

    #[tokio::test]
    async fn test_unreachable_authority() {
        let client = DeveloperPortalClient::new("http://127.0.0.1:1", Duration::from_millis(500), 0);
        let err = client
            .verify_cloud_proof(&proof(), &creds(), "daily-reading", None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_verify_url() {
        let client = DeveloperPortalClient::new("https://developer.worldcoin.org/", Duration::ZERO, 0);
        assert_eq!(
            client.verify_url("app_123"),
            "https://developer.worldcoin.org/api/v2/verify/app_123"
        );
    }
}
