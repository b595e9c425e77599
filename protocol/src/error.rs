//! Error types for the verification gate.
//!
//! Every operation that can refuse trust returns a [`GateError`]. The enum
//! is exhaustive over the five failure classes a client can observe, and
//! each variant carries a stable snake_case code for machine consumption.

use thiserror::Error;

/// Why a deployment cannot verify anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// One or more required secrets are absent.
    #[error("missing required secrets: {}", .0.join(", "))]
    MissingSecrets(Vec<&'static str>),

    /// The application identifier does not have the authority's shape.
    #[error("invalid app id {0:?}: expected an `app_` prefix")]
    InvalidAppId(String),

    /// An action policy could not be parsed or conflicts with another.
    #[error("invalid action policy {0:?}: {1}")]
    InvalidAction(String, String),

    /// The default action is not among the registered actions.
    #[error("default action {0:?} is not registered")]
    UnknownDefaultAction(String),
}

impl ConfigError {
    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::MissingSecrets(_) => "missing_secrets",
            ConfigError::InvalidAppId(_) => "invalid_app_id",
            ConfigError::InvalidAction(..) => "invalid_action_config",
            ConfigError::UnknownDefaultAction(_) => "unknown_default_action",
        }
    }
}

/// Why a wallet sign-in was refused.
///
/// Codes are deliberately coarse for signature failures: a wrong key, a
/// tampered message and a garbage signature all read `bad_signature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// The wallet itself reported a non-success status.
    #[error("remote_rejected")]
    RemoteRejected,
    /// The message nonce differs from the nonce the client claims.
    #[error("nonce_mismatch")]
    NonceMismatch,
    /// The nonce was never issued by this service (or was purged).
    #[error("nonce_unknown")]
    NonceUnknown,
    /// The nonce outlived its validity window.
    #[error("nonce_expired")]
    NonceExpired,
    /// The nonce has already been redeemed.
    #[error("nonce_replayed")]
    NonceReplayed,
    /// The signed message is missing or not a canonical EIP-4361 message.
    #[error("malformed_message")]
    MalformedMessage,
    /// The message's expiration time has passed.
    #[error("message_expired")]
    MessageExpired,
    /// The message's not-before time is still in the future.
    #[error("message_not_yet_valid")]
    MessageNotYetValid,
    /// The message was produced for a different domain.
    #[error("domain_mismatch")]
    DomainMismatch,
    /// The signature does not recover to the claimed address.
    #[error("bad_signature")]
    BadSignature,
}

impl AuthFailure {
    /// Machine-readable code (identical to the `Display` output).
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::RemoteRejected => "remote_rejected",
            AuthFailure::NonceMismatch => "nonce_mismatch",
            AuthFailure::NonceUnknown => "nonce_unknown",
            AuthFailure::NonceExpired => "nonce_expired",
            AuthFailure::NonceReplayed => "nonce_replayed",
            AuthFailure::MalformedMessage => "malformed_message",
            AuthFailure::MessageExpired => "message_expired",
            AuthFailure::MessageNotYetValid => "message_not_yet_valid",
            AuthFailure::DomainMismatch => "domain_mismatch",
            AuthFailure::BadSignature => "bad_signature",
        }
    }

    /// Human-readable explanation for clients.
    pub fn detail(&self) -> &'static str {
        match self {
            AuthFailure::RemoteRejected => "The wallet did not complete the sign-in request.",
            AuthFailure::NonceMismatch => "The signed nonce does not match the issued nonce.",
            AuthFailure::NonceUnknown => "The nonce was not issued by this service.",
            AuthFailure::NonceExpired => "The nonce has expired. Request a new one.",
            AuthFailure::NonceReplayed => "The nonce has already been used.",
            AuthFailure::MalformedMessage => "The signed message is missing or malformed.",
            AuthFailure::MessageExpired => "The signed message has expired.",
            AuthFailure::MessageNotYetValid => "The signed message is not valid yet.",
            AuthFailure::DomainMismatch => "The signed message was issued for another domain.",
            AuthFailure::BadSignature => "Invalid signature.",
        }
    }
}

/// Top-level failure of a gate operation.
#[derive(Debug, Clone, Error)]
pub enum GateError {
    /// The deployment is misconfigured. Fatal until an operator fixes it.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Wallet sign-in refused. Never retried automatically.
    #[error("authentication failed: {0}")]
    AuthFailed(#[from] AuthFailure),

    /// The identity authority (or local format checks) refused the proof.
    /// `code` and `detail` are the authority's, verbatim.
    #[error("proof rejected: {code}")]
    ProofRejected {
        /// Authority reason code, e.g. `max_verifications_reached`.
        code: String,
        /// Authority explanation.
        detail: String,
        /// Offending field, when the authority names one.
        attribute: Option<String>,
    },

    /// The authority could not be reached in time. Safe to retry.
    #[error("verification authority unavailable: {0}")]
    VerificationUnavailable(String),

    /// Anything unexpected. Details stay in the server logs.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Convenience constructor for locally detected proof problems.
    pub fn rejected(code: impl Into<String>, detail: impl Into<String>) -> Self {
        GateError::ProofRejected {
            code: code.into(),
            detail: detail.into(),
            attribute: None,
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &str {
        match self {
            GateError::Config(e) => e.code(),
            GateError::AuthFailed(f) => f.code(),
            GateError::ProofRejected { code, .. } => code,
            GateError::VerificationUnavailable(_) => "verification_unavailable",
            GateError::Internal(_) => "internal_error",
        }
    }

    /// Detail safe to show to clients. Internal errors are never echoed.
    pub fn public_detail(&self) -> String {
        match self {
            GateError::Config(ConfigError::MissingSecrets(_)) => {
                "WLD_APP_ID and WLD_SECRET_KEY must be set on the server.".to_string()
            }
            GateError::Config(_) => "The server is misconfigured.".to_string(),
            GateError::AuthFailed(f) => f.detail().to_string(),
            GateError::ProofRejected { detail, .. } => detail.clone(),
            GateError::VerificationUnavailable(_) => {
                "The verification service is temporarily unavailable. Please retry.".to_string()
            }
            GateError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Whether the client may retry with the same proof or message.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GateError::VerificationUnavailable(_))
    }

    /// HTTP status the failure maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            GateError::AuthFailed(_) | GateError::ProofRejected { .. } => 400,
            GateError::VerificationUnavailable(_) => 502,
            GateError::Config(_) | GateError::Internal(_) => 500,
        }
    }
}
