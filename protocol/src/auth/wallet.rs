//! Wallet-signature verification.
//!
//! Checks run fail-fast, cheapest first:
//!
//! 1. wallet status is `success`
//! 2. nonces agree (payload, message and the expected nonce, byte for byte)
//! 3. the nonce is live in the store (replays are caught here, before any
//!    signature work)
//! 4. message fields: version, timestamps, domain
//! 5. the signature recovers to the claimed address
//! 6. the nonce is consumed, atomically
//!
//! Nothing here touches the network.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::nonce::{short, NonceStore};
use crate::auth::siwe::SiweMessage;
use crate::crypto::signatures::{parse_address, verify_personal_sign};
use crate::error::AuthFailure;

/// The signed message, as text or as structured fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignedMessage {
    /// Raw EIP-4361 text exactly as the wallet signed it.
    Text(String),
    /// Structured fields; the canonical text is rebuilt from them.
    Fields(SiweMessage),
}

impl SignedMessage {
    /// Normalises either form into a structured message.
    pub fn resolve(&self) -> Result<SiweMessage, AuthFailure> {
        match self {
            SignedMessage::Text(text) => text.parse().map_err(|e| {
                tracing::debug!(error = %e, "unparseable sign-in message");
                AuthFailure::MalformedMessage
            }),
            // Fields must render to text that parses back to themselves.
            SignedMessage::Fields(message) => message.to_string().parse().map_err(|e| {
                tracing::debug!(error = %e, "structured sign-in message is not canonical");
                AuthFailure::MalformedMessage
            }),
        }
    }
}

/// What a wallet returns from a sign-in request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAuthPayload {
    /// `success` or `error`.
    pub status: String,
    /// Wallet-side failure reason when `status` is `error`.
    pub error_code: Option<String>,
    /// Claimed signing account.
    pub address: Option<String>,
    /// 65-byte hex signature over the message.
    pub signature: Option<String>,
    pub message: Option<SignedMessage>,
    /// Nonce the client believes it signed.
    pub nonce: Option<String>,
    /// Display handle, if the wallet shares one.
    pub username: Option<String>,
    pub version: Option<u32>,
}

/// An account that has proven control of its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// EIP-55 checksummed address.
    pub address: String,
    pub username: Option<String>,
}

/// Outcome of a wallet sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Authenticated(AuthenticatedUser),
    Rejected(AuthFailure),
}

impl AuthResult {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthResult::Authenticated(_))
    }

    pub fn into_result(self) -> Result<AuthenticatedUser, AuthFailure> {
        match self {
            AuthResult::Authenticated(user) => Ok(user),
            AuthResult::Rejected(failure) => Err(failure),
        }
    }
}

impl From<Result<AuthenticatedUser, AuthFailure>> for AuthResult {
    fn from(result: Result<AuthenticatedUser, AuthFailure>) -> Self {
        match result {
            Ok(user) => AuthResult::Authenticated(user),
            Err(failure) => AuthResult::Rejected(failure),
        }
    }
}

/// Verifies a wallet sign-in against `expected_nonce` at the current time.
pub fn verify_wallet_auth(
    payload: &WalletAuthPayload,
    expected_nonce: &str,
    nonces: &NonceStore,
    expected_domain: Option<&str>,
) -> AuthResult {
    verify_wallet_auth_at(payload, expected_nonce, nonces, expected_domain, Utc::now())
}

/// Same as [`verify_wallet_auth`] with an explicit clock.
pub fn verify_wallet_auth_at(
    payload: &WalletAuthPayload,
    expected_nonce: &str,
    nonces: &NonceStore,
    expected_domain: Option<&str>,
    now: DateTime<Utc>,
) -> AuthResult {
    let result = authenticate(payload, expected_nonce, nonces, expected_domain, now);
    match &result {
        Ok(user) => tracing::info!(address = %user.address, "wallet sign-in accepted"),
        Err(failure) => tracing::warn!(
            nonce = %short(expected_nonce),
            reason = failure.code(),
            "wallet sign-in rejected"
        ),
    }
    result.into()
}

fn authenticate(
    payload: &WalletAuthPayload,
    expected_nonce: &str,
    nonces: &NonceStore,
    expected_domain: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AuthenticatedUser, AuthFailure> {
    if payload.status != "success" {
        return Err(AuthFailure::RemoteRejected);
    }

    if payload.nonce.as_deref().is_some_and(|n| n != expected_nonce) {
        return Err(AuthFailure::NonceMismatch);
    }
    let message = payload
        .message
        .as_ref()
        .ok_or(AuthFailure::MalformedMessage)?
        .resolve()?;
    if message.nonce != expected_nonce {
        return Err(AuthFailure::NonceMismatch);
    }

    nonces.check(expected_nonce)?;
    message.validate(now, expected_domain)?;

    let signer = message.account().map_err(|_| AuthFailure::MalformedMessage)?;
    if let Some(claimed) = payload.address.as_deref() {
        match parse_address(claimed) {
            Ok(claimed) if claimed == signer => {}
            _ => return Err(AuthFailure::BadSignature),
        }
    }
    let signature = payload
        .signature
        .as_deref()
        .ok_or(AuthFailure::BadSignature)?;
    verify_personal_sign(&signer, &message.signing_bytes(), signature)
        .map_err(|_| AuthFailure::BadSignature)?;

    nonces.consume(expected_nonce)?;

    Ok(AuthenticatedUser {
        address: signer.to_checksum(None),
        username: payload.username.clone(),
    })
}
