//! # Verification Service
//!
//! The single entry point the transport layer talks to. Owns the nonce
//! store, the session table and the ledger, and wires the authority client
//! into the proof verifier.
//!
//! Both verification paths check the deployment's credentials first, so a
//! misconfigured gate fails every verification the same way until an
//! operator fixes it.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::auth::nonce::{Nonce, NonceStore};
use crate::auth::session::{Session, SessionStore};
use crate::auth::wallet::{self, AuthenticatedUser, WalletAuthPayload};
use crate::config::{self, GateConfig};
use crate::error::GateError;
use crate::identity::authority::{AuthorityClient, DeveloperPortalClient};
use crate::identity::proof::IdentityProof;
use crate::identity::verifier::{ProofGrant, ProofVerifier};
use crate::ledger::VerificationLedger;

/// What a housekeeping pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HousekeepingReport {
    pub nonces: usize,
    pub sessions: usize,
    pub records: usize,
}

/// Point-in-time sizes of the gate's stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub live_nonces: usize,
    pub sessions: usize,
    pub ledger_entries: usize,
}

pub struct VerificationService {
    config: GateConfig,
    nonces: NonceStore,
    sessions: SessionStore,
    ledger: Arc<VerificationLedger>,
    verifier: ProofVerifier,
}

impl VerificationService {
    pub fn new(config: GateConfig, authority: Arc<dyn AuthorityClient>) -> Self {
        let ledger = Arc::new(VerificationLedger::new());
        let verifier = ProofVerifier::new(authority, Arc::clone(&ledger), authority_deadline(&config));

        Self {
            nonces: NonceStore::new(config.nonce_ttl),
            sessions: SessionStore::new(config.session_ttl),
            ledger,
            verifier,
            config,
        }
    }

    /// Builds the service with the HTTP authority client.
    pub fn from_config(config: GateConfig) -> Self {
        let authority = Arc::new(DeveloperPortalClient::from_config(&config));
        Self::new(config, authority)
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn ledger(&self) -> &VerificationLedger {
        &self.ledger
    }

    pub fn issue_nonce(&self) -> Result<Nonce, GateError> {
        self.nonces.issue()
    }

    /// Verifies a wallet sign-in and, on success, mints a session.
    pub fn verify_wallet_auth(
        &self,
        payload: &WalletAuthPayload,
        expected_nonce: &str,
    ) -> Result<(AuthenticatedUser, Session), GateError> {
        self.config.credentials()?;

        let user = wallet::verify_wallet_auth(
            payload,
            expected_nonce,
            &self.nonces,
            self.config.siwe_domain.as_deref(),
        )
        .into_result()?;

        let session = self.sessions.mint(&user);
        Ok((user, session))
    }

    /// Verifies an identity proof for `action` (or the default action).
    ///
    /// The authority exchange runs on its own task: if the caller goes away
    /// mid-request the verification still completes and is recorded.
    pub async fn verify_identity_proof(
        &self,
        proof: IdentityProof,
        action: Option<&str>,
        signal: Option<String>,
    ) -> Result<ProofGrant, GateError> {
        let credentials = self.config.credentials()?.clone();

        let action = action.unwrap_or(&self.config.default_action);
        let policy = self
            .config
            .action(action)
            .cloned()
            .ok_or_else(|| GateError::ProofRejected {
                code: "invalid_action".into(),
                detail: format!("Action {action:?} is not registered."),
                attribute: Some("action".into()),
            })?;

        let verifier = self.verifier.clone();
        let task = tokio::spawn(async move {
            verifier
                .verify(&proof, &policy, signal.as_deref(), &credentials)
                .await
        });

        task.await
            .map_err(|e| GateError::Internal(format!("verification task failed: {e}")))?
            .into_result()
    }

    pub fn session(&self, id: &Uuid) -> Option<Session> {
        self.sessions.get(id)
    }

    pub fn end_session(&self, id: &Uuid) -> bool {
        self.sessions.invalidate(id)
    }

    pub fn is_verified(&self, scope_key: &str, action: &str) -> bool {
        self.ledger.is_verified(scope_key, action)
    }

    /// Purges everything that has expired.
    pub fn housekeeping(&self) -> HousekeepingReport {
        let report = HousekeepingReport {
            nonces: self.nonces.purge_expired(),
            sessions: self.sessions.purge_expired(),
            records: self.ledger.purge_expired(chrono::Utc::now()),
        };
        if report != HousekeepingReport::default() {
            tracing::debug!(?report, "housekeeping purged expired entries");
        }
        report
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            live_nonces: self.nonces.live_count(),
            sessions: self.sessions.len(),
            ledger_entries: self.ledger.len(),
        }
    }
}

/// Upper bound on one authority exchange: every attempt may time out, and
/// every retry may wait the maximum backoff.
fn authority_deadline(config: &GateConfig) -> std::time::Duration {
    let attempts = config.authority_retries.saturating_add(1);
    config
        .authority_timeout
        .saturating_mul(attempts)
        .saturating_add(config::AUTHORITY_MAX_BACKOFF.saturating_mul(config.authority_retries))
}
