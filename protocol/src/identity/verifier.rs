//! Identity-proof verification.
//!
//! The remote call happens first, with no lock held. Only its outcome
//! touches the ledger, in one atomic step:
//!
//! ```text
//!   format check ──► authority ──Accepted──► ledger.mark_verified ──► Verified
//!                        │
//!                        ├──Rejected──► already verified, and a live grant
//!                        │              earned by this nullifier? ──yes──► Verified (idempotent)
//!                        │                                        └──no───► Rejected (verbatim)
//!                        │
//!                        └──transport error / deadline──► Unavailable
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ActionPolicy, Credentials, ScopeKind};
use crate::error::GateError;
use crate::identity::authority::{AuthorityClient, AuthorityVerdict};
use crate::identity::proof::{IdentityProof, VerificationLevel};
use crate::ledger::{MarkOutcome, VerificationLedger, VerificationRecord};

/// A granted verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofGrant {
    pub action: String,
    pub nullifier_hash: String,
    pub verification_level: VerificationLevel,
    /// Ledger key the grant is recorded under.
    pub scope_key: String,
    /// `true` when the grant already existed before this request.
    pub idempotent: bool,
    pub uses: Option<u64>,
    pub max_uses: Option<u64>,
    /// Authority-side creation time, when reported.
    pub created_at: Option<String>,
    pub verified_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of a proof verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofResult {
    Verified(ProofGrant),
    Rejected {
        code: String,
        detail: String,
        attribute: Option<String>,
    },
    /// No definitive answer. The caller may retry with the same proof.
    Unavailable(String),
}

impl ProofResult {
    pub fn into_result(self) -> Result<ProofGrant, GateError> {
        match self {
            ProofResult::Verified(grant) => Ok(grant),
            ProofResult::Rejected {
                code,
                detail,
                attribute,
            } => Err(GateError::ProofRejected {
                code,
                detail,
                attribute,
            }),
            ProofResult::Unavailable(reason) => Err(GateError::VerificationUnavailable(reason)),
        }
    }
}

impl From<GateError> for ProofResult {
    fn from(err: GateError) -> Self {
        match err {
            GateError::ProofRejected {
                code,
                detail,
                attribute,
            } => ProofResult::Rejected {
                code,
                detail,
                attribute,
            },
            GateError::VerificationUnavailable(reason) => ProofResult::Unavailable(reason),
            other => ProofResult::Rejected {
                code: other.code().to_string(),
                detail: other.public_detail(),
                attribute: None,
            },
        }
    }
}

/// Verifies proofs against the authority and records grants.
#[derive(Clone)]
pub struct ProofVerifier {
    authority: Arc<dyn AuthorityClient>,
    ledger: Arc<VerificationLedger>,
    deadline: Duration,
}

impl ProofVerifier {
    /// `deadline` bounds the whole authority exchange, retries included.
    pub fn new(
        authority: Arc<dyn AuthorityClient>,
        ledger: Arc<VerificationLedger>,
        deadline: Duration,
    ) -> Self {
        Self {
            authority,
            ledger,
            deadline,
        }
    }

    pub fn ledger(&self) -> &VerificationLedger {
        &self.ledger
    }

    /// Ledger key for `proof` under `policy`.
    pub fn scope_key(proof: &IdentityProof, policy: &ActionPolicy, signal: Option<&str>) -> String {
        match (policy.scope, signal) {
            (ScopeKind::Signal, Some(signal)) if !signal.is_empty() => signal.to_ascii_lowercase(),
            _ => proof.nullifier_key(),
        }
    }

    pub async fn verify(
        &self,
        proof: &IdentityProof,
        policy: &ActionPolicy,
        signal: Option<&str>,
        credentials: &Credentials,
    ) -> ProofResult {
        if let Err(err) = proof.check_format() {
            tracing::warn!(action = %policy.name, code = err.code(), "proof refused before authority call");
            return err.into();
        }

        let scope_key = Self::scope_key(proof, policy, signal);
        let call = self
            .authority
            .verify_cloud_proof(proof, credentials, &policy.name, signal);

        let verdict = match tokio::time::timeout(self.deadline, call).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => {
                tracing::warn!(action = %policy.name, error = %err, "verification authority unavailable");
                return ProofResult::Unavailable(err.to_string());
            }
            Err(_) => {
                tracing::warn!(action = %policy.name, deadline = ?self.deadline, "verification authority deadline exceeded");
                return ProofResult::Unavailable("verification deadline exceeded".into());
            }
        };

        let now = Utc::now();
        match verdict {
            AuthorityVerdict::Accepted(acceptance) => {
                let outcome = self.ledger.mark_verified(
                    &scope_key,
                    &proof.nullifier_key(),
                    &policy.name,
                    proof.verification_level,
                    policy.periodicity,
                    now,
                );
                let idempotent = !outcome.is_fresh();
                let record = match outcome {
                    MarkOutcome::Fresh(r) | MarkOutcome::AlreadyVerified(r) => r,
                };
                ProofResult::Verified(ProofGrant {
                    uses: acceptance.uses,
                    max_uses: acceptance.max_uses,
                    created_at: acceptance.created_at,
                    ..grant(proof, record, idempotent)
                })
            }
            AuthorityVerdict::Rejected(rejection) => {
                let standing = rejection
                    .is_already_verified()
                    .then(|| self.ledger.record(&scope_key, &policy.name))
                    .flatten()
                    .filter(|record| record.nullifier_hash == proof.nullifier_key());
                if let Some(record) = standing {
                    tracing::info!(
                        action = %policy.name,
                        code = %rejection.code,
                        "authority rejected a proof for a live grant, answering idempotently"
                    );
                    return ProofResult::Verified(grant(proof, record, true));
                }
                tracing::warn!(action = %policy.name, code = %rejection.code, "proof rejected by authority");
                ProofResult::Rejected {
                    code: rejection.code,
                    detail: rejection.detail,
                    attribute: rejection.attribute,
                }
            }
        }
    }
}

fn grant(proof: &IdentityProof, record: VerificationRecord, idempotent: bool) -> ProofGrant {
    ProofGrant {
        action: record.action,
        nullifier_hash: proof.nullifier_hash.clone(),
        verification_level: record.verification_level,
        scope_key: record.scope_key,
        idempotent,
        uses: None,
        max_uses: None,
        created_at: None,
        verified_at: record.verified_at,
        expires_at: record.expires_at,
    }
}
