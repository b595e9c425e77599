//! # Verification Ledger
//!
//! Local record of which scopes hold a live "human-verified" grant for which
//! action. The authority is the source of truth for proof validity; the
//! ledger is an idempotency guard on top of it.
//!
//! ## Invariants
//!
//! - At most one live grant per `(scope_key, action)`.
//! - Marking is a single atomic step on the map entry. Of two racing marks
//!   for the same key, exactly one creates the grant and the other sees it.
//! - Only successful verifications are ever written. A failure cannot
//!   overwrite a grant because failures have no write path.
//! - Expired grants are inert: a mark over an expired grant replaces it.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::Periodicity;
use crate::identity::proof::VerificationLevel;

/// A grant for one scope and action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Nullifier hash or account the grant is keyed by.
    pub scope_key: String,
    /// Nullifier of the proof that earned the grant, lowercase.
    pub nullifier_hash: String,
    pub action: String,
    pub verification_level: VerificationLevel,
    pub verified_at: DateTime<Utc>,
    /// `None` for grants that never lapse.
    pub expires_at: Option<DateTime<Utc>>,
}

impl VerificationRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expiry| now < expiry)
    }
}

/// Result of [`VerificationLedger::mark_verified`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// This call created the grant.
    Fresh(VerificationRecord),
    /// A live grant already existed and was left untouched.
    AlreadyVerified(VerificationRecord),
}

impl MarkOutcome {
    pub fn record(&self) -> &VerificationRecord {
        match self {
            MarkOutcome::Fresh(r) | MarkOutcome::AlreadyVerified(r) => r,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, MarkOutcome::Fresh(_))
    }
}

/// Concurrent map of grants keyed by `(scope_key, action)`.
#[derive(Debug, Default)]
pub struct VerificationLedger {
    records: DashMap<(String, String), VerificationRecord>,
}

impl VerificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `scope_key` holds a live grant for `action`.
    pub fn is_verified(&self, scope_key: &str, action: &str) -> bool {
        self.record(scope_key, action).is_some()
    }

    /// The live grant for `scope_key` and `action`, if any.
    pub fn record(&self, scope_key: &str, action: &str) -> Option<VerificationRecord> {
        let now = Utc::now();
        self.records
            .get(&(scope_key.to_string(), action.to_string()))
            .map(|r| r.clone())
            .filter(|r| r.is_live(now))
    }

    /// Records a successful verification unless a live grant already
    /// exists. The check and the write happen under one entry lock.
    pub fn mark_verified(
        &self,
        scope_key: &str,
        nullifier_hash: &str,
        action: &str,
        level: VerificationLevel,
        periodicity: Periodicity,
        now: DateTime<Utc>,
    ) -> MarkOutcome {
        let fresh = VerificationRecord {
            scope_key: scope_key.to_string(),
            nullifier_hash: nullifier_hash.to_ascii_lowercase(),
            action: action.to_string(),
            verification_level: level,
            verified_at: now,
            expires_at: periodicity.expires_at(now),
        };

        match self.records.entry((scope_key.to_string(), action.to_string())) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_live(now) {
                    return MarkOutcome::AlreadyVerified(slot.get().clone());
                }
                slot.insert(fresh.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh.clone());
            }
        }

        tracing::info!(
            action,
            scope = %crate::auth::nonce::short(scope_key),
            level = %level,
            "verification recorded"
        );
        MarkOutcome::Fresh(fresh)
    }

    /// Drops lapsed grants. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.is_live(now));
        before.saturating_sub(self.records.len())
    }

    /// Stored grants, lapsed ones not yet purged included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
