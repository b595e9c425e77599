//! Single-use sign-in nonces.
//!
//! Each nonce is 128 bits from the OS RNG, hex-encoded so it can never
//! contain a character that collides with EIP-4361 line or field syntax.
//!
//! ## Lifecycle
//!
//! ```text
//!   issue ──► Live ──consume──► Consumed (tombstone) ──purge──► gone
//!               │
//!               └──ttl elapses──► Expired ──consume/check──► burnt
//! ```
//!
//! Consumed entries stay in the map as tombstones until purged so that a
//! replay is reported as `nonce_replayed` rather than `nonce_unknown`.
//! Either way it fails.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{AuthFailure, GateError};

/// An issued nonce as handed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce {
    /// The token itself: 32 lowercase hex characters.
    pub value: String,
    /// When it was issued.
    pub issued_at: DateTime<Utc>,
    /// When it stops being redeemable.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct NonceEntry {
    issued: Instant,
    consumed: bool,
}

/// Concurrent store of issued nonces with atomic consume.
#[derive(Debug)]
pub struct NonceStore {
    entries: DashMap<String, NonceEntry>,
    ttl: Duration,
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new(config::NONCE_TTL)
    }
}

impl NonceStore {
    /// Creates an empty store whose nonces live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Issues a fresh nonce and records it.
    ///
    /// Fails with `Internal` only if the OS random source is unavailable or
    /// (astronomically unlikely) every attempt collided with a stored value.
    pub fn issue(&self) -> Result<Nonce, GateError> {
        for _ in 0..config::NONCE_ISSUE_ATTEMPTS {
            let value = random_token()?;
            if let Entry::Vacant(slot) = self.entries.entry(value.clone()) {
                slot.insert(NonceEntry {
                    issued: Instant::now(),
                    consumed: false,
                });

                let issued_at = Utc::now();
                let expires_at = chrono::Duration::from_std(self.ttl)
                    .ok()
                    .and_then(|ttl| issued_at.checked_add_signed(ttl))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);

                tracing::debug!(nonce = %short(&value), "nonce issued");
                return Ok(Nonce {
                    value,
                    issued_at,
                    expires_at,
                });
            }
            tracing::warn!("nonce value collision, drawing again");
        }
        Err(GateError::Internal("nonce issuance kept colliding".into()))
    }

    /// Checks that `value` is live without consuming it.
    pub fn check(&self, value: &str) -> Result<(), AuthFailure> {
        let entry = self.entries.get(value).ok_or(AuthFailure::NonceUnknown)?;
        if entry.consumed {
            Err(AuthFailure::NonceReplayed)
        } else if entry.issued.elapsed() >= self.ttl {
            Err(AuthFailure::NonceExpired)
        } else {
            Ok(())
        }
    }

    /// Atomically redeems `value`.
    ///
    /// Of any number of concurrent callers for the same nonce, exactly one
    /// gets `Ok`. An expired nonce is burnt on the way out so it cannot be
    /// redeemed later either.
    pub fn consume(&self, value: &str) -> Result<(), AuthFailure> {
        let mut entry = self
            .entries
            .get_mut(value)
            .ok_or(AuthFailure::NonceUnknown)?;

        if entry.consumed {
            return Err(AuthFailure::NonceReplayed);
        }
        entry.consumed = true;

        if entry.issued.elapsed() >= self.ttl {
            return Err(AuthFailure::NonceExpired);
        }
        Ok(())
    }

    /// Drops entries older than twice the ttl (expired nonces and
    /// tombstones alike). Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let retention = self.ttl.saturating_mul(2);
        let before = self.entries.len();
        self.entries.retain(|_, e| e.issued.elapsed() < retention);
        before.saturating_sub(self.entries.len())
    }

    /// Number of nonces that could still be redeemed.
    pub fn live_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.consumed && e.issued.elapsed() < self.ttl)
            .count()
    }

    /// Total entries, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn random_token() -> Result<String, GateError> {
    let mut bytes = [0u8; config::NONCE_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| GateError::Internal(format!("random source unavailable: {e}")))?;
    Ok(hex::encode(bytes))
}

/// First eight characters, for logs.
pub(crate) fn short(value: &str) -> &str {
    value.get(..8).unwrap_or(value)
}
