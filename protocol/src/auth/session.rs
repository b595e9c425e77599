//! Sessions established by a successful wallet sign-in.
//!
//! Only the authentication path can mint a session (`mint` is crate-private
//! and called from [`crate::service::VerificationService`] after
//! `verify_wallet_auth` succeeds). Anyone holding a session id may look it
//! up or end it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::wallet::AuthenticatedUser;
use crate::config;

/// An authenticated account's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Checksummed account address.
    pub address: String,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Concurrent session table keyed by session id.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<Uuid, Session>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(config::SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub(crate) fn mint(&self, user: &AuthenticatedUser) -> Session {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let session = Session {
            id: Uuid::new_v4(),
            address: user.address.clone(),
            username: user.username.clone(),
            created_at,
            expires_at,
        };
        self.sessions.insert(session.id, session.clone());
        tracing::info!(session = %session.id, address = %session.address, "session created");
        session
    }

    /// Returns the session if it exists and has not expired. Expired
    /// sessions are dropped on lookup.
    pub fn get(&self, id: &Uuid) -> Option<Session> {
        let now = Utc::now();
        let session = self.sessions.get(id).map(|s| s.clone())?;
        if session.is_expired(now) {
            self.sessions.remove_if(id, |_, s| s.is_expired(now));
            return None;
        }
        Some(session)
    }

    /// Ends a session. Returns `false` if there was nothing live to end.
    pub fn invalidate(&self, id: &Uuid) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                tracing::info!(session = %id, address = %session.address, "session ended");
                !session.is_expired(Utc::now())
            }
            None => false,
        }
    }

    /// Drops expired sessions. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(now));
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> AuthenticatedUser {
        AuthenticatedUser {
            address: "0x71C7656EC7ab88b098defB751B7401B5f6d8976F".into(),
            username: Some("seeker".into()),
        }
    }

    #[test]
    fn test_mint_and_get() {
        let store = SessionStore::default();
        let session = store.mint(&user());
        assert_eq!(session.expires_at - session.created_at, chrono::Duration::hours(24));
        assert_eq!(store.get(&session.id), Some(session));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_session() {
        let store = SessionStore::default();
        assert_eq!(store.get(&Uuid::new_v4()), None);
        assert!(!store.invalidate(&Uuid::new_v4()));
    }

    #[test]
    fn test_invalidate() {
        let store = SessionStore::default();
        let session = store.mint(&user());
        assert!(store.invalidate(&session.id));
        assert_eq!(store.get(&session.id), None);
        assert!(!store.invalidate(&session.id));
    }

    #[test]
    fn test_expired_sessions_vanish() {
        let store = SessionStore::new(Duration::ZERO);
        let a = store.mint(&user());
        store.mint(&user());
        assert_eq!(store.get(&a.id), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }
}
