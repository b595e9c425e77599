//! # Gate Configuration & Constants
//!
//! Every tunable of the verification gate lives here: protocol constants,
//! the deployment's credentials for the identity authority, and the
//! per-action policies that decide how often a grant may be used.
//!
//! Periodicity is data, not code. A "one reading per day" action and a
//! "one premium chat per proof" action differ only in their [`ActionPolicy`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Version of the verification protocol spoken by this crate.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Nonces & Sessions
// ---------------------------------------------------------------------------

/// Random bytes per nonce. 16 bytes = 128 bits of entropy, rendered as 32
/// lowercase hex characters.
pub const NONCE_BYTES: usize = 16;

/// How long an issued nonce may be redeemed. One sign-in attempt, no more.
pub const NONCE_TTL: Duration = Duration::from_secs(300);

/// How many times issuance retries after a value collision before giving up.
pub const NONCE_ISSUE_ATTEMPTS: usize = 4;

/// Session lifetime after a successful wallet sign-in.
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval of the background task that purges expired nonces, sessions
/// and ledger records.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Sign-In With Ethereum (EIP-4361)
// ---------------------------------------------------------------------------

/// The only message version EIP-4361 defines.
pub const SIWE_VERSION: &str = "1";

/// Minimum nonce length accepted inside a sign-in message.
pub const SIWE_MIN_NONCE_LENGTH: usize = 8;

// ---------------------------------------------------------------------------
// Identity Authority
// ---------------------------------------------------------------------------

/// Default base URL of the remote identity-verification authority.
pub const DEFAULT_AUTHORITY_URL: &str = "https://developer.worldcoin.org";

/// Path prefix of the cloud-proof verification endpoint. The app id is
/// appended as the final segment.
pub const AUTHORITY_VERIFY_PATH: &str = "/api/v2/verify";

/// Per-request timeout when talking to the authority.
pub const AUTHORITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Retries for transient authority failures (timeouts, 429, 5xx).
pub const AUTHORITY_MAX_RETRIES: u32 = 2;

/// Upper bound on backoff between authority retries.
pub const AUTHORITY_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Rejection codes meaning "this nullifier already verified for the
/// action". Only these may be answered from a live local grant.
pub const ALREADY_VERIFIED_CODES: &[&str] = &["max_verifications_reached", "already_verified"];

/// Required prefix of application identifiers issued by the authority.
pub const APP_ID_PREFIX: &str = "app_";

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Actions registered when the deployment does not configure any.
pub const DEFAULT_ACTIONS: &str = "daily-reading=daily,krishna-ji-chat=once";

/// Action used by the legacy `/api/verify` endpoint when the body omits one.
pub const DEFAULT_ACTION: &str = "krishna-ji-chat";

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Server-side credentials for the identity authority.
///
/// The secret never leaves the process: `Debug` redacts it and nothing in
/// this crate serializes it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    app_id: String,
    secret: String,
}

impl Credentials {
    /// Builds credentials from possibly-absent environment values.
    ///
    /// Empty or whitespace-only values count as missing. Both values are
    /// checked so the error names everything the operator has to fix.
    pub fn from_parts(app_id: Option<&str>, secret: Option<&str>) -> Result<Self, ConfigError> {
        let app_id = app_id.map(str::trim).filter(|s| !s.is_empty());
        let secret = secret.map(str::trim).filter(|s| !s.is_empty());

        let mut missing = Vec::new();
        if app_id.is_none() {
            missing.push("WLD_APP_ID");
        }
        if secret.is_none() {
            missing.push("WLD_SECRET_KEY");
        }

        match (app_id, secret) {
            (Some(app_id), Some(secret)) => Self::new(app_id, secret),
            _ => Err(ConfigError::MissingSecrets(missing)),
        }
    }

    /// Builds credentials from present values, validating the app id shape.
    pub fn new(app_id: &str, secret: &str) -> Result<Self, ConfigError> {
        if !app_id.starts_with(APP_ID_PREFIX) || app_id.len() == APP_ID_PREFIX.len() {
            return Err(ConfigError::InvalidAppId(app_id.to_string()));
        }
        Ok(Self {
            app_id: app_id.to_string(),
            secret: secret.to_string(),
        })
    }

    /// The application identifier (`app_...`).
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The bearer credential for the authority.
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Action Policies
// ---------------------------------------------------------------------------

/// How long a verification grant stays live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Periodicity {
    /// One grant, forever.
    Once,
    /// Until the next UTC midnight.
    Daily,
    /// A fixed window from the moment of verification.
    Every(Duration),
}

impl Periodicity {
    /// Returns when a grant made at `verified_at` stops being live, or
    /// `None` if it never does.
    pub fn expires_at(&self, verified_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Periodicity::Once => None,
            Periodicity::Daily => {
                let midnight = verified_at
                    .date_naive()
                    .succ_opt()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|naive| Utc.from_utc_datetime(&naive));
                Some(midnight.unwrap_or(DateTime::<Utc>::MAX_UTC))
            }
            Periodicity::Every(window) => {
                let expiry = chrono::Duration::from_std(*window)
                    .ok()
                    .and_then(|w| verified_at.checked_add_signed(w));
                Some(expiry.unwrap_or(DateTime::<Utc>::MAX_UTC))
            }
        }
    }
}

impl FromStr for Periodicity {
    type Err = String;

    /// Accepts `once`, `daily`, or a window such as `3600s`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(Periodicity::Once),
            "daily" => Ok(Periodicity::Daily),
            other => {
                let secs = other
                    .strip_suffix('s')
                    .ok_or_else(|| format!("unknown periodicity {other:?}"))?
                    .parse::<u64>()
                    .map_err(|e| format!("bad window {other:?}: {e}"))?;
                if secs == 0 {
                    return Err("window must be at least one second".into());
                }
                Ok(Periodicity::Every(Duration::from_secs(secs)))
            }
        }
    }
}

impl fmt::Display for Periodicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Periodicity::Once => write!(f, "once"),
            Periodicity::Daily => write!(f, "daily"),
            Periodicity::Every(d) => write!(f, "{}s", d.as_secs()),
        }
    }
}

/// Which identifier partitions the ledger for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// The proof's nullifier hash (one grant per human).
    #[default]
    Nullifier,
    /// The signal, typically the signed-in wallet address (one grant per
    /// account). Falls back to the nullifier when no signal is supplied.
    Signal,
}

impl FromStr for ScopeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nullifier" => Ok(ScopeKind::Nullifier),
            "signal" => Ok(ScopeKind::Signal),
            other => Err(format!("unknown scope {other:?}")),
        }
    }
}

/// Policy for one registered action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPolicy {
    /// Action name, exactly as the client submits it.
    pub name: String,
    /// Grant lifetime.
    pub periodicity: Periodicity,
    /// Ledger partitioning key.
    pub scope: ScopeKind,
}

impl ActionPolicy {
    /// A nullifier-scoped policy.
    pub fn new(name: impl Into<String>, periodicity: Periodicity) -> Self {
        Self {
            name: name.into(),
            periodicity,
            scope: ScopeKind::Nullifier,
        }
    }

    /// Same policy, different scope.
    pub fn with_scope(mut self, scope: ScopeKind) -> Self {
        self.scope = scope;
        self
    }
}

impl FromStr for ActionPolicy {
    type Err = ConfigError;

    /// Parses `name=periodicity[:scope]`, e.g. `daily-reading=daily` or
    /// `premium-chat=3600s:signal`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidAction(s.to_string(), reason);

        let (name, rule) = s
            .split_once('=')
            .ok_or_else(|| invalid("expected name=periodicity".into()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid("empty action name".into()));
        }

        let (periodicity, scope) = match rule.split_once(':') {
            Some((p, scope)) => (p, scope.parse::<ScopeKind>().map_err(invalid)?),
            None => (rule, ScopeKind::Nullifier),
        };

        Ok(ActionPolicy {
            name: name.to_string(),
            periodicity: periodicity.parse().map_err(invalid)?,
            scope,
        })
    }
}

/// Parses a comma-separated list of action policies, rejecting duplicates.
pub fn parse_action_list(s: &str) -> Result<Vec<ActionPolicy>, ConfigError> {
    let policies = s
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::parse::<ActionPolicy>)
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    for policy in &policies {
        if !seen.insert(policy.name.as_str()) {
            return Err(ConfigError::InvalidAction(
                policy.name.clone(),
                "registered twice".into(),
            ));
        }
    }
    Ok(policies)
}

// ---------------------------------------------------------------------------
// GateConfig
// ---------------------------------------------------------------------------

/// Complete runtime configuration of the verification gate.
///
/// `credentials` holds the startup outcome rather than the credentials
/// alone: a deployment with missing secrets still runs, and every
/// verification request reports the same [`ConfigError`] until it is fixed.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Authority credentials, or why they are unusable.
    pub credentials: Result<Credentials, ConfigError>,
    /// Registered actions.
    pub actions: Vec<ActionPolicy>,
    /// Action assumed when a request omits one.
    pub default_action: String,
    /// Base URL of the identity authority.
    pub authority_url: String,
    /// Per-request authority timeout.
    pub authority_timeout: Duration,
    /// Retries for transient authority failures.
    pub authority_retries: u32,
    /// Nonce validity window.
    pub nonce_ttl: Duration,
    /// Session lifetime.
    pub session_ttl: Duration,
    /// Expected sign-in message domain, if enforced.
    pub siwe_domain: Option<String>,
}

impl GateConfig {
    /// Default configuration around the given credentials outcome.
    pub fn new(credentials: Result<Credentials, ConfigError>) -> Self {
        Self {
            credentials,
            // DEFAULT_ACTIONS is a compile-time constant known to parse.
            actions: parse_action_list(DEFAULT_ACTIONS).unwrap_or_default(),
            default_action: DEFAULT_ACTION.to_string(),
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            authority_timeout: AUTHORITY_TIMEOUT,
            authority_retries: AUTHORITY_MAX_RETRIES,
            nonce_ttl: NONCE_TTL,
            session_ttl: SESSION_TTL,
            siwe_domain: None,
        }
    }

    /// Replaces the registered actions.
    pub fn with_actions(mut self, actions: Vec<ActionPolicy>) -> Self {
        self.actions = actions;
        self
    }

    /// Points the gate at a different authority (tests, staging).
    pub fn with_authority_url(mut self, url: impl Into<String>) -> Self {
        self.authority_url = url.into();
        self
    }

    /// Returns the policy for `name`, if registered.
    pub fn action(&self, name: &str) -> Option<&ActionPolicy> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Returns the credentials or the startup error describing why not.
    pub fn credentials(&self) -> Result<&Credentials, ConfigError> {
        self.credentials.as_ref().map_err(Clone::clone)
    }

    /// Structural checks that do not involve secrets. Secrets are reported
    /// separately through [`GateConfig::credentials`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.actions.is_empty() {
            return Err(ConfigError::InvalidAction(
                String::new(),
                "no actions registered".into(),
            ));
        }
        if self.action(&self.default_action).is_none() {
            return Err(ConfigError::UnknownDefaultAction(
                self.default_action.clone(),
            ));
        }
        Ok(())
    }
}
