//! # EIP-4361 Sign-In Messages
//!
//! The message a wallet signs to prove control of an account:
//!
//! ```text
//! mysticpath.app wants you to sign in with your Ethereum account:
//! 0x71C7656EC7ab88b098defB751B7401B5f6d8976F
//!
//! Unlock your daily reading.
//!
//! URI: https://mysticpath.app
//! Version: 1
//! Chain ID: 480
//! Nonce: 9f86d081884c7d659a2feaa0c55ad015
//! Issued At: 2026-03-14T12:00:00Z
//! Expiration Time: 2026-03-14T12:05:00Z
//! ```
//!
//! Parsing is strict: a message is accepted only if re-rendering the parsed
//! fields reproduces the input byte for byte. Signature recovery always runs
//! over the rendered form, so what was verified is exactly what was parsed.
//! Timestamps are kept as the strings the wallet produced for the same reason.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;
use crate::crypto::signatures::{parse_address, SignatureError};
use crate::error::AuthFailure;

const HEADER_SUFFIX: &str = " wants you to sign in with your Ethereum account:";
const TAG_URI: &str = "URI: ";
const TAG_VERSION: &str = "Version: ";
const TAG_CHAIN_ID: &str = "Chain ID: ";
const TAG_NONCE: &str = "Nonce: ";
const TAG_ISSUED_AT: &str = "Issued At: ";
const TAG_EXPIRATION_TIME: &str = "Expiration Time: ";
const TAG_NOT_BEFORE: &str = "Not Before: ";
const TAG_REQUEST_ID: &str = "Request ID: ";
const TAG_RESOURCES: &str = "Resources:";

/// Why a text message is not a canonical EIP-4361 message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SiweParseError {
    #[error("missing or malformed header line")]
    Header,

    #[error("invalid account address line")]
    Address,

    #[error("expected a blank line after the address")]
    Layout,

    #[error("missing field {0:?}")]
    MissingField(&'static str),

    #[error("invalid chain id {0:?}")]
    ChainId(String),

    #[error("unexpected trailing line {0:?}")]
    Trailing(String),

    #[error("message is not in canonical form")]
    NotCanonical,
}

/// A structured EIP-4361 message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiweMessage {
    /// RFC 3986 authority requesting the sign-in.
    pub domain: String,
    /// Account address as the wallet rendered it (usually checksummed).
    pub address: String,
    /// Human-readable assertion, single line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    /// Resource that is the subject of the signing.
    pub uri: String,
    /// Always `1`.
    pub version: String,
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Server-issued nonce.
    pub nonce: String,
    /// RFC 3339 issuance time.
    pub issued_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
}

impl SiweMessage {
    /// The signed bytes: the canonical rendering of this message.
    pub fn signing_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parses the account address field.
    pub fn account(&self) -> Result<Address, SignatureError> {
        parse_address(&self.address)
    }

    /// Checks everything about the message that does not involve the nonce
    /// store or the signature: version, nonce shape, address, timestamps and
    /// (when configured) domain.
    pub fn validate(
        &self,
        now: DateTime<Utc>,
        expected_domain: Option<&str>,
    ) -> Result<(), AuthFailure> {
        if self.version != config::SIWE_VERSION
            || self.domain.is_empty()
            || self.uri.is_empty()
            || !is_valid_nonce(&self.nonce)
            || self.account().is_err()
        {
            return Err(AuthFailure::MalformedMessage);
        }

        parse_timestamp(&self.issued_at)?;

        if let Some(expiration) = &self.expiration_time {
            if now >= parse_timestamp(expiration)? {
                return Err(AuthFailure::MessageExpired);
            }
        }
        if let Some(not_before) = &self.not_before {
            if now < parse_timestamp(not_before)? {
                return Err(AuthFailure::MessageNotYetValid);
            }
        }

        match expected_domain {
            Some(domain) if !self.domain.eq_ignore_ascii_case(domain) => {
                Err(AuthFailure::DomainMismatch)
            }
            _ => Ok(()),
        }
    }
}

fn is_valid_nonce(nonce: &str) -> bool {
    nonce.len() >= config::SIWE_MIN_NONCE_LENGTH && nonce.chars().all(|c| c.is_ascii_alphanumeric())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, AuthFailure> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| AuthFailure::MalformedMessage)
}

impl fmt::Display for SiweMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{HEADER_SUFFIX}", self.domain)?;
        writeln!(f, "{}", self.address)?;
        writeln!(f)?;
        if let Some(statement) = &self.statement {
            writeln!(f, "{statement}")?;
        }
        writeln!(f)?;
        write!(f, "{TAG_URI}{}", self.uri)?;
        write!(f, "\n{TAG_VERSION}{}", self.version)?;
        write!(f, "\n{TAG_CHAIN_ID}{}", self.chain_id)?;
        write!(f, "\n{TAG_NONCE}{}", self.nonce)?;
        write!(f, "\n{TAG_ISSUED_AT}{}", self.issued_at)?;
        if let Some(v) = &self.expiration_time {
            write!(f, "\n{TAG_EXPIRATION_TIME}{v}")?;
        }
        if let Some(v) = &self.not_before {
            write!(f, "\n{TAG_NOT_BEFORE}{v}")?;
        }
        if let Some(v) = &self.request_id {
            write!(f, "\n{TAG_REQUEST_ID}{v}")?;
        }
        if !self.resources.is_empty() {
            write!(f, "\n{TAG_RESOURCES}")?;
            for resource in &self.resources {
                write!(f, "\n- {resource}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for SiweMessage {
    type Err = SiweParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s.split('\n').peekable();

        let domain = lines
            .next()
            .and_then(|l| l.strip_suffix(HEADER_SUFFIX))
            .filter(|d| !d.is_empty())
            .ok_or(SiweParseError::Header)?;

        let address = lines
            .next()
            .filter(|a| parse_address(a).is_ok() && a.starts_with("0x"))
            .ok_or(SiweParseError::Address)?;

        if lines.next() != Some("") {
            return Err(SiweParseError::Layout);
        }

        let statement = match lines.next() {
            Some("") => None,
            Some(statement) => {
                if lines.next() != Some("") {
                    return Err(SiweParseError::Layout);
                }
                Some(statement.to_string())
            }
            None => return Err(SiweParseError::MissingField(TAG_URI)),
        };

        let mut required = |tag: &'static str| {
            lines
                .next()
                .and_then(|l| l.strip_prefix(tag))
                .map(str::to_string)
                .ok_or(SiweParseError::MissingField(tag))
        };
        let uri = required(TAG_URI)?;
        let version = required(TAG_VERSION)?;
        let chain_id = required(TAG_CHAIN_ID)?;
        let nonce = required(TAG_NONCE)?;
        let issued_at = required(TAG_ISSUED_AT)?;

        let chain_id = chain_id
            .parse::<u64>()
            .map_err(|_| SiweParseError::ChainId(chain_id.clone()))?;

        let mut optional = |tag: &str| {
            let value = lines.peek().and_then(|l| l.strip_prefix(tag)).map(str::to_string);
            if value.is_some() {
                lines.next();
            }
            value
        };
        let expiration_time = optional(TAG_EXPIRATION_TIME);
        let not_before = optional(TAG_NOT_BEFORE);
        let request_id = optional(TAG_REQUEST_ID);

        let mut resources = Vec::new();
        if lines.peek() == Some(&TAG_RESOURCES) {
            lines.next();
            while let Some(resource) = lines.peek().and_then(|l| l.strip_prefix("- ")) {
                resources.push(resource.to_string());
                lines.next();
            }
        }

        if let Some(extra) = lines.next() {
            return Err(SiweParseError::Trailing(extra.to_string()));
        }

        let message = SiweMessage {
            domain: domain.to_string(),
            address: address.to_string(),
            statement,
            uri,
            version,
            chain_id,
            nonce,
            issued_at,
            expiration_time,
            not_before,
            request_id,
            resources,
        };

        if message.to_string() != s {
            return Err(SiweParseError::NotCanonical);
        }
        Ok(message)
    }
}
