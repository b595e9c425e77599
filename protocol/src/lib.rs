// Copyright (c) 2026 Mystic Path. MIT License.
// See LICENSE for details.

//! # Mystic Protocol: Verification Core
//!
//! Everything that decides whether a Mystic Path visitor is trusted lives
//! here. The web front end can draw cards and chat all it likes; the only
//! thing it cannot do is convince this crate that a wallet signed in or that
//! a unique human stands behind a request, unless it actually did.
//!
//! ## Architecture
//!
//! The crate is split along the same lines as the trust decision:
//!
//! - **config**: Constants, credentials and per-action policies.
//! - **error**: The failure taxonomy shared by every component.
//! - **crypto**: secp256k1 personal-sign recovery (EIP-191).
//! - **auth**: Nonce issuance, sign-in-with-wallet messages, wallet-signature
//!   verification and the session store.
//! - **identity**: Zero-knowledge identity proofs, the remote verification
//!   authority and the proof verifier.
//! - **ledger**: At-most-once verification grants per (scope, action).
//! - **service**: The facade the HTTP layer drives.
//!
//! ## Flow
//!
//! ```text
//!   client ── GET nonce ──────────────► NonceStore::issue
//!   client ── signed message + nonce ─► verify_wallet_auth ─► SessionStore
//!   client ── proof + action ─────────► ProofVerifier ─► authority ─► ledger
//! ```
//!
//! Shared mutable state is limited to three concurrent maps (nonces,
//! sessions, ledger), each updated with a single atomic check-and-set. No
//! lock is ever held across a call to the remote authority.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod service;

pub use error::{AuthFailure, ConfigError, GateError};
pub use service::VerificationService;
