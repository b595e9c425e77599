//! # Wallet Authentication
//!
//! The two-step "sign in with wallet" protocol:
//!
//! ```text
//!   ┌────────┐                                 ┌────────┐
//!   │ Client │                                 │  Gate  │
//!   └───┬────┘                                 └───┬────┘
//!       │  1. GET nonce                            │
//!       ├─────────────────────────────────────────►│ NonceStore::issue
//!       │◄─────────────────────────────────────────┤
//!       │                                          │
//!       │  2. EIP-4361 message + signature + nonce │
//!       ├─────────────────────────────────────────►│ verify_wallet_auth
//!       │                                          │ NonceStore::consume
//!       │  3. session                              │ SessionStore::mint
//!       │◄─────────────────────────────────────────┤
//! ```
//!
//! Nonces are only ever issued by the server. A client-generated nonce is
//! indistinguishable from a replayed one and is rejected as `nonce_unknown`.

pub mod nonce;
pub mod session;
pub mod siwe;
pub mod wallet;

pub use nonce::{Nonce, NonceStore};
pub use session::{Session, SessionStore};
pub use siwe::{SiweMessage, SiweParseError};
pub use wallet::{verify_wallet_auth, AuthResult, AuthenticatedUser, SignedMessage, WalletAuthPayload};
