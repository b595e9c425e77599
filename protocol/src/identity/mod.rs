//! # Identity Proofs
//!
//! Proof-of-personhood checks for gated actions. A client obtains a
//! zero-knowledge proof from its identity wallet for a named action (and
//! usually a signal binding it to the signed-in account), and the gate asks
//! the remote authority whether that proof holds.
//!
//! 1. **Proof**: the payload shape, verification levels, signal hashing.
//! 2. **Authority**: the remote collaborator and its HTTP client.
//! 3. **Verifier**: remote answer plus local ledger, folded into a
//!    [`ProofResult`].
//!
//! No proof mathematics happens here. The authority holds the nullifier
//! registry and is the only party that can say a proof is valid.

pub mod authority;
pub mod proof;
pub mod verifier;

pub use authority::{
    AuthorityAcceptance, AuthorityClient, AuthorityRejection, AuthorityVerdict,
    DeveloperPortalClient, TransportError,
};
pub use proof::{hash_signal, IdentityProof, VerificationLevel};
pub use verifier::{ProofGrant, ProofResult, ProofVerifier};
