//! # Wallet Signatures
//!
//! EIP-191 `personal_sign` recovery, which backs wallet sign-in.
//!
//! A wallet signs `"\x19Ethereum Signed Message:\n" + len(message) + message`
//! with its secp256k1 key. We never learn the public key up front; instead we
//! recover it from the 65-byte `(r, s, v)` signature and derive the address.
//! The signature is valid for an address iff recovery yields that address.
//!
//! ## Strictness
//!
//! Signatures must be exactly 65 bytes of hex (optionally `0x`-prefixed).
//! `v` may be `0/1` or `27/28`; anything else is rejected. Address
//! comparison is on the 20 raw bytes, so checksum casing does not matter.

use alloy_primitives::{Address, Signature};
use thiserror::Error;

/// Errors during signature operations.
///
/// Deliberately coarse. Callers collapse all of these into one
/// `bad_signature` outcome so clients get no oracle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature encoding: expected 65 hex-encoded bytes")]
    InvalidSignatureBytes,

    #[error("invalid address encoding")]
    InvalidAddress,

    #[error("public key recovery failed")]
    RecoveryFailed,

    #[error("signature verification failed")]
    VerificationFailed,
}

/// Parses a hex-encoded 65-byte `(r, s, v)` signature.
pub fn parse_signature(signature_hex: &str) -> Result<Signature, SignatureError> {
    let raw = signature_hex.trim();
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(raw).map_err(|_| SignatureError::InvalidSignatureBytes)?;
    if bytes.len() != 65 {
        return Err(SignatureError::InvalidSignatureBytes);
    }
    Signature::from_raw(&bytes).map_err(|_| SignatureError::InvalidSignatureBytes)
}

/// Parses a hex-encoded 20-byte account address. Checksum casing is not
/// enforced.
pub fn parse_address(address: &str) -> Result<Address, SignatureError> {
    address
        .trim()
        .parse::<Address>()
        .map_err(|_| SignatureError::InvalidAddress)
}

/// Recovers the address that produced `signature` over `message` under
/// EIP-191 personal-sign hashing.
pub fn recover_personal_sign(
    message: &[u8],
    signature: &Signature,
) -> Result<Address, SignatureError> {
    signature
        .recover_address_from_msg(message)
        .map_err(|_| SignatureError::RecoveryFailed)
}

/// Verifies that `signature_hex` is `expected`'s personal-sign signature of
/// `message`.
///
/// This is the "I got these strings off the wire" variant: it parses the
/// signature, recovers the signer and compares addresses.
pub fn verify_personal_sign(
    expected: &Address,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), SignatureError> {
    let signature = parse_signature(signature_hex)?;
    let recovered = recover_personal_sign(message, &signature)?;
    if &recovered == expected {
        Ok(())
    } else {
        Err(SignatureError::VerificationFailed)
    }
}
