//! Identity proofs as produced by the client SDK.
//!
//! The proof itself is opaque to this service. Only its shape is checked
//! locally; validity is the authority's call.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Assurance tier of the credential behind a proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    /// Biometrically verified at an Orb. Highest assurance.
    Orb,
    /// Verified government-issued document.
    Document,
    /// Verified document with additional chip or presence checks.
    SecureDocument,
    /// A semi-unique device.
    Device,
}

impl VerificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationLevel::Orb => "orb",
            VerificationLevel::Document => "document",
            VerificationLevel::SecureDocument => "secure_document",
            VerificationLevel::Device => "device",
        }
    }
}

impl fmt::Display for VerificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orb" => Ok(VerificationLevel::Orb),
            "document" => Ok(VerificationLevel::Document),
            "secure_document" => Ok(VerificationLevel::SecureDocument),
            "device" => Ok(VerificationLevel::Device),
            other => Err(format!("unknown verification level {other:?}")),
        }
    }
}

/// A zero-knowledge identity proof bound to an action and signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProof {
    pub merkle_root: String,
    pub nullifier_hash: String,
    /// ABI-encoded proof, hex.
    pub proof: String,
    pub verification_level: VerificationLevel,
}

impl IdentityProof {
    /// Rejects payloads that cannot possibly be a proof: every field must
    /// be `0x`-prefixed hex, and the root and nullifier must fit a field
    /// element.
    pub fn check_format(&self) -> Result<(), GateError> {
        check_hex("merkle_root", &self.merkle_root, Some(64))?;
        check_hex("nullifier_hash", &self.nullifier_hash, Some(64))?;
        check_hex("proof", &self.proof, None)?;
        Ok(())
    }

    /// The nullifier hash in the form used as a ledger key.
    pub fn nullifier_key(&self) -> String {
        self.nullifier_hash.to_ascii_lowercase()
    }
}

fn check_hex(attribute: &str, value: &str, max_digits: Option<usize>) -> Result<(), GateError> {
    let digits = value.strip_prefix("0x").unwrap_or_default();
    let well_formed = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_hexdigit())
        && max_digits.map_or(true, |max| digits.len() <= max);

    if well_formed {
        Ok(())
    } else {
        Err(GateError::ProofRejected {
            code: "malformed_proof".into(),
            detail: format!("`{attribute}` must be 0x-prefixed hex."),
            attribute: Some(attribute.to_string()),
        })
    }
}

/// Hashes a signal the way the authority expects: keccak-256, shifted right
/// by 8 bits so the result fits the proof system's scalar field, rendered as
/// `0x` and 64 hex digits.
///
/// A `0x`-prefixed, even-length hex signal is hashed as the bytes it
/// encodes; anything else as its UTF-8 text. A missing signal hashes as the
/// empty string.
pub fn hash_signal(signal: Option<&str>) -> String {
    let signal = signal.unwrap_or_default();
    let bytes = signal
        .strip_prefix("0x")
        .and_then(|h| hex::decode(h).ok())
        .unwrap_or_else(|| signal.as_bytes().to_vec());

    let digest = keccak256(&bytes);
    let mut shifted = [0u8; 32];
    shifted[1..].copy_from_slice(&digest[..31]);
    format!("0x{}", hex::encode(shifted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof() -> IdentityProof {
        IdentityProof {
            merkle_root: "0x1f38b57f3bdf96f05ea62fa68814871bf0ca8ce4dbe073d8497d5a6b0a53e5e0".into(),
            nullifier_hash: "0x0339861e70a9bdb6b01a88c7534a3332db915d3d06511b79a5724221a6958fbe".into(),
            proof: "0x063942fd7ea1616f17787d2e3374c1826ebcd2d41d2394d915098c7f6cb74cba".into(),
            verification_level: VerificationLevel::Orb,
        }
    }

    #[test]
    fn test_empty_signal_hash() {
        assert_eq!(
            hash_signal(None),
            "0x00c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a4"
        );
        assert_eq!(hash_signal(Some("")), hash_signal(None));
    }

    #[test]
    fn test_signal_hash_shape() {
        let h = hash_signal(Some("0x71C7656EC7ab88b098defB751B7401B5f6d8976F"));
        assert_eq!(h.len(), 66);
        assert!(h.starts_with("0x00"));
        assert_ne!(h, hash_signal(Some("71C7656EC7ab88b098defB751B7401B5f6d8976F")));
    }

    #[test]
    fn test_hex_signal_hashes_decoded_bytes() {
        let digest = keccak256([0xde, 0xad, 0xbe, 0xef]);
        let expected = format!("0x00{}", hex::encode(&digest[..31]));
        assert_eq!(hash_signal(Some("0xdeadbeef")), expected);
    }

    #[test]
    fn test_format_check() {
        assert!(proof().check_format().is_ok());

        let mut bad = proof();
        bad.nullifier_hash = "0339861e70a9".into();
        let err = bad.check_format().unwrap_err();
        assert_eq!(err.code(), "malformed_proof");
        assert!(matches!(
            err,
            GateError::ProofRejected { attribute: Some(ref a), .. } if a == "nullifier_hash"
        ));

        let mut bad = proof();
        bad.proof = "0xnothex".into();
        assert!(bad.check_format().is_err());

        let mut bad = proof();
        bad.merkle_root = format!("0x{}", "a".repeat(65));
        assert!(bad.check_format().is_err());
    }

    #[test]
    fn test_level_serde_names() {
        let json = serde_json::to_string(&VerificationLevel::SecureDocument).unwrap();
        assert_eq!(json, "\"secure_document\"");
        assert_eq!("device".parse::<VerificationLevel>(), Ok(VerificationLevel::Device));
        assert!("iris".parse::<VerificationLevel>().is_err());
    }

    #[test]
    fn test_proof_deserializes_sdk_payload() {
        let json = serde_json::json!({
            "status": "success",
            "proof": "0x01",
            "merkle_root": "0x02",
            "nullifier_hash": "0xABC",
            "verification_level": "device",
            "version": 1
        });
        let p: IdentityProof = serde_json::from_value(json).unwrap();
        assert_eq!(p.verification_level, VerificationLevel::Device);
        assert_eq!(p.nullifier_key(), "0xabc");
    }
}
