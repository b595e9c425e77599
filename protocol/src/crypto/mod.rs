//! # Cryptographic Primitives
//!
//! Wallet sign-in rests on one primitive: recovering the secp256k1 signer
//! of an EIP-191 `personal_sign` message and comparing it with the address
//! the client claims. Curve arithmetic and keccak come from
//! `alloy-primitives`; this module only wraps them with the error type and
//! input parsing the rest of the crate expects.

pub mod signatures;

pub use signatures::{
    parse_address, parse_signature, recover_personal_sign, verify_personal_sign, SignatureError,
};
