//! Arbor Cipher Suite Capability
//!
//! The group core consumes cryptography only through the [`CipherSuite`]
//! trait defined here. Everything is a pure function of its inputs: key
//! generation and HPKE encapsulation take caller-provided input keying
//! material, so a seeded environment reproduces every byte.
//!
//! # Derivation Conventions
//!
//! ```text
//! ExpandWithLabel(secret, label, ctx, L) = KDF.Expand(secret, KDFLabel, L)
//! DeriveSecret(secret, label)            = ExpandWithLabel(secret, label, "", Nh)
//! SignWithLabel(sk, label, content)      = Sign(sk, SignContent)
//! EncryptWithLabel(pk, label, ctx, pt)   = HPKE.Seal(pk, EncryptContext, "", pt)
//! RefHash(label, value)                  = Hash(RefHashInput)
//! ```
//!
//! # Security
//!
//! - Private keys and secrets zeroize on drop and redact in `Debug`
//! - MAC verification is constant-time
//! - X25519 shared secrets from low-order points are rejected

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod curve25519;
pub mod error;
pub mod suite;
pub mod types;

pub use curve25519::{CURVE25519_CHACHA_ID, Curve25519ChaCha};
pub use error::CryptoError;
pub use suite::{CipherSuite, LABEL_PREFIX};
pub use types::{
    CipherSuiteId, HpkeCiphertext, HpkeKeyPair, HpkePrivateKey, HpkePublicKey, Secret,
    SignatureKeyPair, SignaturePrivateKey, SignaturePublicKey,
};

/// Resolve a suite identifier to an implementation.
///
/// # Errors
///
/// - `UnsupportedCipherSuite`: the identifier is not built into this crate
pub fn suite_for(id: CipherSuiteId) -> Result<Box<dyn CipherSuite>, CryptoError> {
    match id {
        CURVE25519_CHACHA_ID => Ok(Box::new(Curve25519ChaCha::new())),
        other => Err(CryptoError::UnsupportedCipherSuite(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_for_known_id() {
        let suite = suite_for(CURVE25519_CHACHA_ID).unwrap();
        assert_eq!(suite.id(), CURVE25519_CHACHA_ID);
        assert_eq!(suite.hash_len(), 32);
    }

    #[test]
    fn suite_for_unknown_id() {
        assert_eq!(suite_for(0x00ff).unwrap_err(), CryptoError::UnsupportedCipherSuite(0x00ff));
    }
}
