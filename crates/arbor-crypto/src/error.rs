//! Error types for cipher suite operations.

use thiserror::Error;

/// Errors raised by cipher suite primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key bytes have the wrong length or are not a valid point/scalar
    #[error("invalid {kind} key: expected {expected} bytes, got {actual}")]
    InvalidKey {
        /// Which kind of key was rejected
        kind: &'static str,
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// AEAD nonce has the wrong length
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonce {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// HKDF expansion requested more output than the hash allows
    #[error("invalid output length {0} for key derivation")]
    InvalidLength(usize),

    /// AEAD authentication failed (wrong key, wrong AAD, or tampering)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Human-readable reason
        reason: String,
    },

    /// Signature did not verify under the given public key
    #[error("signature verification failed")]
    InvalidSignature,

    /// MAC did not verify under the given key
    #[error("mac verification failed")]
    InvalidMac,

    /// Cipher suite identifier is not supported by this build
    #[error("unsupported cipher suite {0:#06x}")]
    UnsupportedCipherSuite(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_details() {
        let err = CryptoError::InvalidKey { kind: "hpke public", expected: 32, actual: 3 };
        let message = err.to_string();
        assert!(message.contains("hpke public"));
        assert!(message.contains("32"));
        assert!(message.contains('3'));

        assert_eq!(
            CryptoError::UnsupportedCipherSuite(0x0001).to_string(),
            "unsupported cipher suite 0x0001"
        );
    }
}
