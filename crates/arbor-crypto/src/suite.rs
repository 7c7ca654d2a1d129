//! The cipher suite capability.
//!
//! [`CipherSuite`] is the only way the group core touches cryptography. The
//! required methods are the raw primitives of one suite; the provided methods
//! layer the MLS labeling conventions on top so every suite derives labels
//! identically.
//!
//! Labeled structures are encoded with explicit big-endian length prefixes:
//!
//! ```text
//! KDFLabel     = u16 length || u32 len || "MLS 1.0 " label || u32 len || context
//! SignContent  = u32 len || "MLS 1.0 " label || u32 len || content
//! EncryptCtx   = u32 len || "MLS 1.0 " label || u32 len || context
//! RefHashInput = u32 len || label || u32 len || value
//! ```

use std::fmt;

use crate::{
    error::CryptoError,
    types::{
        CipherSuiteId, HpkeCiphertext, HpkeKeyPair, HpkePrivateKey, HpkePublicKey, Secret,
        SignatureKeyPair, SignaturePrivateKey, SignaturePublicKey,
    },
};

/// Prefix applied to every protocol label.
pub const LABEL_PREFIX: &str = "MLS 1.0 ";

/// Abstract cipher suite.
///
/// Implementations are pure: any randomness (ephemeral HPKE keys, new key
/// pairs) enters through explicit input keying material supplied by the
/// caller, which keeps every operation reproducible under a seeded
/// environment.
pub trait CipherSuite: fmt::Debug + Send + Sync {
    /// Registered suite identifier.
    fn id(&self) -> CipherSuiteId;

    /// Output length of [`hash`](Self::hash) and of KDF secrets (`Nh`).
    fn hash_len(&self) -> usize;

    /// AEAD key length (`Nk`).
    fn aead_key_len(&self) -> usize;

    /// AEAD nonce length (`Nn`).
    fn aead_nonce_len(&self) -> usize;

    /// Hash `data`.
    fn hash(&self, data: &[u8]) -> Vec<u8>;

    /// MAC `data` under `key`.
    fn mac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Constant-time MAC verification.
    fn verify_mac(&self, key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), CryptoError>;

    /// AEAD seal.
    fn encrypt_aead(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// AEAD open.
    fn decrypt_aead(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// KDF extract.
    fn extract(&self, salt: &[u8], ikm: &[u8]) -> Secret;

    /// KDF expand from a pseudorandom key.
    fn expand(&self, prk: &[u8], info: &[u8], len: usize) -> Result<Secret, CryptoError>;

    /// Deterministically derive an HPKE key pair from `ikm`.
    fn derive_hpke_key_pair(&self, ikm: &[u8]) -> Result<HpkeKeyPair, CryptoError>;

    /// HPKE single-shot seal to `public_key`. The ephemeral key is derived from
    /// `ephemeral_ikm`.
    fn hpke_seal(
        &self,
        public_key: &HpkePublicKey,
        info: &[u8],
        aad: &[u8],
        plaintext: &[u8],
        ephemeral_ikm: &[u8],
    ) -> Result<HpkeCiphertext, CryptoError>;

    /// HPKE single-shot open.
    fn hpke_open(
        &self,
        private_key: &HpkePrivateKey,
        info: &[u8],
        aad: &[u8],
        ciphertext: &HpkeCiphertext,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Deterministically derive a signature key pair from `seed`.
    fn derive_signature_key_pair(&self, seed: &[u8]) -> Result<SignatureKeyPair, CryptoError>;

    /// Sign `message`.
    fn sign(&self, private_key: &SignaturePrivateKey, message: &[u8])
    -> Result<Vec<u8>, CryptoError>;

    /// Verify `signature` over `message`.
    fn verify(
        &self,
        public_key: &SignaturePublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError>;

    /// `ExpandWithLabel(secret, label, context, len)`.
    fn expand_with_label(
        &self,
        secret: &Secret,
        label: &str,
        context: &[u8],
        len: usize,
    ) -> Result<Secret, CryptoError> {
        let length = u16::try_from(len).map_err(|_| CryptoError::InvalidLength(len))?;
        let mut info = Vec::with_capacity(2 + 8 + LABEL_PREFIX.len() + label.len() + context.len());
        info.extend_from_slice(&length.to_be_bytes());
        write_prefixed_label(&mut info, label);
        write_opaque(&mut info, context);
        self.expand(secret.as_bytes(), &info, len)
    }

    /// `DeriveSecret(secret, label)`: labeled expansion to `Nh` bytes with an
    /// empty context.
    fn derive_secret(&self, secret: &Secret, label: &str) -> Result<Secret, CryptoError> {
        self.expand_with_label(secret, label, &[], self.hash_len())
    }

    /// `SignWithLabel(key, label, content)`.
    fn sign_with_label(
        &self,
        private_key: &SignaturePrivateKey,
        label: &str,
        content: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.sign(private_key, &labeled_content(label, content))
    }

    /// `VerifyWithLabel(key, label, content, signature)`.
    fn verify_with_label(
        &self,
        public_key: &SignaturePublicKey,
        label: &str,
        content: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        self.verify(public_key, &labeled_content(label, content), signature)
    }

    /// `EncryptWithLabel(public_key, label, context, plaintext)`.
    fn encrypt_with_label(
        &self,
        public_key: &HpkePublicKey,
        label: &str,
        context: &[u8],
        plaintext: &[u8],
        ephemeral_ikm: &[u8],
    ) -> Result<HpkeCiphertext, CryptoError> {
        self.hpke_seal(public_key, &labeled_content(label, context), &[], plaintext, ephemeral_ikm)
    }

    /// `DecryptWithLabel(private_key, label, context, ciphertext)`.
    fn decrypt_with_label(
        &self,
        private_key: &HpkePrivateKey,
        label: &str,
        context: &[u8],
        ciphertext: &HpkeCiphertext,
    ) -> Result<Vec<u8>, CryptoError> {
        self.hpke_open(private_key, &labeled_content(label, context), &[], ciphertext)
    }

    /// `RefHash(label, value)`, used for key package and proposal references.
    fn ref_hash(&self, label: &str, value: &[u8]) -> Vec<u8> {
        let mut input = Vec::with_capacity(8 + label.len() + value.len());
        write_opaque(&mut input, label.as_bytes());
        write_opaque(&mut input, value);
        self.hash(&input)
    }
}

fn labeled_content(label: &str, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + LABEL_PREFIX.len() + label.len() + content.len());
    write_prefixed_label(&mut out, label);
    write_opaque(&mut out, content);
    out
}

fn write_prefixed_label(out: &mut Vec<u8>, label: &str) {
    let len = (LABEL_PREFIX.len() + label.len()) as u32;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(LABEL_PREFIX.as_bytes());
    out.extend_from_slice(label.as_bytes());
}

fn write_opaque(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labeled_content_is_length_prefixed() {
        let encoded = labeled_content("tree", b"ctx");
        let label_len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(label_len as usize, "MLS 1.0 tree".len());
        assert_eq!(&encoded[4..16], b"MLS 1.0 tree");
        assert_eq!(&encoded[16..20], &3u32.to_be_bytes());
        assert_eq!(&encoded[20..], b"ctx");
    }

    #[test]
    fn distinct_labels_encode_differently() {
        assert_ne!(labeled_content("left", b""), labeled_content("right", b""));
        assert_ne!(labeled_content("ab", b"c"), labeled_content("a", b"bc"));
    }
}
