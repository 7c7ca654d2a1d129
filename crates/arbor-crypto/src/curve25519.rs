//! `MLS_128_DHKEMX25519_CHACHA20POLY1305_SHA256_Ed25519`.
//!
//! - Hash / KDF: SHA-256, HKDF-SHA256, HMAC-SHA256
//! - AEAD: ChaCha20-Poly1305 (32-byte key, 12-byte nonce)
//! - KEM: DHKEM over X25519 with an HKDF key schedule
//! - Signatures: Ed25519
//!
//! HPKE sealing is single-shot base mode:
//!
//! ```text
//! (eph_sk, eph_pk) = DeriveKeyPair(ephemeral_ikm)
//! dh               = X25519(eph_sk, pk_r)
//! shared           = Extract(eph_pk || pk_r, dh)
//! key              = Expand(shared, "hpke key"   || info, Nk)
//! nonce            = Expand(shared, "hpke nonce" || info, Nn)
//! ct               = AEAD.Seal(key, nonce, aad, pt)
//! ```

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    suite::CipherSuite,
    types::{
        CipherSuiteId, HpkeCiphertext, HpkeKeyPair, HpkePrivateKey, HpkePublicKey, Secret,
        SignatureKeyPair, SignaturePrivateKey, SignaturePublicKey,
    },
};

type HmacSha256 = Hmac<Sha256>;

/// Registered identifier of this suite.
pub const CURVE25519_CHACHA_ID: CipherSuiteId = 0x0003;

const HASH_LEN: usize = 32;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const X25519_LEN: usize = 32;
const ED25519_KEY_LEN: usize = 32;

/// Labels for deterministic key derivation
const HPKE_DKP_LABEL: &[u8] = b"arbor dhkem x25519 derive key pair";
const SIGNATURE_DKP_LABEL: &[u8] = b"arbor ed25519 derive key pair";
const HPKE_KEY_LABEL: &[u8] = b"hpke key";
const HPKE_NONCE_LABEL: &[u8] = b"hpke nonce";

/// X25519 / ChaCha20-Poly1305 / SHA-256 / Ed25519 cipher suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Curve25519ChaCha;

impl Curve25519ChaCha {
    /// New suite handle. The suite is stateless.
    pub fn new() -> Self {
        Self
    }

    fn static_secret(bytes: &[u8]) -> Result<StaticSecret, CryptoError> {
        let Ok(mut raw) = <[u8; X25519_LEN]>::try_from(bytes) else {
            return Err(CryptoError::InvalidKey {
                kind: "hpke private",
                expected: X25519_LEN,
                actual: bytes.len(),
            });
        };
        let secret = StaticSecret::from(raw);
        raw.zeroize();
        Ok(secret)
    }

    fn public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
        let raw = <[u8; X25519_LEN]>::try_from(bytes).map_err(|_| CryptoError::InvalidKey {
            kind: "hpke public",
            expected: X25519_LEN,
            actual: bytes.len(),
        })?;
        Ok(PublicKey::from(raw))
    }

    fn shared_secret(
        &self,
        secret: &StaticSecret,
        their_public: &PublicKey,
        eph_public: &[u8],
        recipient_public: &[u8],
    ) -> Result<Secret, CryptoError> {
        let dh = secret.diffie_hellman(their_public);
        if !dh.was_contributory() {
            return Err(CryptoError::InvalidKey {
                kind: "hpke public (low order)",
                expected: X25519_LEN,
                actual: X25519_LEN,
            });
        }

        let mut salt = Vec::with_capacity(2 * X25519_LEN);
        salt.extend_from_slice(eph_public);
        salt.extend_from_slice(recipient_public);
        Ok(self.extract(&salt, dh.as_bytes()))
    }

    fn hpke_key_and_nonce(
        &self,
        shared: &Secret,
        info: &[u8],
    ) -> Result<(Secret, Secret), CryptoError> {
        let key = self.expand(shared.as_bytes(), &[HPKE_KEY_LABEL, info].concat(), KEY_LEN)?;
        let nonce = self.expand(shared.as_bytes(), &[HPKE_NONCE_LABEL, info].concat(), NONCE_LEN)?;
        Ok((key, nonce))
    }

    fn cipher(key: &[u8]) -> Result<ChaCha20Poly1305, CryptoError> {
        ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey {
            kind: "aead",
            expected: KEY_LEN,
            actual: key.len(),
        })
    }

    fn check_nonce(nonce: &[u8]) -> Result<(), CryptoError> {
        if nonce.len() == NONCE_LEN {
            Ok(())
        } else {
            Err(CryptoError::InvalidNonce { expected: NONCE_LEN, actual: nonce.len() })
        }
    }
}

impl CipherSuite for Curve25519ChaCha {
    fn id(&self) -> CipherSuiteId {
        CURVE25519_CHACHA_ID
    }

    fn hash_len(&self) -> usize {
        HASH_LEN
    }

    fn aead_key_len(&self) -> usize {
        KEY_LEN
    }

    fn aead_nonce_len(&self) -> usize {
        NONCE_LEN
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    fn mac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut mac = hmac_with(key)?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn verify_mac(&self, key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
        let mut mac = hmac_with(key)?;
        mac.update(data);
        mac.verify_slice(tag).map_err(|_| CryptoError::InvalidMac)
    }

    fn encrypt_aead(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Self::check_nonce(nonce)?;
        let cipher = Self::cipher(key)?;
        cipher.encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad }).map_err(|_| {
            CryptoError::DecryptionFailed { reason: "aead seal rejected input".to_string() }
        })
    }

    fn decrypt_aead(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Self::check_nonce(nonce)?;
        let cipher = Self::cipher(key)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
    }

    fn extract(&self, salt: &[u8], ikm: &[u8]) -> Secret {
        let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
        Secret::from(prk.to_vec())
    }

    fn expand(&self, prk: &[u8], info: &[u8], len: usize) -> Result<Secret, CryptoError> {
        let hkdf = Hkdf::<Sha256>::from_prk(prk).map_err(|_| CryptoError::InvalidKey {
            kind: "kdf prk",
            expected: HASH_LEN,
            actual: prk.len(),
        })?;
        let mut okm = vec![0u8; len];
        hkdf.expand(info, &mut okm).map_err(|_| CryptoError::InvalidLength(len))?;
        Ok(Secret::from(okm))
    }

    fn derive_hpke_key_pair(&self, ikm: &[u8]) -> Result<HpkeKeyPair, CryptoError> {
        let prk = self.extract(&[], ikm);
        let sk = self.expand(prk.as_bytes(), HPKE_DKP_LABEL, X25519_LEN)?;
        let secret = Self::static_secret(sk.as_bytes())?;
        let public = PublicKey::from(&secret);

        Ok(HpkeKeyPair {
            private_key: HpkePrivateKey::from(secret.to_bytes().to_vec()),
            public_key: HpkePublicKey::from(public.as_bytes().to_vec()),
        })
    }

    fn hpke_seal(
        &self,
        public_key: &HpkePublicKey,
        info: &[u8],
        aad: &[u8],
        plaintext: &[u8],
        ephemeral_ikm: &[u8],
    ) -> Result<HpkeCiphertext, CryptoError> {
        let recipient = Self::public_key(public_key.as_bytes())?;
        let ephemeral = self.derive_hpke_key_pair(ephemeral_ikm)?;
        let eph_secret = Self::static_secret(ephemeral.private_key.as_bytes())?;

        let shared = self.shared_secret(
            &eph_secret,
            &recipient,
            ephemeral.public_key.as_bytes(),
            public_key.as_bytes(),
        )?;
        let (key, nonce) = self.hpke_key_and_nonce(&shared, info)?;
        let ciphertext = self.encrypt_aead(key.as_bytes(), nonce.as_bytes(), aad, plaintext)?;

        Ok(HpkeCiphertext { kem_output: ephemeral.public_key.as_bytes().to_vec(), ciphertext })
    }

    fn hpke_open(
        &self,
        private_key: &HpkePrivateKey,
        info: &[u8],
        aad: &[u8],
        ciphertext: &HpkeCiphertext,
    ) -> Result<Vec<u8>, CryptoError> {
        let secret = Self::static_secret(private_key.as_bytes())?;
        let eph_public = Self::public_key(&ciphertext.kem_output)?;
        let own_public = PublicKey::from(&secret);

        let shared = self.shared_secret(
            &secret,
            &eph_public,
            &ciphertext.kem_output,
            own_public.as_bytes(),
        )?;
        let (key, nonce) = self.hpke_key_and_nonce(&shared, info)?;
        self.decrypt_aead(key.as_bytes(), nonce.as_bytes(), aad, &ciphertext.ciphertext)
    }

    fn derive_signature_key_pair(&self, seed: &[u8]) -> Result<SignatureKeyPair, CryptoError> {
        let prk = self.extract(&[], seed);
        let sk = self.expand(prk.as_bytes(), SIGNATURE_DKP_LABEL, ED25519_KEY_LEN)?;
        let mut raw = [0u8; ED25519_KEY_LEN];
        raw.copy_from_slice(sk.as_bytes());
        let signing_key = SigningKey::from_bytes(&raw);
        raw.zeroize();

        Ok(SignatureKeyPair {
            private_key: SignaturePrivateKey::from(signing_key.to_bytes().to_vec()),
            public_key: SignaturePublicKey::from(signing_key.verifying_key().to_bytes().to_vec()),
        })
    }

    fn sign(
        &self,
        private_key: &SignaturePrivateKey,
        message: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let Ok(mut raw) = <[u8; ED25519_KEY_LEN]>::try_from(private_key.as_bytes()) else {
            return Err(CryptoError::InvalidKey {
                kind: "signature private",
                expected: ED25519_KEY_LEN,
                actual: private_key.len(),
            });
        };
        let signing_key = SigningKey::from_bytes(&raw);
        raw.zeroize();
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(
        &self,
        public_key: &SignaturePublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        let raw = <[u8; ED25519_KEY_LEN]>::try_from(public_key.as_bytes()).map_err(|_| {
            CryptoError::InvalidKey {
                kind: "signature public",
                expected: ED25519_KEY_LEN,
                actual: public_key.as_bytes().len(),
            }
        })?;
        let verifying_key =
            VerifyingKey::from_bytes(&raw).map_err(|_| CryptoError::InvalidSignature)?;
        let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
        verifying_key.verify(message, &signature).map_err(|_| CryptoError::InvalidSignature)
    }
}

fn hmac_with(key: &[u8]) -> Result<HmacSha256, CryptoError> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CryptoError::InvalidKey {
        kind: "mac",
        expected: HASH_LEN,
        actual: key.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite() -> Curve25519ChaCha {
        Curve25519ChaCha::new()
    }

    #[test]
    fn hash_is_sha256() {
        let digest = suite().hash(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn mac_round_trip() {
        let tag = suite().mac(b"key", b"data").unwrap();
        assert_eq!(tag.len(), HASH_LEN);
        assert!(suite().verify_mac(b"key", b"data", &tag).is_ok());
        assert_eq!(suite().verify_mac(b"key", b"other", &tag), Err(CryptoError::InvalidMac));
    }

    #[test]
    fn aead_rejects_wrong_aad() {
        let key = [7u8; KEY_LEN];
        let nonce = [1u8; NONCE_LEN];
        let ct = suite().encrypt_aead(&key, &nonce, b"aad", b"hello").unwrap();
        assert_eq!(suite().decrypt_aead(&key, &nonce, b"aad", &ct).unwrap(), b"hello");
        assert!(suite().decrypt_aead(&key, &nonce, b"bad", &ct).is_err());
    }

    #[test]
    fn aead_rejects_short_nonce() {
        let result = suite().encrypt_aead(&[0u8; KEY_LEN], &[0u8; 8], b"", b"x");
        assert_eq!(result, Err(CryptoError::InvalidNonce { expected: NONCE_LEN, actual: 8 }));
    }

    #[test]
    fn hpke_key_pair_is_deterministic() {
        let a = suite().derive_hpke_key_pair(b"ikm").unwrap();
        let b = suite().derive_hpke_key_pair(b"ikm").unwrap();
        let c = suite().derive_hpke_key_pair(b"other").unwrap();
        assert_eq!(a.public_key, b.public_key);
        assert_ne!(a.public_key, c.public_key);
    }

    #[test]
    fn encrypt_with_label_round_trip() {
        let recipient = suite().derive_hpke_key_pair(b"recipient").unwrap();
        let ct = suite()
            .encrypt_with_label(&recipient.public_key, "Welcome", b"ctx", b"secret", b"eph")
            .unwrap();

        let pt = suite().decrypt_with_label(&recipient.private_key, "Welcome", b"ctx", &ct).unwrap();
        assert_eq!(pt, b"secret");

        assert!(suite().decrypt_with_label(&recipient.private_key, "Other", b"ctx", &ct).is_err());
        assert!(suite().decrypt_with_label(&recipient.private_key, "Welcome", b"x", &ct).is_err());
    }

    #[test]
    fn hpke_open_with_wrong_key_fails() {
        let recipient = suite().derive_hpke_key_pair(b"recipient").unwrap();
        let intruder = suite().derive_hpke_key_pair(b"intruder").unwrap();
        let ct = suite().hpke_seal(&recipient.public_key, b"", b"", b"secret", b"eph").unwrap();
        assert!(suite().hpke_open(&intruder.private_key, b"", b"", &ct).is_err());
    }

    #[test]
    fn sign_with_label_round_trip() {
        let keys = suite().derive_signature_key_pair(b"seed").unwrap();
        let sig = suite().sign_with_label(&keys.private_key, "LeafNodeTBS", b"content").unwrap();

        assert!(suite().verify_with_label(&keys.public_key, "LeafNodeTBS", b"content", &sig).is_ok());
        assert_eq!(
            suite().verify_with_label(&keys.public_key, "KeyPackageTBS", b"content", &sig),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn expand_with_label_binds_label_and_context() {
        let secret = Secret::from(vec![3u8; HASH_LEN]);
        let a = suite().expand_with_label(&secret, "tree", b"left", HASH_LEN).unwrap();
        let b = suite().expand_with_label(&secret, "tree", b"right", HASH_LEN).unwrap();
        let c = suite().derive_secret(&secret, "tree").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), HASH_LEN);
    }

    #[test]
    fn expand_rejects_short_prk() {
        let result = suite().expand(&[0u8; 4], b"info", 32);
        assert!(matches!(result, Err(CryptoError::InvalidKey { kind: "kdf prk", .. })));
    }
}
