//! Member identities and key packages.

use std::fmt;

use arbor_crypto::{
    CipherSuite, CipherSuiteId, HpkePrivateKey, HpkePublicKey, SignatureKeyPair,
    SignaturePrivateKey,
};
use serde::{Deserialize, Serialize};

use crate::{
    codec,
    constants::PROTOCOL_VERSION,
    env::Environment,
    error::{CodecError, CommitValidationError, GroupError},
    extension::Extension,
    tree::{Capabilities, Credential, LeafNode, LeafNodeParams, LeafNodeSource, Lifetime},
};

const KEY_PACKAGE_LABEL: &str = "KeyPackageTBS";
const KEY_PACKAGE_REF_LABEL: &str = "MLS 1.0 KeyPackage Reference";

/// Long-term identity of a member: credential plus signature keys.
#[derive(Debug, Clone)]
pub struct MemberIdentity {
    /// Credential presented to the authentication service
    pub credential: Credential,
    /// Signature key pair
    pub signature_keys: SignatureKeyPair,
    /// Advertised capabilities
    pub capabilities: Capabilities,
    /// Leaf extensions
    pub extensions: Vec<Extension>,
}

impl MemberIdentity {
    /// Identity with freshly generated signature keys and default
    /// capabilities for `suite`.
    pub fn generate(
        suite: &dyn CipherSuite,
        env: &dyn Environment,
        credential: Credential,
    ) -> Result<Self, GroupError> {
        let seed = zeroize::Zeroizing::new(env.random_vec(suite.hash_len()));
        Ok(Self {
            credential,
            signature_keys: suite.derive_signature_key_pair(&seed)?,
            capabilities: Capabilities::for_suite(suite.id()),
            extensions: Vec::new(),
        })
    }

    /// Unsigned leaf content for this identity.
    pub(crate) fn leaf_params(
        &self,
        encryption_key: HpkePublicKey,
        source: LeafNodeSource,
    ) -> LeafNodeParams {
        LeafNodeParams {
            encryption_key,
            signature_key: self.signature_keys.public_key.clone(),
            credential: self.credential.clone(),
            capabilities: self.capabilities.clone(),
            source,
            extensions: self.extensions.clone(),
        }
    }
}

/// Pre-published material letting others add a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPackage {
    /// Protocol version
    pub version: u16,
    /// Cipher suite
    pub cipher_suite: CipherSuiteId,
    /// HPKE key welcome secrets are sealed to
    pub init_key: HpkePublicKey,
    /// Leaf the member will occupy
    pub leaf_node: LeafNode,
    /// Key package extensions
    pub extensions: Vec<Extension>,
    /// Signature by the leaf's signature key
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct KeyPackageTbs<'a> {
    version: u16,
    cipher_suite: CipherSuiteId,
    init_key: &'a HpkePublicKey,
    leaf_node: &'a LeafNode,
    extensions: &'a [Extension],
}

/// Hash reference identifying a key package.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPackageRef(Vec<u8>);

impl KeyPackageRef {
    /// Raw reference bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KeyPackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(8)];
        write!(f, "KeyPackageRef({}..)", hex::encode(shown))
    }
}

/// A key package with the private keys needed to join through it.
#[derive(Debug, Clone)]
pub struct KeyPackageBundle {
    /// Published part
    pub key_package: KeyPackage,
    /// Private key for `init_key`
    pub init_private_key: HpkePrivateKey,
    /// Private key for the leaf encryption key
    pub encryption_private_key: HpkePrivateKey,
    /// Private key for the leaf signature key
    pub signature_private_key: SignaturePrivateKey,
}

impl KeyPackage {
    /// Generate a signed key package for `identity`, valid for `lifetime`.
    pub fn generate(
        suite: &dyn CipherSuite,
        env: &dyn Environment,
        identity: &MemberIdentity,
        lifetime: Lifetime,
    ) -> Result<KeyPackageBundle, GroupError> {
        let init = suite.derive_hpke_key_pair(&env.random_vec(suite.hash_len()))?;
        let encryption = suite.derive_hpke_key_pair(&env.random_vec(suite.hash_len()))?;

        let signer = &identity.signature_keys.private_key;
        let leaf_node = LeafNode::sign(
            suite,
            identity.leaf_params(encryption.public_key, LeafNodeSource::KeyPackage { lifetime }),
            signer,
            None,
        )?;

        let mut key_package = Self {
            version: PROTOCOL_VERSION,
            cipher_suite: suite.id(),
            init_key: init.public_key,
            leaf_node,
            extensions: Vec::new(),
            signature: Vec::new(),
        };
        key_package.signature =
            suite.sign_with_label(signer, KEY_PACKAGE_LABEL, &key_package.to_be_signed()?)?;

        Ok(KeyPackageBundle {
            key_package,
            init_private_key: init.private_key,
            encryption_private_key: encryption.private_key,
            signature_private_key: signer.clone(),
        })
    }

    /// Verify the package signature under its leaf's signature key.
    pub fn verify_signature(&self, suite: &dyn CipherSuite) -> Result<(), CommitValidationError> {
        let tbs = self.to_be_signed()?;
        suite
            .verify_with_label(&self.leaf_node.signature_key, KEY_PACKAGE_LABEL, &tbs, &self.signature)
            .map_err(|_| CommitValidationError::InvalidKeyPackageSignature)
    }

    /// Hash reference of this package.
    pub fn reference(&self, suite: &dyn CipherSuite) -> Result<KeyPackageRef, CodecError> {
        Ok(KeyPackageRef(suite.ref_hash(KEY_PACKAGE_REF_LABEL, &codec::encode(self)?)))
    }

    fn to_be_signed(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(&KeyPackageTbs {
            version: self.version,
            cipher_suite: self.cipher_suite,
            init_key: &self.init_key,
            leaf_node: &self.leaf_node,
            extensions: &self.extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use arbor_crypto::Curve25519ChaCha;

    use super::*;
    use crate::env::test_utils::MockEnv;

    fn bundle(env: &MockEnv) -> KeyPackageBundle {
        let suite = Curve25519ChaCha::new();
        let identity = MemberIdentity::generate(&suite, env, Credential::basic("bob")).unwrap();
        KeyPackage::generate(&suite, env, &identity, Lifetime::starting_at(0, 100)).unwrap()
    }

    #[test]
    fn generated_package_verifies() {
        let suite = Curve25519ChaCha::new();
        let bundle = bundle(&MockEnv::seeded(1));
        bundle.key_package.verify_signature(&suite).unwrap();
        bundle.key_package.leaf_node.verify_signature(&suite, None).unwrap();
        assert_ne!(bundle.key_package.init_key, bundle.key_package.leaf_node.encryption_key);
    }

    #[test]
    fn tampering_breaks_signature() {
        let suite = Curve25519ChaCha::new();
        let mut package = bundle(&MockEnv::seeded(1)).key_package;
        package.version = 2;
        assert_eq!(
            package.verify_signature(&suite),
            Err(CommitValidationError::InvalidKeyPackageSignature)
        );
    }

    #[test]
    fn references_are_stable_and_distinct() {
        let suite = Curve25519ChaCha::new();
        let a = bundle(&MockEnv::seeded(1)).key_package;
        let b = bundle(&MockEnv::seeded(2)).key_package;
        assert_eq!(a.reference(&suite).unwrap(), a.reference(&suite).unwrap());
        assert_ne!(a.reference(&suite).unwrap(), b.reference(&suite).unwrap());
    }
}
