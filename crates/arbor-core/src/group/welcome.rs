//! Group info and welcome messages.
//!
//! ```text
//! welcome_key   = ExpandWithLabel(welcome_secret, "key",   "", Nk)
//! welcome_nonce = ExpandWithLabel(welcome_secret, "nonce", "", Nn)
//! encrypted_group_info = AEAD(welcome_key, welcome_nonce, "", GroupInfo)
//! per new member:  EncryptWithLabel(init_key, "Welcome",
//!                                   encrypted_group_info, GroupSecrets)
//! ```

use arbor_crypto::{
    CipherSuite, CipherSuiteId, CryptoError, HpkeCiphertext, HpkePublicKey, Secret,
    SignaturePrivateKey,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{
    context::GroupContext,
    key_package::{KeyPackage, KeyPackageBundle, KeyPackageRef},
    psk::PreSharedKeyId,
};
use crate::{
    codec,
    env::Environment,
    error::{CodecError, GroupError},
    extension::{self, Extension},
    tree::{LeafIndex, RatchetTree},
};

const GROUP_INFO_LABEL: &str = "GroupInfoTBS";
const WELCOME_LABEL: &str = "Welcome";

/// Signed description of an epoch, enough for a newcomer to join it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Context of the described epoch, interim hash included
    pub group_context: GroupContext,
    /// Ratchet tree, external public key and similar
    pub extensions: Vec<Extension>,
    /// Confirmation tag of the commit that created the epoch
    pub confirmation_tag: Vec<u8>,
    /// Leaf of the member that signed
    pub signer: LeafIndex,
    /// Signature by `signer`
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct GroupInfoTbs<'a> {
    group_context: &'a GroupContext,
    extensions: &'a [Extension],
    confirmation_tag: &'a [u8],
    signer: LeafIndex,
}

impl GroupInfo {
    pub(crate) fn sign(
        suite: &dyn CipherSuite,
        group_context: GroupContext,
        extensions: Vec<Extension>,
        confirmation_tag: Vec<u8>,
        signer: LeafIndex,
        key: &SignaturePrivateKey,
    ) -> Result<Self, GroupError> {
        let mut info = Self {
            group_context,
            extensions,
            confirmation_tag,
            signer,
            signature: Vec::new(),
        };
        info.signature = suite.sign_with_label(key, GROUP_INFO_LABEL, &info.to_be_signed()?)?;
        Ok(info)
    }

    /// Verify the signature against the signer's leaf in `tree`.
    pub fn verify(&self, suite: &dyn CipherSuite, tree: &RatchetTree) -> Result<(), GroupError> {
        let signer = tree.leaf(self.signer).ok_or(GroupError::InvalidGroupInfoSignature)?;
        suite
            .verify_with_label(
                &signer.signature_key,
                GROUP_INFO_LABEL,
                &self.to_be_signed()?,
                &self.signature,
            )
            .map_err(|_| GroupError::InvalidGroupInfoSignature)
    }

    /// Embedded ratchet tree, if any.
    pub fn ratchet_tree(&self) -> Option<&RatchetTree> {
        extension::ratchet_tree(&self.extensions)
    }

    /// Key external joiners seal their init secret to.
    pub fn external_pub(&self) -> Option<&HpkePublicKey> {
        extension::external_pub(&self.extensions)
    }

    fn to_be_signed(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(&GroupInfoTbs {
            group_context: &self.group_context,
            extensions: &self.extensions,
            confirmation_tag: &self.confirmation_tag,
            signer: self.signer,
        })
    }
}

/// Secrets a new member needs on top of the group info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSecrets {
    /// Joiner secret of the new epoch
    pub joiner_secret: Secret,
    /// Path secret for the lowest common ancestor with the committer
    pub path_secret: Option<Secret>,
    /// PSKs injected by the commit
    pub psks: Vec<PreSharedKeyId>,
}

/// Group secrets sealed to one key package's init key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedGroupSecrets {
    /// Key package the entry is for
    pub new_member: KeyPackageRef,
    /// Sealed [`GroupSecrets`]
    pub encrypted_group_secrets: HpkeCiphertext,
}

/// Invitation for members added by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    /// Suite of the group being joined
    pub cipher_suite: CipherSuiteId,
    /// One entry per new member
    pub secrets: Vec<EncryptedGroupSecrets>,
    /// Group info under the welcome key
    pub encrypted_group_info: Vec<u8>,
}

impl Welcome {
    pub(crate) fn seal(
        suite: &dyn CipherSuite,
        env: &dyn Environment,
        welcome_secret: &Secret,
        group_info: &GroupInfo,
        recipients: Vec<(&KeyPackage, GroupSecrets)>,
    ) -> Result<Self, GroupError> {
        let (key, nonce) = welcome_key_nonce(suite, welcome_secret)?;
        let encrypted_group_info = suite.encrypt_aead(
            key.as_bytes(),
            nonce.as_bytes(),
            &[],
            &codec::encode(group_info)?,
        )?;

        let mut secrets = Vec::with_capacity(recipients.len());
        for (key_package, group_secrets) in recipients {
            let plaintext = Zeroizing::new(codec::encode(&group_secrets)?);
            secrets.push(EncryptedGroupSecrets {
                new_member: key_package.reference(suite)?,
                encrypted_group_secrets: suite.encrypt_with_label(
                    &key_package.init_key,
                    WELCOME_LABEL,
                    &encrypted_group_info,
                    &plaintext,
                    &env.random_vec(suite.hash_len()),
                )?,
            });
        }
        Ok(Self { cipher_suite: suite.id(), secrets, encrypted_group_info })
    }

    /// Decrypt the entry addressed to `bundle`.
    pub fn open_secrets(
        &self,
        suite: &dyn CipherSuite,
        bundle: &KeyPackageBundle,
    ) -> Result<GroupSecrets, GroupError> {
        let reference = bundle.key_package.reference(suite)?;
        let entry = self
            .secrets
            .iter()
            .find(|entry| entry.new_member == reference)
            .ok_or(GroupError::NoMatchingKeyPackage)?;
        let plaintext = Zeroizing::new(suite.decrypt_with_label(
            &bundle.init_private_key,
            WELCOME_LABEL,
            &self.encrypted_group_info,
            &entry.encrypted_group_secrets,
        )?);
        Ok(codec::decode(&plaintext)?)
    }

    /// Decrypt the group info under `welcome_secret`.
    pub fn open_group_info(
        &self,
        suite: &dyn CipherSuite,
        welcome_secret: &Secret,
    ) -> Result<GroupInfo, GroupError> {
        let (key, nonce) = welcome_key_nonce(suite, welcome_secret)?;
        let plaintext =
            suite.decrypt_aead(key.as_bytes(), nonce.as_bytes(), &[], &self.encrypted_group_info)?;
        Ok(codec::decode(&plaintext)?)
    }
}

fn welcome_key_nonce(
    suite: &dyn CipherSuite,
    welcome_secret: &Secret,
) -> Result<(Secret, Secret), CryptoError> {
    let key = suite.expand_with_label(welcome_secret, "key", &[], suite.aead_key_len())?;
    let nonce = suite.expand_with_label(welcome_secret, "nonce", &[], suite.aead_nonce_len())?;
    Ok((key, nonce))
}

#[cfg(test)]
mod tests {
    use arbor_crypto::Curve25519ChaCha;

    use super::*;
    use crate::{
        env::test_utils::{MOCK_NOW, MockEnv},
        group::key_package::MemberIdentity,
        tree::{Credential, Lifetime},
    };

    fn context() -> GroupContext {
        GroupContext {
            version: 1,
            cipher_suite: 3,
            group_id: b"group".to_vec(),
            epoch: 4,
            tree_hash: vec![1; 32],
            confirmed_transcript_hash: vec![2; 32],
            interim_transcript_hash: vec![3; 32],
            extensions: vec![],
        }
    }

    fn bundle(env: &MockEnv, name: &str) -> KeyPackageBundle {
        let suite = Curve25519ChaCha::new();
        let identity = MemberIdentity::generate(&suite, env, Credential::basic(name)).unwrap();
        KeyPackage::generate(&suite, env, &identity, Lifetime::starting_at(MOCK_NOW, 100)).unwrap()
    }

    #[test]
    fn group_info_signature_covers_context() {
        let suite = Curve25519ChaCha::new();
        let env = MockEnv::seeded(1);
        let signer = bundle(&env, "alice");
        let tree = RatchetTree::new(signer.key_package.leaf_node.clone());

        let mut info = GroupInfo::sign(
            &suite,
            context(),
            vec![],
            vec![9; 32],
            LeafIndex::new(0),
            &signer.signature_private_key,
        )
        .unwrap();
        info.verify(&suite, &tree).unwrap();

        info.group_context.epoch += 1;
        assert_eq!(info.verify(&suite, &tree), Err(GroupError::InvalidGroupInfoSignature));
    }

    #[test]
    fn welcome_opens_only_for_addressed_package() {
        let suite = Curve25519ChaCha::new();
        let env = MockEnv::seeded(2);
        let alice = bundle(&env, "alice");
        let bob = bundle(&env, "bob");
        let carol = bundle(&env, "carol");

        let info = GroupInfo::sign(
            &suite,
            context(),
            vec![],
            vec![9; 32],
            LeafIndex::new(0),
            &alice.signature_private_key,
        )
        .unwrap();
        let secrets = GroupSecrets {
            joiner_secret: Secret::from(vec![5; 32]),
            path_secret: None,
            psks: vec![],
        };
        let welcome_secret = Secret::from(vec![6; 32]);
        let welcome = Welcome::seal(
            &suite,
            &env,
            &welcome_secret,
            &info,
            vec![(&bob.key_package, secrets.clone())],
        )
        .unwrap();

        assert_eq!(welcome.open_secrets(&suite, &bob).unwrap(), secrets);
        assert_eq!(welcome.open_secrets(&suite, &carol), Err(GroupError::NoMatchingKeyPackage));
        assert_eq!(welcome.open_group_info(&suite, &welcome_secret).unwrap(), info);
        assert!(welcome.open_group_info(&suite, &Secret::from(vec![7; 32])).is_err());
    }
}
