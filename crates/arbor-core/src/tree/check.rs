//! Validation of leaf nodes and of whole trees received from others.

use std::collections::BTreeMap;

use arbor_crypto::{CipherSuite, CipherSuiteId, HpkePublicKey};
use tracing::debug;

use super::{
    index::{LeafIndex, NodeIndex},
    node::{LeafNode, LeafNodeSource},
    ratchet_tree::RatchetTree,
};
use crate::{
    auth::AuthenticationService,
    error::{LeafNodeCheckError, TreeCheckError},
    extension::{Extension, required_capabilities},
    group::GroupContext,
};

/// Where a leaf node is expected to come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Inside a key package (add proposals, welcome, external join)
    KeyPackage,
    /// Inside an update proposal
    Update,
    /// Inside a commit's update path
    Commit,
}

impl SourceKind {
    fn name(self) -> &'static str {
        match self {
            Self::KeyPackage => "key_package",
            Self::Update => "update",
            Self::Commit => "commit",
        }
    }

    fn matches(self, source: &LeafNodeSource) -> bool {
        matches!(
            (self, source),
            (Self::KeyPackage, LeafNodeSource::KeyPackage { .. })
                | (Self::Update, LeafNodeSource::Update)
                | (Self::Commit, LeafNodeSource::Commit { .. })
        )
    }
}

/// Everything a leaf node is validated against.
#[derive(Clone, Copy)]
pub struct LeafNodeValidator<'a> {
    /// Suite of the group
    pub suite: &'a dyn CipherSuite,
    /// Credential policy
    pub auth: &'a dyn AuthenticationService,
    /// Group the leaf is bound to
    pub group_id: &'a [u8],
    /// Group protocol version
    pub version: u16,
    /// Group cipher suite
    pub cipher_suite: CipherSuiteId,
    /// Group context extensions in force
    pub extensions: &'a [Extension],
    /// Tree the leaf joins; other members are checked for compatibility
    pub tree: &'a RatchetTree,
    /// Current time for lifetime checks
    pub now: u64,
}

impl LeafNodeValidator<'_> {
    /// Fully validate `leaf`, including its credential.
    ///
    /// `position` is the slot the leaf occupies or replaces. It binds update
    /// and commit signatures and is excluded from key uniqueness checks.
    pub fn validate(
        &self,
        leaf: &LeafNode,
        expected: Option<SourceKind>,
        position: Option<LeafIndex>,
    ) -> Result<(), LeafNodeCheckError> {
        self.validate_content(leaf, expected, position)?;
        self.auth
            .validate(&leaf.credential)
            .map_err(|reason| LeafNodeCheckError::CredentialRejected { reason })
    }

    /// Validate everything except the credential.
    pub(crate) fn validate_content(
        &self,
        leaf: &LeafNode,
        expected: Option<SourceKind>,
        position: Option<LeafIndex>,
    ) -> Result<(), LeafNodeCheckError> {
        leaf.verify_signature(self.suite, position.map(|p| (self.group_id, p)))?;

        if let Some(kind) = expected
            && !kind.matches(&leaf.source)
        {
            return Err(LeafNodeCheckError::UnexpectedSource {
                expected: kind.name(),
                actual: leaf.source.name(),
            });
        }

        let caps = &leaf.capabilities;
        if !caps.versions.contains(&self.version) {
            return Err(LeafNodeCheckError::UnsupportedVersion { version: self.version });
        }
        if !caps.cipher_suites.contains(&self.cipher_suite) {
            return Err(LeafNodeCheckError::UnsupportedCipherSuite {
                cipher_suite: self.cipher_suite,
            });
        }

        if let Some(required) = required_capabilities(self.extensions) {
            for ext in &required.extension_types {
                if !caps.supports_extension(*ext) {
                    return Err(missing("extension", *ext));
                }
            }
            for proposal in &required.proposal_types {
                if !caps.supports_proposal(*proposal) {
                    return Err(missing("proposal", *proposal));
                }
            }
            for credential in &required.credential_types {
                if !caps.credentials.contains(credential) {
                    return Err(missing("credential", *credential));
                }
            }
        }

        for ext in &leaf.extensions {
            if !caps.supports_extension(ext.extension_type()) {
                return Err(LeafNodeCheckError::UnsupportedExtension {
                    extension_type: ext.extension_type(),
                });
            }
        }

        if let Some(lifetime) = leaf.lifetime()
            && !lifetime.covers(self.now)
        {
            return Err(LeafNodeCheckError::LifetimeExpired {
                now: self.now,
                not_before: lifetime.not_before,
                not_after: lifetime.not_after,
            });
        }

        let own_type = leaf.credential.credential_type();
        let self_index = position.map_or(u32::MAX, LeafIndex::value);
        if !caps.credentials.contains(&own_type) {
            return Err(LeafNodeCheckError::IncompatibleCredential {
                credential_type: own_type,
                leaf: self_index,
            });
        }
        for (index, other) in self.tree.leaves() {
            if Some(index) == position {
                continue;
            }
            if !other.capabilities.credentials.contains(&own_type) {
                return Err(LeafNodeCheckError::IncompatibleCredential {
                    credential_type: own_type,
                    leaf: index.value(),
                });
            }
            let other_type = other.credential.credential_type();
            if !caps.credentials.contains(&other_type) {
                return Err(LeafNodeCheckError::IncompatibleCredential {
                    credential_type: other_type,
                    leaf: self_index,
                });
            }
            if other.signature_key == leaf.signature_key {
                return Err(LeafNodeCheckError::DuplicateSignatureKey { leaf: index.value() });
            }
        }

        let own_node = position.map(LeafIndex::node);
        for (index, node) in self.tree.non_blank_nodes() {
            if Some(index) != own_node && node.encryption_key() == &leaf.encryption_key {
                return Err(LeafNodeCheckError::DuplicateEncryptionKey { node: index.value() });
            }
        }
        Ok(())
    }
}

fn missing(kind: &'static str, value: u16) -> LeafNodeCheckError {
    LeafNodeCheckError::MissingRequiredCapability { kind, value }
}

/// Validate a tree received from another member against `context`.
///
/// Checks the tree hash, parent-hash coverage of every parent, unmerged
/// leaf placement, encryption key uniqueness and every leaf.
pub fn check_tree(
    suite: &dyn CipherSuite,
    auth: &dyn AuthenticationService,
    tree: &RatchetTree,
    context: &GroupContext,
    now: u64,
) -> Result<(), TreeCheckError> {
    if tree.tree_hash(suite)? != context.tree_hash {
        return Err(TreeCheckError::TreeHashMismatch);
    }
    check_parent_hashes(suite, tree)?;
    check_unmerged_leaves(tree)?;
    check_unique_encryption_keys(tree)?;

    let validator = LeafNodeValidator {
        suite,
        auth,
        group_id: &context.group_id,
        version: context.version,
        cipher_suite: context.cipher_suite,
        extensions: &context.extensions,
        tree,
        now,
    };
    for (index, leaf) in tree.leaves() {
        validator
            .validate_content(leaf, None, Some(index))
            .map_err(|source| TreeCheckError::InvalidLeaf { leaf: index.value(), source })?;
    }

    let (indices, credentials): (Vec<LeafIndex>, Vec<_>) =
        tree.leaves().map(|(index, leaf)| (index, &leaf.credential)).unzip();
    auth.validate_all(&credentials).map_err(|(i, reason)| TreeCheckError::InvalidLeaf {
        leaf: indices.get(i).map_or(u32::MAX, |leaf| leaf.value()),
        source: LeafNodeCheckError::CredentialRejected { reason },
    })?;

    debug!(leaves = tree.leaf_count(), members = indices.len(), "ratchet tree verified");
    Ok(())
}

/// Every non-blank parent must be verified by exactly one parent-hash
/// chain rising from a leaf.
fn check_parent_hashes(suite: &dyn CipherSuite, tree: &RatchetTree) -> Result<(), TreeCheckError> {
    let mut coverage: BTreeMap<NodeIndex, u32> = BTreeMap::new();

    for (leaf_index, leaf) in tree.leaves() {
        let Some(declared) = leaf.parent_hash().filter(|hash| !hash.is_empty()) else {
            continue;
        };
        let mut expected = declared.to_vec();
        for ancestor in tree.direct_path(leaf_index) {
            let Some(parent) = tree.parent(ancestor) else {
                continue;
            };
            if tree.parent_hash_for_leaf(suite, ancestor, leaf_index)? != expected {
                break;
            }
            *coverage.entry(ancestor).or_default() += 1;
            if parent.parent_hash.is_empty() {
                break;
            }
            expected.clone_from(&parent.parent_hash);
        }
    }

    for (index, node) in tree.non_blank_nodes() {
        if index.is_leaf() {
            continue;
        }
        let count = coverage.get(&index).copied().unwrap_or(0);
        if count != 1 {
            debug!(node = index.value(), coverage = count, ?node, "parent hash coverage failed");
            return Err(TreeCheckError::NotParentHashValid { node: index.value(), coverage: count });
        }
    }
    Ok(())
}

/// Unmerged leaves must be occupied leaves below the node, listed at every
/// occupied node between them and it.
fn check_unmerged_leaves(tree: &RatchetTree) -> Result<(), TreeCheckError> {
    for (index, _) in tree.non_blank_nodes() {
        let Some(parent) = tree.parent(index) else {
            continue;
        };
        for leaf in &parent.unmerged_leaves {
            let bad = || TreeCheckError::BadUnmergedLeaf { node: index.value(), leaf: leaf.value() };
            if tree.leaf(*leaf).is_none() || !leaf.node().is_in_subtree(index) {
                return Err(bad());
            }
            for between in tree.direct_path(*leaf).into_iter().take_while(|n| *n != index) {
                if let Some(intermediate) = tree.parent(between)
                    && !intermediate.unmerged_leaves.contains(leaf)
                {
                    return Err(bad());
                }
            }
        }
    }
    Ok(())
}

/// No two non-blank nodes may share an encryption key.
pub(crate) fn check_unique_encryption_keys(tree: &RatchetTree) -> Result<(), TreeCheckError> {
    let mut seen: BTreeMap<&HpkePublicKey, NodeIndex> = BTreeMap::new();
    for (index, node) in tree.non_blank_nodes() {
        if let Some(first) = seen.insert(node.encryption_key(), index) {
            return Err(TreeCheckError::DuplicateEncryptionKey {
                first: first.value(),
                second: index.value(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use arbor_crypto::{Curve25519ChaCha, SignatureKeyPair};

    use super::*;
    use crate::{
        auth::BasicAuthenticationService,
        constants::PROTOCOL_VERSION,
        tree::node::{Capabilities, Credential, LeafNodeParams, Lifetime, ParentNode},
    };

    const GROUP: &[u8] = b"group";

    fn keys(suite: &Curve25519ChaCha, tag: u8) -> SignatureKeyPair {
        suite.derive_signature_key_pair(&[tag; 32]).unwrap()
    }

    fn hpke(suite: &Curve25519ChaCha, tag: u8) -> HpkePublicKey {
        suite.derive_hpke_key_pair(&[tag; 32]).unwrap().public_key
    }

    fn key_package_leaf(suite: &Curve25519ChaCha, tag: u8) -> LeafNode {
        let signer = keys(suite, tag);
        let params = LeafNodeParams {
            encryption_key: hpke(suite, tag),
            signature_key: signer.public_key,
            credential: Credential::basic(vec![b'a' + tag]),
            capabilities: Capabilities::for_suite(suite.id()),
            source: LeafNodeSource::KeyPackage { lifetime: Lifetime::starting_at(0, 1_000) },
            extensions: vec![],
        };
        LeafNode::sign(suite, params, &signer.private_key, None).unwrap()
    }

    fn context_for(suite: &Curve25519ChaCha, tree: &RatchetTree) -> GroupContext {
        GroupContext {
            version: PROTOCOL_VERSION,
            cipher_suite: suite.id(),
            group_id: GROUP.to_vec(),
            epoch: 1,
            tree_hash: tree.tree_hash(suite).unwrap(),
            confirmed_transcript_hash: vec![],
            interim_transcript_hash: vec![],
            extensions: vec![],
        }
    }

    /// Three leaves with leaf 0 having committed a path over nodes 1 and 3.
    fn committed_tree(suite: &Curve25519ChaCha) -> RatchetTree {
        let mut tree = RatchetTree::new(key_package_leaf(suite, 0));
        for tag in 1..3 {
            tree = tree.insert(key_package_leaf(suite, tag)).unwrap().0;
        }
        let path = [NodeIndex::new(1), NodeIndex::new(3)];
        for node in path {
            tree.set_parent(node, ParentNode::new(hpke(suite, 100 + node.value() as u8)));
        }
        let parent_hash = tree.set_parent_hashes(suite, LeafIndex::new(0), &path).unwrap();
        let signer = keys(suite, 0);
        let old = tree.leaf(LeafIndex::new(0)).unwrap().clone();
        let params = old.to_params(hpke(suite, 50), LeafNodeSource::Commit { parent_hash });
        let leaf =
            LeafNode::sign(suite, params, &signer.private_key, Some((GROUP, LeafIndex::new(0))))
                .unwrap();
        tree.set_leaf(LeafIndex::new(0), leaf).unwrap();
        tree
    }

    #[test]
    fn valid_tree_passes() {
        let suite = Curve25519ChaCha::new();
        let tree = committed_tree(&suite);
        let context = context_for(&suite, &tree);
        check_tree(&suite, &BasicAuthenticationService::new(), &tree, &context, 10).unwrap();
    }

    #[test]
    fn wrong_tree_hash_fails() {
        let suite = Curve25519ChaCha::new();
        let tree = committed_tree(&suite);
        let mut context = context_for(&suite, &tree);
        context.tree_hash = vec![0; 32];
        assert_eq!(
            check_tree(&suite, &BasicAuthenticationService::new(), &tree, &context, 10),
            Err(TreeCheckError::TreeHashMismatch)
        );
    }

    #[test]
    fn tampered_sibling_breaks_chain() {
        let suite = Curve25519ChaCha::new();
        let mut tree = committed_tree(&suite);
        tree.set_parent(NodeIndex::new(5), ParentNode::new(hpke(&suite, 77)));
        let context = context_for(&suite, &tree);
        assert_eq!(
            check_tree(&suite, &BasicAuthenticationService::new(), &tree, &context, 10),
            Err(TreeCheckError::NotParentHashValid { node: 3, coverage: 0 })
        );
    }

    #[test]
    fn unmerged_leaf_outside_subtree_fails() {
        let suite = Curve25519ChaCha::new();
        let mut tree = committed_tree(&suite);
        tree.parent_mut(NodeIndex::new(1)).unwrap().unmerged_leaves.push(LeafIndex::new(2));
        assert_eq!(
            check_unmerged_leaves(&tree),
            Err(TreeCheckError::BadUnmergedLeaf { node: 1, leaf: 2 })
        );
    }

    #[test]
    fn unmerged_leaf_beyond_tree_fails() {
        let suite = Curve25519ChaCha::new();
        let mut tree = committed_tree(&suite);
        let stray = LeafIndex::new(0x8000_0000);
        tree.parent_mut(NodeIndex::new(1)).unwrap().unmerged_leaves.push(stray);
        let context = context_for(&suite, &tree);
        assert_eq!(
            check_tree(&suite, &BasicAuthenticationService::new(), &tree, &context, 10),
            Err(TreeCheckError::BadUnmergedLeaf { node: 1, leaf: LeafIndex::MAX })
        );
    }

    #[test]
    fn duplicate_encryption_key_fails() {
        let suite = Curve25519ChaCha::new();
        let mut tree = committed_tree(&suite);
        let key = tree.leaf(LeafIndex::new(1)).unwrap().encryption_key.clone();
        tree.parent_mut(NodeIndex::new(3)).unwrap().encryption_key = key;
        assert_eq!(
            check_unique_encryption_keys(&tree),
            Err(TreeCheckError::DuplicateEncryptionKey { first: 2, second: 3 })
        );
    }

    #[test]
    fn rejected_credential_fails() {
        let suite = Curve25519ChaCha::new();
        let tree = committed_tree(&suite);
        let context = context_for(&suite, &tree);
        let auth = BasicAuthenticationService::with_allowed(["a", "b"]);
        assert!(matches!(
            check_tree(&suite, &auth, &tree, &context, 10),
            Err(TreeCheckError::InvalidLeaf { leaf: 2, .. })
        ));
    }

    #[test]
    fn validator_rejects_expired_and_duplicate_leaves() {
        let suite = Curve25519ChaCha::new();
        let tree = committed_tree(&suite);
        let auth = BasicAuthenticationService::new();
        let validator = LeafNodeValidator {
            suite: &suite,
            auth: &auth,
            group_id: GROUP,
            version: PROTOCOL_VERSION,
            cipher_suite: suite.id(),
            extensions: &[],
            tree: &tree,
            now: 10,
        };
        let fresh = key_package_leaf(&suite, 9);
        validator.validate(&fresh, Some(SourceKind::KeyPackage), None).unwrap();
        assert!(matches!(
            validator.validate(&fresh, Some(SourceKind::Update), None),
            Err(LeafNodeCheckError::UnexpectedSource { .. })
        ));

        let late = LeafNodeValidator { now: 5_000, ..validator };
        assert!(matches!(
            late.validate(&fresh, None, None),
            Err(LeafNodeCheckError::LifetimeExpired { .. })
        ));

        let existing = tree.leaf(LeafIndex::new(1)).unwrap().clone();
        assert_eq!(
            validator.validate(&existing, None, None),
            Err(LeafNodeCheckError::DuplicateSignatureKey { leaf: 1 })
        );
    }
}
