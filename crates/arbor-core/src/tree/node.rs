//! Node content: leaves carry a member's keys and credential, parents carry
//! a shared encryption key.

use arbor_crypto::{
    CipherSuite, CipherSuiteId, HpkePublicKey, SignaturePrivateKey, SignaturePublicKey,
};
use serde::{Deserialize, Serialize};

use super::index::LeafIndex;
use crate::{
    codec,
    constants::{PROTOCOL_VERSION, credential_type, proposal_type},
    error::{GroupError, LeafNodeCheckError},
    extension::{Extension, is_default_extension},
};

/// Signing label for leaf nodes.
const LEAF_NODE_LABEL: &str = "LeafNodeTBS";

/// Member identity as presented to the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
    /// Raw identity bytes
    Basic {
        /// Application-level identity
        identity: Vec<u8>,
    },
    /// DER certificate chain, leaf first
    X509 {
        /// Certificates
        certificates: Vec<Vec<u8>>,
    },
}

impl Credential {
    /// Basic credential for `identity`.
    pub fn basic(identity: impl Into<Vec<u8>>) -> Self {
        Self::Basic { identity: identity.into() }
    }

    /// Registered type code.
    pub fn credential_type(&self) -> u16 {
        match self {
            Self::Basic { .. } => credential_type::BASIC,
            Self::X509 { .. } => credential_type::X509,
        }
    }
}

/// What a member supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Protocol versions
    pub versions: Vec<u16>,
    /// Cipher suites
    pub cipher_suites: Vec<CipherSuiteId>,
    /// Non-default extension types
    pub extensions: Vec<u16>,
    /// Non-default proposal types
    pub proposals: Vec<u16>,
    /// Credential types
    pub credentials: Vec<u16>,
}

impl Capabilities {
    /// Capabilities for a member using only `suite` and basic credentials.
    pub fn for_suite(suite: CipherSuiteId) -> Self {
        Self {
            versions: vec![PROTOCOL_VERSION],
            cipher_suites: vec![suite],
            extensions: Vec::new(),
            proposals: Vec::new(),
            credentials: vec![credential_type::BASIC],
        }
    }

    /// Whether the member understands `ext`.
    pub fn supports_extension(&self, ext: u16) -> bool {
        is_default_extension(ext) || self.extensions.contains(&ext)
    }

    /// Whether the member understands `proposal`.
    pub fn supports_proposal(&self, proposal: u16) -> bool {
        proposal_type::DEFAULTS.contains(&proposal) || self.proposals.contains(&proposal)
    }
}

/// Validity window of a key package, in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    /// First valid second
    pub not_before: u64,
    /// Last valid second
    pub not_after: u64,
}

impl Lifetime {
    /// Window starting at `now` and lasting `duration` seconds.
    pub fn starting_at(now: u64, duration: u64) -> Self {
        Self { not_before: now, not_after: now.saturating_add(duration) }
    }

    /// Whether `now` falls inside the window.
    pub fn covers(&self, now: u64) -> bool {
        self.not_before <= now && now <= self.not_after
    }
}

/// How a leaf node entered the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafNodeSource {
    /// Published in a key package
    KeyPackage {
        /// Validity window
        lifetime: Lifetime,
    },
    /// Replaced through an update proposal
    Update,
    /// Replaced by the committer's update path
    Commit {
        /// Hash binding the leaf to its parent chain
        parent_hash: Vec<u8>,
    },
}

impl LeafNodeSource {
    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::KeyPackage { .. } => "key_package",
            Self::Update => "update",
            Self::Commit { .. } => "commit",
        }
    }
}

/// A member's leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafNode {
    /// HPKE key path secrets are encrypted to
    pub encryption_key: HpkePublicKey,
    /// Key that signs the member's messages
    pub signature_key: SignaturePublicKey,
    /// Member identity
    pub credential: Credential,
    /// What the member supports
    pub capabilities: Capabilities,
    /// Provenance
    pub source: LeafNodeSource,
    /// Leaf extensions
    pub extensions: Vec<Extension>,
    /// Signature over all other fields, plus group binding for update and
    /// commit sources
    pub signature: Vec<u8>,
}

/// Signed portion of a leaf node.
#[derive(Serialize)]
struct LeafNodeTbs<'a> {
    encryption_key: &'a HpkePublicKey,
    signature_key: &'a SignaturePublicKey,
    credential: &'a Credential,
    capabilities: &'a Capabilities,
    source: &'a LeafNodeSource,
    extensions: &'a [Extension],
    group: Option<(&'a [u8], LeafIndex)>,
}

/// Unsigned leaf content, signed into a [`LeafNode`].
#[derive(Debug, Clone)]
pub struct LeafNodeParams {
    /// HPKE key
    pub encryption_key: HpkePublicKey,
    /// Signature key
    pub signature_key: SignaturePublicKey,
    /// Member identity
    pub credential: Credential,
    /// What the member supports
    pub capabilities: Capabilities,
    /// Provenance
    pub source: LeafNodeSource,
    /// Leaf extensions
    pub extensions: Vec<Extension>,
}

impl LeafNode {
    /// Sign `params` into a leaf.
    ///
    /// `group` binds update and commit leaves to a group and position; key
    /// package leaves pass `None`.
    pub fn sign(
        suite: &dyn CipherSuite,
        params: LeafNodeParams,
        signer: &SignaturePrivateKey,
        group: Option<(&[u8], LeafIndex)>,
    ) -> Result<Self, GroupError> {
        let mut leaf = Self {
            encryption_key: params.encryption_key,
            signature_key: params.signature_key,
            credential: params.credential,
            capabilities: params.capabilities,
            source: params.source,
            extensions: params.extensions,
            signature: Vec::new(),
        };
        let tbs = leaf.to_be_signed(group)?;
        leaf.signature = suite.sign_with_label(signer, LEAF_NODE_LABEL, &tbs)?;
        Ok(leaf)
    }

    /// Copy of this leaf with new key material and source, ready to sign.
    pub fn to_params(&self, encryption_key: HpkePublicKey, source: LeafNodeSource) -> LeafNodeParams {
        LeafNodeParams {
            encryption_key,
            signature_key: self.signature_key.clone(),
            credential: self.credential.clone(),
            capabilities: self.capabilities.clone(),
            source,
            extensions: self.extensions.clone(),
        }
    }

    /// Verify the leaf signature under its own signature key.
    pub fn verify_signature(
        &self,
        suite: &dyn CipherSuite,
        group: Option<(&[u8], LeafIndex)>,
    ) -> Result<(), LeafNodeCheckError> {
        let tbs = self.to_be_signed(group)?;
        suite
            .verify_with_label(&self.signature_key, LEAF_NODE_LABEL, &tbs, &self.signature)
            .map_err(|_| LeafNodeCheckError::InvalidSignature)
    }

    /// Parent hash declared by commit-sourced leaves.
    pub fn parent_hash(&self) -> Option<&[u8]> {
        match &self.source {
            LeafNodeSource::Commit { parent_hash } => Some(parent_hash),
            _ => None,
        }
    }

    /// Lifetime of key-package-sourced leaves.
    pub fn lifetime(&self) -> Option<&Lifetime> {
        match &self.source {
            LeafNodeSource::KeyPackage { lifetime } => Some(lifetime),
            _ => None,
        }
    }

    /// Application identifier extension, if present.
    pub fn application_id(&self) -> Option<&[u8]> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::ApplicationId(id) => Some(id.as_slice()),
            _ => None,
        })
    }

    fn to_be_signed(&self, group: Option<(&[u8], LeafIndex)>) -> Result<Vec<u8>, LeafNodeCheckError> {
        // Key package leaves are position-independent.
        let group = match self.source {
            LeafNodeSource::KeyPackage { .. } => None,
            _ => group,
        };
        let tbs = LeafNodeTbs {
            encryption_key: &self.encryption_key,
            signature_key: &self.signature_key,
            credential: &self.credential,
            capabilities: &self.capabilities,
            source: &self.source,
            extensions: &self.extensions,
            group,
        };
        Ok(codec::encode(&tbs)?)
    }
}

/// Interior node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentNode {
    /// HPKE key shared by the subtree
    pub encryption_key: HpkePublicKey,
    /// Hash binding this node to its parent; empty at the top of a chain
    pub parent_hash: Vec<u8>,
    /// Leaves below that joined after this key was set, ascending
    pub unmerged_leaves: Vec<LeafIndex>,
}

impl ParentNode {
    /// Fresh node with no parent hash and no unmerged leaves.
    pub fn new(encryption_key: HpkePublicKey) -> Self {
        Self { encryption_key, parent_hash: Vec::new(), unmerged_leaves: Vec::new() }
    }

    /// Insert `leaf` keeping the list sorted and unique.
    pub(crate) fn add_unmerged(&mut self, leaf: LeafIndex) {
        if let Err(pos) = self.unmerged_leaves.binary_search(&leaf) {
            self.unmerged_leaves.insert(pos, leaf);
        }
    }
}

/// Content of a non-blank tree slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    /// Member leaf
    Leaf(LeafNode),
    /// Interior node
    Parent(ParentNode),
}

impl Node {
    /// HPKE public key of either kind.
    pub fn encryption_key(&self) -> &HpkePublicKey {
        match self {
            Self::Leaf(leaf) => &leaf.encryption_key,
            Self::Parent(parent) => &parent.encryption_key,
        }
    }
}
