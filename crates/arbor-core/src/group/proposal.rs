//! Proposals and proposal references.

use std::fmt;

use arbor_crypto::CipherSuiteId;
use serde::{Deserialize, Serialize};

use super::{key_package::KeyPackage, psk::PreSharedKeyId};
use crate::{
    constants::proposal_type,
    extension::Extension,
    tree::{LeafIndex, LeafNode},
};

/// A proposed change to the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proposal {
    /// Add the member described by a key package
    Add {
        /// New member's key package
        key_package: KeyPackage,
    },
    /// Replace the sender's own leaf
    Update {
        /// Replacement leaf
        leaf_node: LeafNode,
    },
    /// Remove a member
    Remove {
        /// Leaf to remove
        removed: LeafIndex,
    },
    /// Inject a pre-shared key into the next epoch
    PreSharedKey {
        /// PSK identifier
        psk: PreSharedKeyId,
    },
    /// End this group and continue under new parameters
    ReInit {
        /// Identifier of the successor group
        group_id: Vec<u8>,
        /// Successor protocol version
        version: u16,
        /// Successor cipher suite
        cipher_suite: CipherSuiteId,
        /// Successor group context extensions
        extensions: Vec<Extension>,
    },
    /// Init secret of an external commit, sealed to the external key
    ExternalInit {
        /// Encoded HPKE ciphertext of the init secret
        kem_output: Vec<u8>,
    },
    /// Replace the group context extensions
    GroupContextExtensions {
        /// New extension list
        extensions: Vec<Extension>,
    },
}

impl Proposal {
    /// Registered type code.
    pub fn proposal_type(&self) -> u16 {
        match self {
            Self::Add { .. } => proposal_type::ADD,
            Self::Update { .. } => proposal_type::UPDATE,
            Self::Remove { .. } => proposal_type::REMOVE,
            Self::PreSharedKey { .. } => proposal_type::PRE_SHARED_KEY,
            Self::ReInit { .. } => proposal_type::REINIT,
            Self::ExternalInit { .. } => proposal_type::EXTERNAL_INIT,
            Self::GroupContextExtensions { .. } => proposal_type::GROUP_CONTEXT_EXTENSIONS,
        }
    }

    /// Position in the fixed application order: updates, removes, adds,
    /// PSKs, context extensions, external init, reinit.
    pub(crate) fn application_rank(&self) -> u8 {
        match self {
            Self::Update { .. } => 0,
            Self::Remove { .. } => 1,
            Self::Add { .. } => 2,
            Self::PreSharedKey { .. } => 3,
            Self::GroupContextExtensions { .. } => 4,
            Self::ExternalInit { .. } => 5,
            Self::ReInit { .. } => 6,
        }
    }

    /// Whether a commit carrying only proposals like this one may omit the
    /// update path.
    pub fn allows_pathless_commit(&self) -> bool {
        matches!(self, Self::Add { .. } | Self::PreSharedKey { .. } | Self::ReInit { .. })
    }
}

/// Hash reference to a proposal sent in its own message.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalRef(Vec<u8>);

impl ProposalRef {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw reference bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ProposalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(8)];
        write!(f, "ProposalRef({}..)", hex::encode(shown))
    }
}

/// A proposal inside a commit: inline or by reference to a cached one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalOrRef {
    /// Inline proposal from the committer
    Proposal(Proposal),
    /// Reference to a previously received proposal
    Reference(ProposalRef),
}

impl From<Proposal> for ProposalOrRef {
    fn from(proposal: Proposal) -> Self {
        Self::Proposal(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_and_ranks() {
        let remove = Proposal::Remove { removed: LeafIndex::new(1) };
        assert_eq!(remove.proposal_type(), 3);
        assert!(!remove.allows_pathless_commit());

        let gce = Proposal::GroupContextExtensions { extensions: vec![] };
        let external = Proposal::ExternalInit { kem_output: vec![] };
        assert!(remove.application_rank() < gce.application_rank());
        assert!(gce.application_rank() < external.application_rank());
    }

    #[test]
    fn reference_debug_is_truncated() {
        let reference = ProposalRef::new(vec![0xab; 32]);
        assert_eq!(format!("{reference:?}"), "ProposalRef(abababababababab..)");
    }
}
