//! Proposal list validation and application.
//!
//! A commit's proposal list is checked as a whole first (who may send what,
//! duplicates, conflicts), then applied to a copy of the tree in the fixed
//! order updates, removes, adds, PSKs, context extensions, external init,
//! reinit. Nothing observable changes until every proposal has applied.

use std::collections::BTreeSet;

use arbor_crypto::{CipherSuite, CipherSuiteId};
use tracing::debug;

use super::{
    context::GroupContext,
    framing::Sender,
    key_package::KeyPackage,
    proposal::Proposal,
    psk::PreSharedKeyId,
};
use crate::{
    auth::AuthenticationService,
    error::{CommitValidationError, GroupError, LeafNodeCheckError, PskError},
    extension::{Extension, required_capabilities},
    tree::{LeafIndex, LeafNode, LeafNodeValidator, RatchetTree, SourceKind},
};

/// Parameters of the group that replaces a re-initialized one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReInitTarget {
    /// Successor group identifier
    pub group_id: Vec<u8>,
    /// Successor protocol version
    pub version: u16,
    /// Successor cipher suite
    pub cipher_suite: CipherSuiteId,
    /// Successor group context extensions
    pub extensions: Vec<Extension>,
}

/// Author of the commit under validation.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Committer<'a> {
    /// Existing member at a leaf
    Member(LeafIndex),
    /// External joiner presenting this leaf
    NewMember(&'a LeafNode),
}

impl Committer<'_> {
    /// Sender recorded on the committer's inline proposals.
    pub fn sender(&self) -> Sender {
        match self {
            Self::Member(leaf) => Sender::Member(*leaf),
            Self::NewMember(_) => Sender::NewMemberCommit,
        }
    }
}

/// A proposal with the sender it arrived from.
#[derive(Debug, Clone)]
pub(crate) struct SentProposal {
    pub proposal: Proposal,
    pub sender: Sender,
    pub by_reference: bool,
}

/// Outcome of applying a proposal list.
#[derive(Debug, Clone)]
pub(crate) struct ProposalEffects {
    pub tree: RatchetTree,
    pub extensions: Vec<Extension>,
    pub psks: Vec<PreSharedKeyId>,
    pub added: Vec<(LeafIndex, KeyPackage)>,
    pub external_init: Option<Vec<u8>>,
    pub reinit: Option<ReInitTarget>,
    pub path_required: bool,
}

/// Validates proposals against one epoch.
pub(crate) struct ProposalValidator<'a> {
    pub suite: &'a dyn CipherSuite,
    pub auth: &'a dyn AuthenticationService,
    pub context: &'a GroupContext,
    pub tree: &'a RatchetTree,
    pub now: u64,
}

impl ProposalValidator<'_> {
    /// Check the list as a whole, without touching the tree.
    pub fn check_list(
        &self,
        proposals: &[SentProposal],
        committer: Committer<'_>,
    ) -> Result<(), CommitValidationError> {
        let mut updated = BTreeSet::new();
        let mut removed = BTreeSet::new();
        let mut psks = BTreeSet::new();
        let mut added: Vec<&KeyPackage> = Vec::new();
        let (mut gce, mut reinit, mut external_init) = (0usize, 0usize, 0usize);

        for sent in proposals {
            check_sender(sent, committer)?;
            match &sent.proposal {
                Proposal::Update { .. } => {
                    let Sender::Member(leaf) = sent.sender else {
                        return Err(invalid_sender(sent));
                    };
                    if matches!(committer, Committer::Member(own) if own == leaf) {
                        return Err(CommitValidationError::CommitterSelfUpdate);
                    }
                    if !updated.insert(leaf) {
                        return Err(CommitValidationError::DuplicateUpdate { leaf: leaf.value() });
                    }
                },
                Proposal::Remove { removed: leaf } => {
                    if matches!(committer, Committer::Member(own) if own == *leaf) {
                        return Err(CommitValidationError::CommitterSelfRemove);
                    }
                    if !removed.insert(*leaf) {
                        return Err(CommitValidationError::DuplicateRemove { leaf: leaf.value() });
                    }
                },
                Proposal::Add { key_package } => {
                    let new = &key_package.leaf_node;
                    let duplicate = added.iter().any(|other| {
                        other.leaf_node.signature_key == new.signature_key
                            || self.auth.is_same_client(&other.leaf_node.credential, &new.credential)
                    });
                    if duplicate {
                        return Err(CommitValidationError::DuplicateAdd);
                    }
                    added.push(key_package);
                },
                Proposal::PreSharedKey { psk } => {
                    if !psks.insert(&psk.psk) {
                        return Err(CommitValidationError::DuplicatePsk);
                    }
                },
                Proposal::GroupContextExtensions { .. } => gce += 1,
                Proposal::ReInit { .. } => reinit += 1,
                Proposal::ExternalInit { .. } => external_init += 1,
            }
        }

        if let Some(leaf) = updated.intersection(&removed).next() {
            return Err(CommitValidationError::UpdateAndRemove { leaf: leaf.value() });
        }
        if gce > 1 {
            return Err(CommitValidationError::MultipleGroupContextExtensions);
        }
        if reinit > 1 {
            return Err(CommitValidationError::MultipleReInit);
        }
        if reinit == 1 && proposals.len() > 1 {
            return Err(CommitValidationError::ReInitWithOtherProposals);
        }

        if let Committer::NewMember(_) = committer {
            let external = |reason| CommitValidationError::InvalidExternalCommit { reason };
            if external_init != 1 {
                return Err(external("exactly one external init is required"));
            }
            if removed.len() > 1 {
                return Err(external("at most one remove is allowed"));
            }
            if proposals.iter().any(|sent| sent.by_reference) {
                return Err(external("proposals must be sent inline"));
            }
        }
        Ok(())
    }

    /// Check and then apply `proposals` to a copy of the tree.
    pub fn apply(
        &self,
        proposals: &[SentProposal],
        committer: Committer<'_>,
    ) -> Result<ProposalEffects, GroupError> {
        self.check_list(proposals, committer)?;

        let mut ordered: Vec<&SentProposal> = proposals.iter().collect();
        ordered.sort_by_key(|sent| sent.proposal.application_rank());

        let mut effects = ProposalEffects {
            tree: self.tree.clone(),
            extensions: self.context.extensions.clone(),
            psks: Vec::new(),
            added: Vec::new(),
            external_init: None,
            reinit: None,
            path_required: proposals.is_empty()
                || matches!(committer, Committer::NewMember(_))
                || proposals.iter().any(|sent| !sent.proposal.allows_pathless_commit()),
        };

        for sent in ordered {
            match &sent.proposal {
                Proposal::Update { leaf_node } => {
                    let Sender::Member(leaf) = sent.sender else {
                        return Err(invalid_sender(sent).into());
                    };
                    let current = effects
                        .tree
                        .leaf(leaf)
                        .ok_or(CommitValidationError::UnknownMember { leaf: leaf.value() })?;
                    if current.encryption_key == leaf_node.encryption_key {
                        return Err(CommitValidationError::UpdateShouldChangeEncryptionKey.into());
                    }
                    self.leaf_validator(&effects.tree).validate(
                        leaf_node,
                        Some(SourceKind::Update),
                        Some(leaf),
                    )?;
                    effects.tree.update_in_place(leaf, leaf_node.clone())?;
                },
                Proposal::Remove { removed } => {
                    let target = effects
                        .tree
                        .leaf(*removed)
                        .ok_or(CommitValidationError::UnknownMember { leaf: removed.value() })?;
                    if let Committer::NewMember(joiner) = committer
                        && !self.auth.is_same_client(&target.credential, &joiner.credential)
                    {
                        return Err(CommitValidationError::InvalidExternalCommit {
                            reason: "remove must target the joiner's previous leaf",
                        }
                        .into());
                    }
                    effects.tree.remove_in_place(*removed)?;
                },
                Proposal::Add { key_package } => {
                    self.check_key_package(key_package)?;
                    let new = &key_package.leaf_node;
                    if let Some((existing, _)) = effects
                        .tree
                        .leaves()
                        .find(|(_, leaf)| self.auth.is_same_client(&leaf.credential, &new.credential))
                    {
                        return Err(
                            CommitValidationError::AlreadyMember { leaf: existing.value() }.into()
                        );
                    }
                    self.leaf_validator(&effects.tree).validate(
                        new,
                        Some(SourceKind::KeyPackage),
                        None,
                    )?;
                    let leaf = effects.tree.insert_in_place(new.clone())?;
                    effects.added.push((leaf, key_package.clone()));
                },
                Proposal::PreSharedKey { psk } => {
                    let expected = self.suite.hash_len();
                    if psk.psk_nonce.len() != expected {
                        return Err(PskError::InvalidNonce {
                            expected,
                            actual: psk.psk_nonce.len(),
                        }
                        .into());
                    }
                    effects.psks.push(psk.clone());
                },
                Proposal::GroupContextExtensions { extensions } => {
                    check_members_support(&effects.tree, extensions)?;
                    effects.extensions.clone_from(extensions);
                },
                Proposal::ExternalInit { kem_output } => {
                    effects.external_init = Some(kem_output.clone());
                },
                Proposal::ReInit { group_id, version, cipher_suite, extensions } => {
                    if *version < self.context.version {
                        return Err(CommitValidationError::ReInitDowngrade {
                            current: self.context.version,
                            proposed: *version,
                        }
                        .into());
                    }
                    effects.reinit = Some(ReInitTarget {
                        group_id: group_id.clone(),
                        version: *version,
                        cipher_suite: *cipher_suite,
                        extensions: extensions.clone(),
                    });
                },
            }
        }

        debug!(
            proposals = proposals.len(),
            added = effects.added.len(),
            path_required = effects.path_required,
            "proposals applied"
        );
        Ok(effects)
    }

    /// Checks on a key package that do not depend on the tree.
    pub fn check_key_package(&self, key_package: &KeyPackage) -> Result<(), CommitValidationError> {
        key_package.verify_signature(self.suite)?;
        if key_package.version != self.context.version
            || key_package.cipher_suite != self.context.cipher_suite
        {
            return Err(CommitValidationError::KeyPackageMismatch {
                version: key_package.version,
                cipher_suite: key_package.cipher_suite,
            });
        }
        if key_package.init_key == key_package.leaf_node.encryption_key {
            return Err(CommitValidationError::InitKeyReuse);
        }
        Ok(())
    }

    /// Leaf validator for `tree` under this epoch's context.
    pub fn leaf_validator<'t>(&'t self, tree: &'t RatchetTree) -> LeafNodeValidator<'t> {
        LeafNodeValidator {
            suite: self.suite,
            auth: self.auth,
            group_id: &self.context.group_id,
            version: self.context.version,
            cipher_suite: self.context.cipher_suite,
            extensions: &self.context.extensions,
            tree,
            now: self.now,
        }
    }
}

fn invalid_sender(sent: &SentProposal) -> CommitValidationError {
    CommitValidationError::InvalidProposalSender {
        proposal_type: sent.proposal.proposal_type(),
        sender: sent.sender.kind(),
    }
}

/// Which sender kinds may send which proposal types.
fn check_sender(sent: &SentProposal, committer: Committer<'_>) -> Result<(), CommitValidationError> {
    let allowed = match (&sent.proposal, sent.sender) {
        (Proposal::ExternalInit { .. }, Sender::Member(_)) => {
            return Err(CommitValidationError::ExternalInitFromMember);
        },
        (Proposal::Update { .. }, Sender::Member(_))
        | (Proposal::Add { .. }, Sender::Member(_) | Sender::External(_) | Sender::NewMemberProposal)
        | (
            Proposal::Remove { .. }
            | Proposal::PreSharedKey { .. }
            | Proposal::ReInit { .. }
            | Proposal::GroupContextExtensions { .. },
            Sender::Member(_) | Sender::External(_),
        ) => true,
        (
            Proposal::ExternalInit { .. } | Proposal::Remove { .. } | Proposal::PreSharedKey { .. },
            Sender::NewMemberCommit,
        ) => matches!(committer, Committer::NewMember(_)),
        _ => false,
    };
    if allowed { Ok(()) } else { Err(invalid_sender(sent)) }
}

/// Every member must understand new group context extensions and meet any
/// capabilities they require.
fn check_members_support(
    tree: &RatchetTree,
    extensions: &[Extension],
) -> Result<(), CommitValidationError> {
    for (index, leaf) in tree.leaves() {
        let caps = &leaf.capabilities;
        for ext in extensions {
            if !caps.supports_extension(ext.extension_type()) {
                return Err(CommitValidationError::UnsupportedGroupExtension {
                    leaf: index.value(),
                    extension_type: ext.extension_type(),
                });
            }
        }
        let Some(required) = required_capabilities(extensions) else {
            continue;
        };
        let missing = |kind, value| {
            CommitValidationError::LeafNode(LeafNodeCheckError::MissingRequiredCapability {
                kind,
                value,
            })
        };
        if let Some(ext) = required.extension_types.iter().find(|t| !caps.supports_extension(**t)) {
            return Err(missing("extension", *ext));
        }
        if let Some(p) = required.proposal_types.iter().find(|t| !caps.supports_proposal(**t)) {
            return Err(missing("proposal", *p));
        }
        if let Some(c) = required.credential_types.iter().find(|t| !caps.credentials.contains(*t)) {
            return Err(missing("credential", *c));
        }
    }
    Ok(())
}
