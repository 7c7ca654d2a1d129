//! Group state machine.
//!
//! ```text
//!   new_group / join ──► Active ──prepare_commit / process_commit──► Active
//!                          │
//!                          │ commit carrying ReInit
//!                          ▼
//!                      Suspended ──reinit_group──► Active (successor group)
//! ```
//!
//! States are values. Every operation borrows the current state and returns
//! a new one, so a rejected message leaves the caller holding the last good
//! state. Shared epoch data lives in [`GroupEpoch`], embedded in both
//! variants.

use std::collections::BTreeMap;

use arbor_crypto::{CipherSuite, HpkeCiphertext, Secret, SignaturePrivateKey, SignaturePublicKey};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{
    commit::{Commit, apply_path, decrypt_path, encrypt_path, generate_path},
    context::{GroupContext, confirmed_transcript_hash, interim_transcript_hash},
    framing::{AuthenticatedContent, Content, FramedContent, Sender, WireFormat},
    key_package::{KeyPackage, MemberIdentity},
    key_schedule::{EpochDerivation, KeySchedule},
    proposal::{Proposal, ProposalOrRef, ProposalRef},
    provider::Provider,
    psk::{PreSharedKeyId, Psk, PskChain, PskLookup, ResumptionUsage, psk_secret},
    validation::{Committer, ProposalEffects, ProposalValidator, ReInitTarget, SentProposal},
    welcome::{GroupInfo, GroupSecrets, Welcome},
};
use crate::{
    codec,
    config::{GroupConfig, RatchetConfig},
    constants::{DEFAULT_LIFETIME_SECS, MAX_EPOCH, PROTOCOL_VERSION},
    error::{CommitValidationError, GroupError, PskError, TreeError},
    extension::{self, Extension},
    secret_tree::MessageSecrets,
    tree::{
        LeafIndex, LeafNode, LeafNodeSource, Lifetime, RatchetTree, SourceKind,
        TreePrivateKeyStore,
    },
};

pub(crate) const EXTERNAL_INIT_LABEL: &str = "External Init";

/// One epoch of a group as seen by one member.
#[derive(Debug, Clone)]
pub struct GroupEpoch {
    pub(crate) context: GroupContext,
    pub(crate) tree: RatchetTree,
    pub(crate) key_schedule: KeySchedule,
    pub(crate) private_keys: TreePrivateKeyStore,
    pub(crate) confirmation_tag: Vec<u8>,
    pub(crate) own_leaf: LeafIndex,
    pub(crate) config: GroupConfig,
}

impl GroupEpoch {
    /// Group context of this epoch.
    pub fn context(&self) -> &GroupContext {
        &self.context
    }

    /// Public ratchet tree.
    pub fn tree(&self) -> &RatchetTree {
        &self.tree
    }

    /// Key schedule of this epoch.
    pub fn key_schedule(&self) -> &KeySchedule {
        &self.key_schedule
    }

    /// Epoch counter.
    pub fn epoch(&self) -> u64 {
        self.context.epoch
    }

    /// Group identifier.
    pub fn group_id(&self) -> &[u8] {
        &self.context.group_id
    }

    /// Leaf this member occupies.
    pub fn own_leaf(&self) -> LeafIndex {
        self.own_leaf
    }

    /// Number of occupied leaves.
    pub fn member_count(&self) -> usize {
        self.tree.member_count()
    }

    /// Local policy the group runs under.
    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Confirmation tag of the commit that created this epoch.
    pub fn confirmation_tag(&self) -> &[u8] {
        &self.confirmation_tag
    }

    /// Epoch authenticator, for out-of-band comparison.
    pub fn epoch_authenticator(&self) -> &Secret {
        self.key_schedule.epoch_authenticator()
    }

    /// Private keys held for tree nodes.
    pub fn private_keys(&self) -> &TreePrivateKeyStore {
        &self.private_keys
    }

    /// Exported secret for applications.
    pub fn export_secret(
        &self,
        provider: &Provider<'_>,
        label: &str,
        context: &[u8],
        len: usize,
    ) -> Result<Secret, GroupError> {
        let suite = provider.suite_for(&self.context)?;
        Ok(self.key_schedule.export_secret(suite, label, context, len)?)
    }

    /// Resumption PSK identifier naming this epoch.
    pub fn resumption_psk_id(&self, provider: &Provider<'_>, usage: ResumptionUsage) -> PreSharedKeyId {
        PreSharedKeyId::resumption(
            provider.suite,
            provider.env,
            usage,
            self.context.group_id.clone(),
            self.context.epoch,
        )
    }

    fn check_addressing(&self, content: &FramedContent) -> Result<(), GroupError> {
        if content.group_id != self.context.group_id {
            return Err(GroupError::WrongGroup);
        }
        if content.epoch != self.context.epoch {
            return Err(GroupError::Epoch { expected: self.context.epoch, actual: content.epoch });
        }
        Ok(())
    }

    fn validator<'a>(
        &'a self,
        suite: &'a dyn CipherSuite,
        provider: &Provider<'a>,
    ) -> ProposalValidator<'a> {
        ProposalValidator {
            suite,
            auth: provider.auth,
            context: &self.context,
            tree: &self.tree,
            now: provider.now(),
        }
    }

    fn group_info(
        &self,
        suite: &dyn CipherSuite,
        signer: &SignaturePrivateKey,
    ) -> Result<GroupInfo, GroupError> {
        let mut extensions = Vec::with_capacity(2);
        if self.config.include_tree_in_group_info {
            extensions.push(Extension::RatchetTree(self.tree.clone()));
        }
        extensions.push(Extension::ExternalPub(
            self.key_schedule.external_key_pair(suite)?.public_key,
        ));
        GroupInfo::sign(
            suite,
            self.context.clone(),
            extensions,
            self.confirmation_tag.clone(),
            self.own_leaf,
            signer,
        )
    }

    /// Key that signed a proposal from `sender`.
    fn proposal_signer<'s>(
        &'s self,
        sender: Sender,
        proposal: &'s Proposal,
    ) -> Result<&'s SignaturePublicKey, GroupError> {
        let invalid = GroupError::InvalidSender { context: "proposal" };
        match sender {
            Sender::Member(leaf) => {
                self.tree.leaf(leaf).map(|leaf| &leaf.signature_key).ok_or(invalid)
            },
            Sender::External(index) => usize::try_from(index)
                .ok()
                .and_then(|index| extension::external_senders(&self.context.extensions).get(index))
                .map(|sender| &sender.signature_key)
                .ok_or(invalid),
            Sender::NewMemberProposal => match proposal {
                Proposal::Add { key_package } => Ok(&key_package.leaf_node.signature_key),
                _ => Err(invalid),
            },
            Sender::NewMemberCommit => Err(invalid),
        }
    }
}

impl PskLookup for GroupEpoch {
    fn resolve(&self, id: &PreSharedKeyId) -> Result<Secret, PskError> {
        match &id.psk {
            Psk::Resumption { group_id, epoch, .. } => {
                if *group_id == self.context.group_id && *epoch == self.context.epoch {
                    Ok(self.key_schedule.resumption_psk().clone())
                } else {
                    Err(PskError::ResumptionUnavailable { epoch: *epoch })
                }
            },
            Psk::External { .. } => Err(PskError::UnknownPsk { id: id.describe() }),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedProposal {
    proposal: Proposal,
    sender: Sender,
}

/// A group this member can send and commit in.
#[derive(Debug, Clone)]
pub struct Active {
    epoch: GroupEpoch,
    signer: SignaturePrivateKey,
    proposals: BTreeMap<ProposalRef, CachedProposal>,
    pending_updates: TreePrivateKeyStore,
}

/// A group ended by a committed ReInit. It only answers PSK lookups and
/// starts the successor group.
#[derive(Debug, Clone)]
pub struct Suspended {
    epoch: GroupEpoch,
    reinit: ReInitTarget,
}

/// Top-level group state.
#[derive(Debug, Clone)]
pub enum GroupState {
    /// Accepting proposals and commits
    Active(Active),
    /// Ended by a reinit commit
    Suspended(Suspended),
}

/// Result of processing a commit.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// The commit was applied; this is the next epoch
    Applied(GroupState),
    /// The commit removed this member from the group.
    ///
    /// Signature, proposals and update path were verified. The confirmation
    /// tag needs the new epoch's secrets and is left to remaining members.
    Removed,
}

/// A commit ready to send, with the state to adopt once it is accepted.
#[derive(Debug, Clone)]
pub struct PreparedCommit {
    /// Committer's state in the new epoch
    pub state: GroupState,
    /// Signed commit with its confirmation tag
    pub commit: AuthenticatedContent,
    /// Group info for the new epoch
    pub group_info: GroupInfo,
    /// Invitation for added members, if any were added
    pub welcome: Option<Welcome>,
}

/// Secrets entering the key schedule for one commit.
pub(crate) struct CommitSecrets<'a> {
    pub init: &'a Secret,
    pub commit: &'a Secret,
    pub psk: &'a Secret,
}

/// Context, schedule and confirmation tag of the epoch a commit creates.
pub(crate) struct NextEpoch {
    pub context: GroupContext,
    pub derivation: EpochDerivation,
    pub confirmation_tag: Vec<u8>,
}

/// Evolve `old` through `commit` into the next epoch.
pub(crate) fn next_epoch(
    suite: &dyn CipherSuite,
    old: &GroupContext,
    tree: &RatchetTree,
    extensions: Vec<Extension>,
    commit: &AuthenticatedContent,
    secrets: &CommitSecrets<'_>,
    ratchet: RatchetConfig,
) -> Result<NextEpoch, GroupError> {
    let confirmed = confirmed_transcript_hash(suite, &old.interim_transcript_hash, commit)?;
    let mut context = old.successor(tree.tree_hash(suite)?, confirmed, extensions);
    let derivation = KeySchedule::advance(
        suite,
        secrets.init,
        secrets.commit,
        secrets.psk,
        &context,
        tree.leaf_count(),
        ratchet,
    )?;
    let confirmation_tag =
        derivation.schedule.confirmation_tag(suite, &context.confirmed_transcript_hash)?;
    context.interim_transcript_hash =
        interim_transcript_hash(suite, &context.confirmed_transcript_hash, &confirmation_tag)?;
    Ok(NextEpoch { context, derivation, confirmation_tag })
}

/// A commit whose proposals are applied, waiting for its path and
/// signature.
pub(crate) struct CommitPlan<'a> {
    pub old: &'a GroupContext,
    pub effects: ProposalEffects,
    pub committer: LeafIndex,
    pub sender: Sender,
    pub proposals: Vec<ProposalOrRef>,
    pub signer: &'a SignaturePrivateKey,
    pub init_secret: &'a Secret,
    pub include_path: bool,
    pub private_keys: TreePrivateKeyStore,
    pub config: GroupConfig,
}

/// Generate the path, sign, advance the schedule and package the result.
pub(crate) fn build_commit(
    suite: &dyn CipherSuite,
    provider: &Provider<'_>,
    psks: &dyn PskLookup,
    plan: CommitPlan<'_>,
) -> Result<PreparedCommit, GroupError> {
    let CommitPlan {
        old,
        mut effects,
        committer,
        sender,
        proposals,
        signer,
        init_secret,
        include_path,
        mut private_keys,
        config,
    } = plan;
    let exclude: Vec<LeafIndex> = effects.added.iter().map(|(leaf, _)| *leaf).collect();

    let (path, path_secrets) = if include_path {
        let secrets =
            generate_path(suite, provider.env, &mut effects.tree, committer, &old.group_id, signer)?;
        let provisional = old.successor(
            effects.tree.tree_hash(suite)?,
            old.confirmed_transcript_hash.clone(),
            effects.extensions.clone(),
        );
        let path = encrypt_path(
            suite,
            provider.env,
            &effects.tree,
            committer,
            &secrets,
            &exclude,
            &provisional.to_bytes()?,
        )?;
        (Some(path), Some(secrets))
    } else {
        (None, None)
    };

    let commit_secret = path_secrets
        .as_ref()
        .map_or_else(|| Secret::zero(suite.hash_len()), |secrets| secrets.commit_secret.clone());
    let psk_secret = psk_secret(suite, &effects.psks, psks)?;

    let content = FramedContent {
        group_id: old.group_id.clone(),
        epoch: old.epoch,
        sender,
        authenticated_data: Vec::new(),
        content: Content::Commit(Commit { proposals, path }),
    };
    let mut commit = AuthenticatedContent::sign(suite, WireFormat::PublicMessage, content, signer, old)?;
    let NextEpoch { context, derivation, confirmation_tag } = next_epoch(
        suite,
        old,
        &effects.tree,
        effects.extensions.clone(),
        &commit,
        &CommitSecrets { init: init_secret, commit: &commit_secret, psk: &psk_secret },
        config.ratchet,
    )?;
    commit.confirmation_tag = Some(confirmation_tag.clone());

    if let Some(secrets) = &path_secrets {
        private_keys.absorb(secrets.private_keys.clone());
    }
    private_keys.retain_reachable(suite, &effects.tree);

    let EpochDerivation { schedule, joiner_secret, welcome_secret } = derivation;
    let ProposalEffects { tree, added, psks: injected, reinit, .. } = effects;
    let epoch = GroupEpoch {
        context,
        tree,
        key_schedule: schedule,
        private_keys,
        confirmation_tag,
        own_leaf: committer,
        config,
    };
    let group_info = epoch.group_info(suite, signer)?;

    let welcome = if added.is_empty() {
        None
    } else {
        let recipients = added
            .iter()
            .map(|(leaf, key_package)| {
                let ancestor = committer.node().common_ancestor(leaf.node());
                let path_secret =
                    path_secrets.as_ref().and_then(|secrets| secrets.secret_for(ancestor)).cloned();
                let secrets = GroupSecrets {
                    joiner_secret: joiner_secret.clone(),
                    path_secret,
                    psks: injected.clone(),
                };
                (key_package, secrets)
            })
            .collect();
        Some(Welcome::seal(suite, provider.env, &welcome_secret, &group_info, recipients)?)
    };

    info!(
        epoch = epoch.context.epoch,
        members = epoch.tree.member_count(),
        added = added.len(),
        path = path_secrets.is_some(),
        "commit prepared"
    );

    let state = match reinit {
        Some(reinit) => GroupState::Suspended(Suspended { epoch, reinit }),
        None => GroupState::Active(Active::new(epoch, signer.clone())),
    };
    Ok(PreparedCommit { state, commit, group_info, welcome })
}

/// Create a one-member group at epoch 0.
pub fn new_group(
    provider: &Provider<'_>,
    identity: &MemberIdentity,
    group_id: Vec<u8>,
    mut extensions: Vec<Extension>,
    config: GroupConfig,
) -> Result<Active, GroupError> {
    let suite = provider.suite;
    let now = provider.now();
    let encryption = suite.derive_hpke_key_pair(&Zeroizing::new(
        provider.env.random_vec(suite.hash_len()),
    ))?;
    let leaf = LeafNode::sign(
        suite,
        identity.leaf_params(
            encryption.public_key.clone(),
            LeafNodeSource::KeyPackage {
                lifetime: Lifetime::starting_at(now, DEFAULT_LIFETIME_SECS),
            },
        ),
        &identity.signature_keys.private_key,
        None,
    )?;

    if let Some(required) = &config.required_capabilities
        && extension::required_capabilities(&extensions).is_none()
    {
        extensions.push(Extension::RequiredCapabilities(required.clone()));
    }

    let tree = RatchetTree::new(leaf);
    let mut context = GroupContext {
        version: PROTOCOL_VERSION,
        cipher_suite: suite.id(),
        group_id,
        epoch: 0,
        tree_hash: tree.tree_hash(suite)?,
        confirmed_transcript_hash: Vec::new(),
        interim_transcript_hash: Vec::new(),
        extensions,
    };
    let own = LeafIndex::new(0);
    let validator = ProposalValidator { suite, auth: provider.auth, context: &context, tree: &tree, now };
    validator.leaf_validator(&tree).validate(
        tree.leaf(own).ok_or(TreeError::BlankLeaf { leaf: 0 })?,
        Some(SourceKind::KeyPackage),
        Some(own),
    )?;

    let init_secret = Secret::from(provider.env.random_vec(suite.hash_len()));
    let zero = Secret::zero(suite.hash_len());
    let derivation =
        KeySchedule::advance(suite, &init_secret, &zero, &zero, &context, 1, config.ratchet)?;
    let confirmation_tag =
        derivation.schedule.confirmation_tag(suite, &context.confirmed_transcript_hash)?;
    context.interim_transcript_hash =
        interim_transcript_hash(suite, &context.confirmed_transcript_hash, &confirmation_tag)?;

    let mut private_keys = TreePrivateKeyStore::new();
    private_keys.insert(suite, &encryption.public_key, encryption.private_key);

    info!(group = %hex::encode(&context.group_id), suite = suite.id(), "group created");
    Ok(Active::new(
        GroupEpoch {
            context,
            tree,
            key_schedule: derivation.schedule,
            private_keys,
            confirmation_tag,
            own_leaf: own,
            config,
        },
        identity.signature_keys.private_key.clone(),
    ))
}

impl Active {
    pub(crate) fn new(epoch: GroupEpoch, signer: SignaturePrivateKey) -> Self {
        Self {
            epoch,
            signer,
            proposals: BTreeMap::new(),
            pending_updates: TreePrivateKeyStore::new(),
        }
    }

    /// Current epoch.
    pub fn epoch_state(&self) -> &GroupEpoch {
        &self.epoch
    }

    /// Number of proposals waiting to be committed.
    pub fn pending_proposals(&self) -> usize {
        self.proposals.len()
    }

    /// Signed group info for the current epoch, for external joiners.
    pub fn group_info(&self, provider: &Provider<'_>) -> Result<GroupInfo, GroupError> {
        let suite = provider.suite_for(&self.epoch.context)?;
        self.epoch.group_info(suite, &self.signer)
    }

    /// Exported secret for applications.
    pub fn export_secret(
        &self,
        provider: &Provider<'_>,
        label: &str,
        context: &[u8],
        len: usize,
    ) -> Result<Secret, GroupError> {
        self.epoch.export_secret(provider, label, context, len)
    }

    /// Sign `proposal` and cache it for a later commit.
    pub fn propose(
        &self,
        provider: &Provider<'_>,
        proposal: Proposal,
    ) -> Result<(Self, AuthenticatedContent), GroupError> {
        let context = &self.epoch.context;
        let suite = provider.suite_for(context)?;
        let sender = Sender::Member(self.epoch.own_leaf);
        let content = FramedContent {
            group_id: context.group_id.clone(),
            epoch: context.epoch,
            sender,
            authenticated_data: Vec::new(),
            content: Content::Proposal(proposal.clone()),
        };
        let message =
            AuthenticatedContent::sign(suite, WireFormat::PublicMessage, content, &self.signer, context)?;

        let mut next = self.clone();
        next.proposals.insert(message.proposal_ref(suite)?, CachedProposal { proposal, sender });
        Ok((next, message))
    }

    /// Propose a fresh encryption key for this member's leaf.
    ///
    /// The new private key is held until a commit covering the proposal is
    /// processed.
    pub fn propose_update(
        &self,
        provider: &Provider<'_>,
    ) -> Result<(Self, AuthenticatedContent), GroupError> {
        let suite = provider.suite_for(&self.epoch.context)?;
        let own = self.epoch.own_leaf;
        let current =
            self.epoch.tree.leaf(own).ok_or(TreeError::BlankLeaf { leaf: own.value() })?;
        let key_pair = suite.derive_hpke_key_pair(&Zeroizing::new(
            provider.env.random_vec(suite.hash_len()),
        ))?;
        let leaf_node = LeafNode::sign(
            suite,
            current.to_params(key_pair.public_key.clone(), LeafNodeSource::Update),
            &self.signer,
            Some((&self.epoch.context.group_id, own)),
        )?;

        let (mut next, message) = self.propose(provider, Proposal::Update { leaf_node })?;
        next.pending_updates.insert(suite, &key_pair.public_key, key_pair.private_key);
        Ok((next, message))
    }

    /// Verify and cache a proposal sent by someone else.
    pub fn receive_proposal(
        &self,
        provider: &Provider<'_>,
        message: &AuthenticatedContent,
    ) -> Result<(Self, ProposalRef), GroupError> {
        let suite = provider.suite_for(&self.epoch.context)?;
        self.epoch.check_addressing(&message.content)?;
        let Content::Proposal(proposal) = &message.content.content else {
            return Err(GroupError::UnexpectedContent { expected: "proposal" });
        };
        let sender = message.content.sender;
        let key = self.epoch.proposal_signer(sender, proposal)?;
        message.verify(suite, key, &self.epoch.context)?;

        let reference = message.proposal_ref(suite)?;
        debug!(
            epoch = self.epoch.context.epoch,
            sender = sender.kind(),
            proposal_type = proposal.proposal_type(),
            "proposal cached"
        );
        let mut next = self.clone();
        next.proposals
            .insert(reference.clone(), CachedProposal { proposal: proposal.clone(), sender });
        Ok((next, reference))
    }

    /// Build a commit over `proposals` (inline or cached references).
    ///
    /// The returned state is only valid once the commit is accepted by the
    /// group; until then the caller keeps this one.
    pub fn prepare_commit(
        &self,
        provider: &Provider<'_>,
        proposals: Vec<ProposalOrRef>,
    ) -> Result<PreparedCommit, GroupError> {
        let epoch = &self.epoch;
        let suite = provider.suite_for(&epoch.context)?;
        if epoch.context.epoch >= MAX_EPOCH {
            return Err(GroupError::EpochExhausted);
        }
        let own = epoch.own_leaf;
        let sent = self.resolve_proposals(&proposals, Sender::Member(own))?;
        let effects = epoch.validator(suite, provider).apply(&sent, Committer::Member(own))?;
        let include_path = effects.path_required || epoch.config.always_include_path;

        let psks = PskChain::new(vec![provider.psks, &self.epoch as &dyn PskLookup]);
        build_commit(suite, provider, &psks, CommitPlan {
            old: &epoch.context,
            effects,
            committer: own,
            sender: Sender::Member(own),
            proposals,
            signer: &self.signer,
            init_secret: epoch.key_schedule.init_secret(),
            include_path,
            private_keys: epoch.private_keys.clone(),
            config: epoch.config.clone(),
        })
    }

    /// Apply a commit sent by another member or an external joiner.
    pub fn process_commit(
        &self,
        provider: &Provider<'_>,
        message: &AuthenticatedContent,
    ) -> Result<CommitOutcome, GroupError> {
        self.apply_commit(provider, message).inspect_err(|err| {
            let epoch = self.epoch.context.epoch;
            if err.is_stale() {
                debug!(epoch, error = %err, "stale commit dropped");
            } else {
                warn!(epoch, sender = message.content.sender.kind(), error = %err, "commit rejected");
            }
        })
    }

    fn apply_commit(
        &self,
        provider: &Provider<'_>,
        message: &AuthenticatedContent,
    ) -> Result<CommitOutcome, GroupError> {
        let epoch = &self.epoch;
        let context = &epoch.context;
        let suite = provider.suite_for(context)?;
        let own = epoch.own_leaf;
        epoch.check_addressing(&message.content)?;
        if context.epoch >= MAX_EPOCH {
            return Err(GroupError::EpochExhausted);
        }
        let Content::Commit(commit) = &message.content.content else {
            return Err(GroupError::UnexpectedContent { expected: "commit" });
        };
        let tag = message.confirmation_tag.as_deref().ok_or(GroupError::MissingConfirmationTag)?;

        let (committer, signature_key) = match message.content.sender {
            Sender::Member(leaf) if leaf == own => return Err(GroupError::OwnCommit),
            Sender::Member(leaf) => {
                let committer = epoch
                    .tree
                    .leaf(leaf)
                    .ok_or(GroupError::InvalidSender { context: "commit" })?;
                (Committer::Member(leaf), &committer.signature_key)
            },
            Sender::NewMemberCommit => {
                let path = commit.path.as_ref().ok_or(CommitValidationError::MissingUpdatePath)?;
                (Committer::NewMember(&path.leaf_node), &path.leaf_node.signature_key)
            },
            Sender::External(_) | Sender::NewMemberProposal => {
                return Err(GroupError::InvalidSender { context: "commit" });
            },
        };
        message.verify(suite, signature_key, context)?;

        let sent = self.resolve_proposals(&commit.proposals, message.content.sender)?;
        let validator = epoch.validator(suite, provider);
        let mut effects = validator.apply(&sent, committer)?;
        let removed_self = sent
            .iter()
            .any(|sent| matches!(sent.proposal, Proposal::Remove { removed } if removed == own));

        let sender = match committer {
            Committer::Member(leaf) => leaf,
            Committer::NewMember(leaf) => effects.tree.insert_in_place(leaf.clone())?,
        };
        if effects.path_required && commit.path.is_none() {
            return Err(CommitValidationError::MissingUpdatePath.into());
        }

        let exclude: Vec<LeafIndex> = effects.added.iter().map(|(leaf, _)| *leaf).collect();
        if let Some(path) = &commit.path {
            validator.leaf_validator(&effects.tree).validate(
                &path.leaf_node,
                Some(SourceKind::Commit),
                Some(sender),
            )?;
            apply_path(suite, &mut effects.tree, sender, path, &exclude)?;
        }
        if tag.len() != suite.hash_len() {
            return Err(GroupError::ConfirmationTagMismatch);
        }

        // The path secret is sealed to remaining members only, so a removed
        // member stops short of the confirmation tag.
        if removed_self {
            info!(epoch = context.epoch, leaf = own.value(), "removed from group");
            return Ok(CommitOutcome::Removed);
        }

        let mut private_keys = epoch.private_keys.clone();
        private_keys.absorb(self.pending_updates.clone());
        let commit_secret = match &commit.path {
            Some(path) => {
                let provisional = context.successor(
                    effects.tree.tree_hash(suite)?,
                    context.confirmed_transcript_hash.clone(),
                    effects.extensions.clone(),
                );
                let (keys, commit_secret) = decrypt_path(
                    suite,
                    &effects.tree,
                    sender,
                    own,
                    path,
                    &exclude,
                    &private_keys,
                    &provisional.to_bytes()?,
                )?;
                private_keys.absorb(keys);
                commit_secret
            },
            None => Secret::zero(suite.hash_len()),
        };

        let init_secret = match &effects.external_init {
            Some(kem_output) => {
                let key_pair = epoch.key_schedule.external_key_pair(suite)?;
                let ciphertext: HpkeCiphertext = codec::decode(kem_output)?;
                Secret::from(suite.decrypt_with_label(
                    &key_pair.private_key,
                    EXTERNAL_INIT_LABEL,
                    &[],
                    &ciphertext,
                )?)
            },
            None => epoch.key_schedule.init_secret().clone(),
        };
        let psks = PskChain::new(vec![provider.psks, epoch as &dyn PskLookup]);
        let psk_secret = psk_secret(suite, &effects.psks, &psks)?;

        let next = next_epoch(
            suite,
            context,
            &effects.tree,
            effects.extensions.clone(),
            message,
            &CommitSecrets { init: &init_secret, commit: &commit_secret, psk: &psk_secret },
            epoch.config.ratchet,
        )?;
        next.derivation.schedule.verify_confirmation_tag(
            suite,
            &next.context.confirmed_transcript_hash,
            tag,
        )?;
        private_keys.retain_reachable(suite, &effects.tree);

        let advanced = GroupEpoch {
            context: next.context,
            tree: effects.tree,
            key_schedule: next.derivation.schedule,
            private_keys,
            confirmation_tag: next.confirmation_tag,
            own_leaf: own,
            config: epoch.config.clone(),
        };
        info!(
            epoch = advanced.context.epoch,
            members = advanced.tree.member_count(),
            committer = sender.value(),
            "commit processed"
        );

        let state = match effects.reinit {
            Some(reinit) => GroupState::Suspended(Suspended { epoch: advanced, reinit }),
            None => GroupState::Active(Self::new(advanced, self.signer.clone())),
        };
        Ok(CommitOutcome::Applied(state))
    }

    /// Start a new group from a subset of this one, bound to it by a branch
    /// resumption PSK.
    pub fn branch_group(
        &self,
        provider: &Provider<'_>,
        identity: &MemberIdentity,
        group_id: Vec<u8>,
        members: Vec<KeyPackage>,
        config: GroupConfig,
    ) -> Result<PreparedCommit, GroupError> {
        provider.suite_for(&self.epoch.context)?;
        let extensions = self.epoch.context.extensions.clone();
        resume(provider, &self.epoch, identity, ResumptionUsage::Branch, group_id, extensions, members, config)
    }

    /// Next key to encrypt an application message with.
    pub fn next_application_key(&self, provider: &Provider<'_>) -> Result<MessageSecrets, GroupError> {
        let suite = provider.suite_for(&self.epoch.context)?;
        Ok(self.epoch.key_schedule.secret_tree().application(self.epoch.own_leaf)?.next(suite)?)
    }

    /// Next key to encrypt a handshake message with.
    pub fn next_handshake_key(&self, provider: &Provider<'_>) -> Result<MessageSecrets, GroupError> {
        let suite = provider.suite_for(&self.epoch.context)?;
        Ok(self.epoch.key_schedule.secret_tree().handshake(self.epoch.own_leaf)?.next(suite)?)
    }

    /// Key for `sender`'s application message at `generation`.
    pub fn application_key_for(
        &self,
        provider: &Provider<'_>,
        sender: LeafIndex,
        generation: u32,
    ) -> Result<MessageSecrets, GroupError> {
        let suite = provider.suite_for(&self.epoch.context)?;
        Ok(self.epoch.key_schedule.secret_tree().application(sender)?.get(suite, generation)?)
    }

    /// Key for `sender`'s handshake message at `generation`.
    pub fn handshake_key_for(
        &self,
        provider: &Provider<'_>,
        sender: LeafIndex,
        generation: u32,
    ) -> Result<MessageSecrets, GroupError> {
        let suite = provider.suite_for(&self.epoch.context)?;
        Ok(self.epoch.key_schedule.secret_tree().handshake(sender)?.get(suite, generation)?)
    }

    fn resolve_proposals(
        &self,
        proposals: &[ProposalOrRef],
        inline_sender: Sender,
    ) -> Result<Vec<SentProposal>, GroupError> {
        proposals
            .iter()
            .map(|entry| match entry {
                ProposalOrRef::Proposal(proposal) => Ok(SentProposal {
                    proposal: proposal.clone(),
                    sender: inline_sender,
                    by_reference: false,
                }),
                ProposalOrRef::Reference(reference) => self
                    .proposals
                    .get(reference)
                    .map(|cached| SentProposal {
                        proposal: cached.proposal.clone(),
                        sender: cached.sender,
                        by_reference: true,
                    })
                    .ok_or_else(|| CommitValidationError::UnknownProposalRef.into()),
            })
            .collect()
    }
}

impl Suspended {
    /// Final epoch of the group.
    pub fn epoch_state(&self) -> &GroupEpoch {
        &self.epoch
    }

    /// Parameters of the successor group.
    pub fn reinit_target(&self) -> &ReInitTarget {
        &self.reinit
    }

    /// Create the successor group and invite `members` into it.
    ///
    /// `provider` must carry the successor's cipher suite.
    pub fn reinit_group(
        &self,
        provider: &Provider<'_>,
        identity: &MemberIdentity,
        members: Vec<KeyPackage>,
        config: GroupConfig,
    ) -> Result<PreparedCommit, GroupError> {
        let target = &self.reinit;
        if provider.suite.id() != target.cipher_suite {
            return Err(GroupError::CipherSuiteMismatch {
                expected: target.cipher_suite,
                actual: provider.suite.id(),
            });
        }
        resume(
            provider,
            &self.epoch,
            identity,
            ResumptionUsage::ReInit,
            target.group_id.clone(),
            target.extensions.clone(),
            members,
            config,
        )
    }
}

/// New group whose first commit adds `members` and injects the resumption
/// PSK of `prior`.
#[allow(clippy::too_many_arguments)]
fn resume(
    provider: &Provider<'_>,
    prior: &GroupEpoch,
    identity: &MemberIdentity,
    usage: ResumptionUsage,
    group_id: Vec<u8>,
    extensions: Vec<Extension>,
    members: Vec<KeyPackage>,
    config: GroupConfig,
) -> Result<PreparedCommit, GroupError> {
    let group = new_group(provider, identity, group_id, extensions, config)?;
    let psk = prior.resumption_psk_id(provider, usage);
    let mut proposals: Vec<ProposalOrRef> =
        members.into_iter().map(|key_package| Proposal::Add { key_package }.into()).collect();
    proposals.push(Proposal::PreSharedKey { psk }.into());

    debug!(
        prior_epoch = prior.context.epoch,
        usage = ?usage,
        members = proposals.len() - 1,
        "resuming into new group"
    );
    let psks = PskChain::new(vec![provider.psks, prior as &dyn PskLookup]);
    group.prepare_commit(&provider.with_psks(&psks), proposals)
}

impl GroupState {
    /// Epoch data common to both variants.
    pub fn epoch_state(&self) -> &GroupEpoch {
        match self {
            Self::Active(active) => &active.epoch,
            Self::Suspended(suspended) => &suspended.epoch,
        }
    }

    /// Whether the group still accepts commits.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    /// The active state, or `Suspended`.
    pub fn into_active(self) -> Result<Active, GroupError> {
        match self {
            Self::Active(active) => Ok(active),
            Self::Suspended(_) => Err(GroupError::Suspended),
        }
    }

    /// The suspended state, or `NotSuspended`.
    pub fn into_suspended(self) -> Result<Suspended, GroupError> {
        match self {
            Self::Suspended(suspended) => Ok(suspended),
            Self::Active(_) => Err(GroupError::NotSuspended),
        }
    }

    /// Build a commit; fails with `Suspended` after a reinit.
    pub fn prepare_commit(
        &self,
        provider: &Provider<'_>,
        proposals: Vec<ProposalOrRef>,
    ) -> Result<PreparedCommit, GroupError> {
        match self {
            Self::Active(active) => active.prepare_commit(provider, proposals),
            Self::Suspended(_) => Err(GroupError::Suspended),
        }
    }

    /// Apply a received commit; fails with `Suspended` after a reinit.
    pub fn process_commit(
        &self,
        provider: &Provider<'_>,
        message: &AuthenticatedContent,
    ) -> Result<CommitOutcome, GroupError> {
        match self {
            Self::Active(active) => active.process_commit(provider, message),
            Self::Suspended(_) => Err(GroupError::Suspended),
        }
    }
}

impl PskLookup for GroupState {
    fn resolve(&self, id: &PreSharedKeyId) -> Result<Secret, PskError> {
        self.epoch_state().resolve(id)
    }
}

impl PskLookup for Active {
    fn resolve(&self, id: &PreSharedKeyId) -> Result<Secret, PskError> {
        self.epoch.resolve(id)
    }
}

impl PskLookup for Suspended {
    fn resolve(&self, id: &PreSharedKeyId) -> Result<Secret, PskError> {
        self.epoch.resolve(id)
    }
}
