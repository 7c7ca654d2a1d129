//! Joining a group: by welcome, or by external commit.

use arbor_crypto::Secret;
use tracing::info;
use zeroize::Zeroizing;

use super::{
    commit::derive_path_keys,
    context::interim_transcript_hash,
    key_package::KeyPackageBundle,
    key_schedule::KeySchedule,
    proposal::{Proposal, ProposalOrRef},
    provider::Provider,
    psk::psk_secret,
    state::{Active, CommitPlan, EXTERNAL_INIT_LABEL, GroupEpoch, PreparedCommit, build_commit},
    validation::{Committer, ProposalValidator, SentProposal},
    welcome::{GroupInfo, Welcome},
};
use crate::{
    codec,
    config::GroupConfig,
    error::GroupError,
    tree::{NodeIndex, RatchetTree, SourceKind, TreePrivateKeyStore, check_tree},
};

impl Welcome {
    /// Join the group this welcome invites `bundle` into.
    ///
    /// `tree` is required when the group info does not embed the ratchet
    /// tree. PSKs named by the welcome are resolved through the provider.
    pub fn join_group(
        &self,
        provider: &Provider<'_>,
        bundle: &KeyPackageBundle,
        tree: Option<RatchetTree>,
        config: GroupConfig,
    ) -> Result<Active, GroupError> {
        let suite = provider.suite;
        if self.cipher_suite != suite.id() {
            return Err(GroupError::CipherSuiteMismatch {
                expected: self.cipher_suite,
                actual: suite.id(),
            });
        }
        let secrets = self.open_secrets(suite, bundle)?;
        let psk_secret = psk_secret(suite, &secrets.psks, provider.psks)?;
        let welcome_secret = KeySchedule::welcome_secret(suite, &secrets.joiner_secret, &psk_secret)?;
        let group_info = self.open_group_info(suite, &welcome_secret)?;
        let context = group_info.group_context.clone();
        provider.suite_for(&context)?;

        let tree = tree
            .or_else(|| group_info.ratchet_tree().cloned())
            .ok_or(GroupError::MissingRatchetTree)?;
        group_info.verify(suite, &tree)?;
        check_tree(suite, provider.auth, &tree, &context, provider.now())?;

        let own_leaf_node = &bundle.key_package.leaf_node;
        let own = tree
            .find_leaf(|leaf| {
                leaf.encryption_key == own_leaf_node.encryption_key
                    && leaf.signature_key == own_leaf_node.signature_key
            })
            .ok_or(GroupError::NotAMember)?;

        let (key_schedule, _) = KeySchedule::from_joiner(
            suite,
            &secrets.joiner_secret,
            &psk_secret,
            &context,
            tree.leaf_count(),
            config.ratchet,
        )?;
        key_schedule.verify_confirmation_tag(
            suite,
            &context.confirmed_transcript_hash,
            &group_info.confirmation_tag,
        )?;
        let interim = interim_transcript_hash(
            suite,
            &context.confirmed_transcript_hash,
            &group_info.confirmation_tag,
        )?;
        if interim != context.interim_transcript_hash {
            return Err(GroupError::TranscriptMismatch);
        }

        let mut private_keys = TreePrivateKeyStore::new();
        private_keys.insert(
            suite,
            &own_leaf_node.encryption_key,
            bundle.encryption_private_key.clone(),
        );
        if let Some(path_secret) = &secrets.path_secret {
            let ancestor = own.node().common_ancestor(group_info.signer.node());
            let nodes: Vec<NodeIndex> = tree
                .filtered_direct_path(group_info.signer)
                .into_iter()
                .skip_while(|node| *node != ancestor)
                .collect();
            let (keys, _) = derive_path_keys(suite, &tree, &nodes, path_secret.clone())?;
            private_keys.absorb(keys);
        }

        info!(
            epoch = context.epoch,
            leaf = own.value(),
            members = tree.member_count(),
            "joined group by welcome"
        );
        Ok(Active::new(
            GroupEpoch {
                context,
                tree,
                key_schedule,
                private_keys,
                confirmation_tag: group_info.confirmation_tag,
                own_leaf: own,
                config,
            },
            bundle.signature_private_key.clone(),
        ))
    }
}

impl GroupInfo {
    /// Join the described group by external commit.
    ///
    /// With `resync`, the joiner's previous leaf (same client per the
    /// authentication service) is removed in the same commit. The returned
    /// commit must be delivered to the group; the state is the joiner's
    /// view of the new epoch.
    pub fn join_group_external(
        &self,
        provider: &Provider<'_>,
        bundle: &KeyPackageBundle,
        tree: Option<RatchetTree>,
        resync: bool,
        config: GroupConfig,
    ) -> Result<PreparedCommit, GroupError> {
        let context = &self.group_context;
        let suite = provider.suite_for(context)?;
        let tree = tree
            .or_else(|| self.ratchet_tree().cloned())
            .ok_or(GroupError::MissingRatchetTree)?;
        self.verify(suite, &tree)?;
        check_tree(suite, provider.auth, &tree, context, provider.now())?;
        let external_pub = self.external_pub().ok_or(GroupError::MissingExternalPub)?;

        let init_secret = Secret::from(provider.env.random_vec(suite.hash_len()));
        let kem_output = codec::encode(&suite.encrypt_with_label(
            external_pub,
            EXTERNAL_INIT_LABEL,
            &[],
            init_secret.as_bytes(),
            &Zeroizing::new(provider.env.random_vec(suite.hash_len())),
        )?)?;

        let joiner = &bundle.key_package.leaf_node;
        let committer = Committer::NewMember(joiner);
        let mut proposals = vec![Proposal::ExternalInit { kem_output }];
        if resync
            && let Some(previous) = tree
                .find_leaf(|leaf| provider.auth.is_same_client(&leaf.credential, &joiner.credential))
        {
            proposals.push(Proposal::Remove { removed: previous });
        }
        let sent: Vec<SentProposal> = proposals
            .iter()
            .map(|proposal| SentProposal {
                proposal: proposal.clone(),
                sender: committer.sender(),
                by_reference: false,
            })
            .collect();

        let validator = ProposalValidator {
            suite,
            auth: provider.auth,
            context,
            tree: &tree,
            now: provider.now(),
        };
        let mut effects = validator.apply(&sent, committer)?;
        validator.leaf_validator(&effects.tree).validate(joiner, Some(SourceKind::KeyPackage), None)?;
        let own = effects.tree.insert_in_place(joiner.clone())?;

        info!(epoch = context.epoch, leaf = own.value(), resync, "joining group by external commit");
        build_commit(suite, provider, provider.psks, CommitPlan {
            old: context,
            effects,
            committer: own,
            sender: committer.sender(),
            proposals: proposals.into_iter().map(ProposalOrRef::from).collect(),
            signer: &bundle.signature_private_key,
            init_secret: &init_secret,
            include_path: true,
            private_keys: TreePrivateKeyStore::new(),
            config,
        })
    }
}
