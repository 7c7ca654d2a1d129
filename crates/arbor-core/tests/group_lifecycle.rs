//! End-to-end group lifecycle across several members.
//!
//! Every member runs against the same seeded environment, so failures
//! reproduce byte for byte. The invariant checked throughout: members that
//! processed the same commits hold identical group contexts and epoch
//! authenticators.

use arbor_core::{
    BasicAuthenticationService, GroupConfig, GroupError,
    env::test_utils::{MOCK_NOW, MockEnv},
    group::{
        Active, CommitOutcome, GroupState, KeyPackage, KeyPackageBundle, MemberIdentity,
        PreparedCommit, Proposal, ProposalOrRef, Provider, new_group,
    },
    tree::{Credential, LeafIndex, Lifetime},
};
use arbor_crypto::Curve25519ChaCha;
use tracing_subscriber::{EnvFilter, fmt};

struct World {
    suite: Curve25519ChaCha,
    env: MockEnv,
    auth: BasicAuthenticationService,
}

/// Log output for failing runs, filtered by `RUST_LOG`.
fn init_tracing() {
    let _ = fmt().with_env_filter(EnvFilter::from_default_env()).with_test_writer().try_init();
}

impl World {
    fn new(seed: u64) -> Self {
        init_tracing();
        Self {
            suite: Curve25519ChaCha::new(),
            env: MockEnv::seeded(seed),
            auth: BasicAuthenticationService::new(),
        }
    }

    fn provider(&self) -> Provider<'_> {
        Provider::new(&self.suite, &self.env, &self.auth)
    }

    fn identity(&self, name: &str) -> MemberIdentity {
        MemberIdentity::generate(&self.suite, &self.env, Credential::basic(name))
            .expect("identity generation")
    }

    fn key_package(&self, identity: &MemberIdentity) -> KeyPackageBundle {
        KeyPackage::generate(
            &self.suite,
            &self.env,
            identity,
            Lifetime::starting_at(MOCK_NOW - 60, 3_600),
        )
        .expect("key package generation")
    }

    fn create(&self, creator: &MemberIdentity) -> Active {
        new_group(&self.provider(), creator, b"lifecycle".to_vec(), vec![], GroupConfig::default())
            .expect("group creation")
    }
}

fn add(bundle: &KeyPackageBundle) -> ProposalOrRef {
    Proposal::Add { key_package: bundle.key_package.clone() }.into()
}

fn applied(outcome: CommitOutcome) -> GroupState {
    match outcome {
        CommitOutcome::Applied(state) => state,
        CommitOutcome::Removed => panic!("member unexpectedly removed"),
    }
}

fn active(prepared: PreparedCommit) -> Active {
    prepared.state.into_active().expect("committer stays active")
}

fn assert_in_sync(a: &Active, b: &Active) {
    let (a, b) = (a.epoch_state(), b.epoch_state());
    assert_eq!(a.context(), b.context());
    assert_eq!(a.epoch_authenticator(), b.epoch_authenticator());
    assert_eq!(a.tree(), b.tree());
}

/// Alice, Bob and Carol in one group at epoch 2.
fn three_members(world: &World) -> (Active, Active, Active) {
    let provider = world.provider();
    let alice = world.create(&world.identity("alice"));

    let bob_kp = world.key_package(&world.identity("bob"));
    let prepared = alice.prepare_commit(&provider, vec![add(&bob_kp)]).expect("add bob");
    let welcome = prepared.welcome.clone().expect("welcome for bob");
    let alice = active(prepared);
    let bob = welcome
        .join_group(&provider, &bob_kp, None, GroupConfig::default())
        .expect("bob joins");

    let carol_kp = world.key_package(&world.identity("carol"));
    let prepared = alice.prepare_commit(&provider, vec![add(&carol_kp)]).expect("add carol");
    let welcome = prepared.welcome.clone().expect("welcome for carol");
    let bob = applied(bob.process_commit(&provider, &prepared.commit).expect("bob processes"))
        .into_active()
        .expect("bob active");
    let alice = active(prepared);
    let carol = welcome
        .join_group(&provider, &carol_kp, None, GroupConfig::default())
        .expect("carol joins");

    (alice, bob, carol)
}

#[test]
fn welcome_joiner_matches_committer() {
    let world = World::new(1);
    let provider = world.provider();
    let alice = world.create(&world.identity("alice"));
    let bob_kp = world.key_package(&world.identity("bob"));

    let prepared = alice.prepare_commit(&provider, vec![add(&bob_kp)]).unwrap();
    let welcome = prepared.welcome.clone().unwrap();
    let alice = active(prepared);
    let bob = welcome.join_group(&provider, &bob_kp, None, GroupConfig::default()).unwrap();

    assert_eq!(alice.epoch_state().epoch(), 1);
    assert_eq!(bob.epoch_state().own_leaf(), LeafIndex::new(1));
    assert_eq!(bob.epoch_state().member_count(), 2);
    assert_in_sync(&alice, &bob);
}

#[test]
fn three_members_stay_in_sync_across_commits() {
    let world = World::new(2);
    let provider = world.provider();
    let (alice, bob, carol) = three_members(&world);
    assert_in_sync(&alice, &bob);
    assert_in_sync(&alice, &carol);

    // Bob refreshes their path; the others follow.
    let prepared = bob.prepare_commit(&provider, vec![]).unwrap();
    let alice = applied(alice.process_commit(&provider, &prepared.commit).unwrap())
        .into_active()
        .unwrap();
    let carol = applied(carol.process_commit(&provider, &prepared.commit).unwrap())
        .into_active()
        .unwrap();
    let bob = active(prepared);

    assert_eq!(bob.epoch_state().epoch(), 3);
    assert_in_sync(&alice, &bob);
    assert_in_sync(&carol, &bob);
}

#[test]
fn removed_member_learns_it_and_tree_shrinks() {
    let world = World::new(3);
    let provider = world.provider();
    let (alice, bob, carol) = three_members(&world);
    assert_eq!(alice.epoch_state().tree().leaf_count(), 4);

    let remove = Proposal::Remove { removed: carol.epoch_state().own_leaf() };
    let prepared = alice.prepare_commit(&provider, vec![remove.into()]).unwrap();

    assert!(matches!(
        carol.process_commit(&provider, &prepared.commit).unwrap(),
        CommitOutcome::Removed
    ));
    let bob = applied(bob.process_commit(&provider, &prepared.commit).unwrap())
        .into_active()
        .unwrap();
    let alice = active(prepared);

    assert_eq!(alice.epoch_state().member_count(), 2);
    assert_eq!(alice.epoch_state().tree().leaf_count(), 2);
    assert_in_sync(&alice, &bob);
}

#[test]
fn removal_commit_with_damaged_tag() {
    let world = World::new(14);
    let provider = world.provider();
    let (alice, bob, carol) = three_members(&world);

    let remove = Proposal::Remove { removed: carol.epoch_state().own_leaf() };
    let prepared = alice.prepare_commit(&provider, vec![remove.into()]).unwrap();

    let mut zeroed = prepared.commit.clone();
    zeroed.confirmation_tag = zeroed.confirmation_tag.map(|tag| vec![0; tag.len()]);
    assert_eq!(
        bob.process_commit(&provider, &zeroed).unwrap_err(),
        GroupError::ConfirmationTagMismatch
    );

    let mut truncated = prepared.commit.clone();
    if let Some(tag) = truncated.confirmation_tag.as_mut() {
        tag.truncate(8);
    }
    assert_eq!(
        carol.process_commit(&provider, &truncated).unwrap_err(),
        GroupError::ConfirmationTagMismatch
    );

    let mut untagged = prepared.commit.clone();
    untagged.confirmation_tag = None;
    assert_eq!(
        carol.process_commit(&provider, &untagged).unwrap_err(),
        GroupError::MissingConfirmationTag
    );

    // Processing never consumes the receiver's state.
    assert_eq!(carol.epoch_state().epoch(), bob.epoch_state().epoch());
    assert!(matches!(
        carol.process_commit(&provider, &prepared.commit).unwrap(),
        CommitOutcome::Removed
    ));
}

#[test]
fn update_committed_by_reference() {
    let world = World::new(4);
    let provider = world.provider();
    let alice = world.create(&world.identity("alice"));
    let bob_kp = world.key_package(&world.identity("bob"));
    let prepared = alice.prepare_commit(&provider, vec![add(&bob_kp)]).unwrap();
    let welcome = prepared.welcome.clone().unwrap();
    let alice = active(prepared);
    let bob = welcome.join_group(&provider, &bob_kp, None, GroupConfig::default()).unwrap();
    let old_key = bob.epoch_state().tree().leaf(LeafIndex::new(1)).unwrap().encryption_key.clone();

    let (bob, message) = bob.propose_update(&provider).unwrap();
    let (alice, reference) = alice.receive_proposal(&provider, &message).unwrap();
    assert_eq!(alice.pending_proposals(), 1);

    let prepared =
        alice.prepare_commit(&provider, vec![ProposalOrRef::Reference(reference)]).unwrap();
    let bob = applied(bob.process_commit(&provider, &prepared.commit).unwrap())
        .into_active()
        .unwrap();
    let alice = active(prepared);

    let new_key = &bob.epoch_state().tree().leaf(LeafIndex::new(1)).unwrap().encryption_key;
    assert_ne!(new_key, &old_key);
    assert_eq!(alice.pending_proposals(), 0);
    assert_in_sync(&alice, &bob);
}

#[test]
fn external_joiner_is_accepted_by_members() {
    let world = World::new(5);
    let provider = world.provider();
    let alice = world.create(&world.identity("alice"));
    let group_info = alice.group_info(&provider).unwrap();

    let bob_kp = world.key_package(&world.identity("bob"));
    let prepared = group_info
        .join_group_external(&provider, &bob_kp, None, false, GroupConfig::default())
        .unwrap();
    assert!(prepared.welcome.is_none());

    let alice = applied(alice.process_commit(&provider, &prepared.commit).unwrap())
        .into_active()
        .unwrap();
    let bob = active(prepared);

    assert_eq!(bob.epoch_state().own_leaf(), LeafIndex::new(1));
    assert_eq!(alice.epoch_state().member_count(), 2);
    assert_in_sync(&alice, &bob);
}

#[test]
fn external_resync_replaces_previous_leaf() {
    let world = World::new(6);
    let provider = world.provider();
    let (alice, _bob, carol) = three_members(&world);
    let group_info = alice.group_info(&provider).unwrap();

    // Bob lost their state and rejoins with a fresh key package.
    let bob_again = world.key_package(&world.identity("bob"));
    let prepared = group_info
        .join_group_external(&provider, &bob_again, None, true, GroupConfig::default())
        .unwrap();

    let alice = applied(alice.process_commit(&provider, &prepared.commit).unwrap())
        .into_active()
        .unwrap();
    let carol = applied(carol.process_commit(&provider, &prepared.commit).unwrap())
        .into_active()
        .unwrap();
    let bob = active(prepared);

    assert_eq!(alice.epoch_state().member_count(), 3);
    assert_eq!(bob.epoch_state().own_leaf(), LeafIndex::new(1));
    assert_in_sync(&alice, &bob);
    assert_in_sync(&carol, &bob);
}

#[test]
fn reinit_moves_members_to_successor_group() {
    let world = World::new(7);
    let provider = world.provider();
    let alice_id = world.identity("alice");
    let bob_id = world.identity("bob");
    let alice = world.create(&alice_id);
    let bob_kp = world.key_package(&bob_id);
    let prepared = alice.prepare_commit(&provider, vec![add(&bob_kp)]).unwrap();
    let welcome = prepared.welcome.clone().unwrap();
    let alice = active(prepared);
    let bob = welcome.join_group(&provider, &bob_kp, None, GroupConfig::default()).unwrap();

    let reinit = Proposal::ReInit {
        group_id: b"successor".to_vec(),
        version: alice.epoch_state().context().version,
        cipher_suite: alice.epoch_state().context().cipher_suite,
        extensions: vec![],
    };
    let prepared = alice.prepare_commit(&provider, vec![reinit.into()]).unwrap();
    let bob = applied(bob.process_commit(&provider, &prepared.commit).unwrap())
        .into_suspended()
        .unwrap();
    let alice = prepared.state.into_suspended().unwrap();
    assert_eq!(bob.reinit_target(), alice.reinit_target());

    let bob_next = world.key_package(&bob_id);
    let prepared = alice
        .reinit_group(&provider, &alice_id, vec![bob_next.key_package.clone()], GroupConfig::default())
        .unwrap();
    let welcome = prepared.welcome.clone().unwrap();
    let alice = active(prepared);

    // Without the old group's resumption secret the welcome cannot be opened.
    assert!(welcome.join_group(&provider, &bob_next, None, GroupConfig::default()).is_err());

    let bob = welcome
        .join_group(&provider.with_psks(&bob), &bob_next, None, GroupConfig::default())
        .unwrap();
    assert_eq!(bob.epoch_state().group_id(), b"successor");
    assert_in_sync(&alice, &bob);
}

#[test]
fn branch_binds_new_group_to_parent_epoch() {
    let world = World::new(8);
    let provider = world.provider();
    let alice_id = world.identity("alice");
    let bob_id = world.identity("bob");
    let alice = world.create(&alice_id);
    let bob_kp = world.key_package(&bob_id);
    let prepared = alice.prepare_commit(&provider, vec![add(&bob_kp)]).unwrap();
    let welcome = prepared.welcome.clone().unwrap();
    let alice = active(prepared);
    let bob = welcome.join_group(&provider, &bob_kp, None, GroupConfig::default()).unwrap();

    let bob_branch_kp = world.key_package(&bob_id);
    let prepared = alice
        .branch_group(
            &provider,
            &alice_id,
            b"branch".to_vec(),
            vec![bob_branch_kp.key_package.clone()],
            GroupConfig::default(),
        )
        .unwrap();
    let welcome = prepared.welcome.clone().unwrap();
    let alice_branch = active(prepared);
    let bob_branch = welcome
        .join_group(&provider.with_psks(&bob), &bob_branch_kp, None, GroupConfig::default())
        .unwrap();

    assert_eq!(bob_branch.epoch_state().group_id(), b"branch");
    assert_in_sync(&alice_branch, &bob_branch);
    // The parent group is untouched.
    assert_in_sync(&alice, &bob);
}

#[test]
fn exported_secrets_agree_between_members() {
    let world = World::new(9);
    let provider = world.provider();
    let (alice, bob, carol) = three_members(&world);

    let from_alice = alice.export_secret(&provider, "media", b"call-1", 32).unwrap();
    let from_bob = bob.export_secret(&provider, "media", b"call-1", 32).unwrap();
    let from_carol = carol.export_secret(&provider, "media", b"call-1", 32).unwrap();
    assert_eq!(from_alice, from_bob);
    assert_eq!(from_alice, from_carol);

    let other_label = alice.export_secret(&provider, "files", b"call-1", 32).unwrap();
    assert_ne!(from_alice, other_label);
}

#[test]
fn message_keys_agree_between_sender_and_receiver() {
    let world = World::new(10);
    let provider = world.provider();
    let (alice, bob, _carol) = three_members(&world);
    let alice_leaf = alice.epoch_state().own_leaf();

    let first = alice.next_application_key(&provider).unwrap();
    let second = alice.next_application_key(&provider).unwrap();
    assert_eq!(second.generation(), first.generation() + 1);

    // Bob opens them out of order.
    let late = bob.application_key_for(&provider, alice_leaf, second.generation()).unwrap();
    let early = bob.application_key_for(&provider, alice_leaf, first.generation()).unwrap();
    assert_eq!(late, second);
    assert_eq!(early, first);

    let handshake = alice.next_handshake_key(&provider).unwrap();
    assert_eq!(bob.handshake_key_for(&provider, alice_leaf, 0).unwrap(), handshake);
}

#[test]
fn commit_for_past_epoch_is_stale() {
    let world = World::new(11);
    let provider = world.provider();
    let (alice, bob, _carol) = three_members(&world);

    let prepared = alice.prepare_commit(&provider, vec![]).unwrap();
    let bob = applied(bob.process_commit(&provider, &prepared.commit).unwrap())
        .into_active()
        .unwrap();

    let err = bob.process_commit(&provider, &prepared.commit).unwrap_err();
    assert_eq!(err, GroupError::Epoch { expected: 3, actual: 2 });
    assert!(err.is_stale());
}

#[test]
fn tampered_confirmation_tag_is_rejected() {
    let world = World::new(12);
    let provider = world.provider();
    let (alice, bob, _carol) = three_members(&world);

    let prepared = alice.prepare_commit(&provider, vec![]).unwrap();
    let mut commit = prepared.commit.clone();
    if let Some(tag) = commit.confirmation_tag.as_mut() {
        tag[0] ^= 0x01;
    }
    assert_eq!(
        bob.process_commit(&provider, &commit).unwrap_err(),
        GroupError::ConfirmationTagMismatch
    );

    commit.confirmation_tag = None;
    assert_eq!(
        bob.process_commit(&provider, &commit).unwrap_err(),
        GroupError::MissingConfirmationTag
    );

    // The untouched commit still applies to the unchanged state.
    assert!(bob.process_commit(&provider, &prepared.commit).is_ok());
}

#[test]
fn welcome_without_tree_needs_one_supplied() {
    let world = World::new(13);
    let provider = world.provider();
    let config = GroupConfig { include_tree_in_group_info: false, ..GroupConfig::default() };
    let alice = new_group(&provider, &world.identity("alice"), b"g".to_vec(), vec![], config)
        .unwrap();
    let bob_kp = world.key_package(&world.identity("bob"));

    let prepared = alice.prepare_commit(&provider, vec![add(&bob_kp)]).unwrap();
    let welcome = prepared.welcome.clone().unwrap();
    let alice = active(prepared);

    assert_eq!(
        welcome.join_group(&provider, &bob_kp, None, GroupConfig::default()).unwrap_err(),
        GroupError::MissingRatchetTree
    );
    let tree = alice.epoch_state().tree().clone();
    let bob = welcome.join_group(&provider, &bob_kp, Some(tree), GroupConfig::default()).unwrap();
    assert_in_sync(&alice, &bob);
}
