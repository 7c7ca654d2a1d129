//! Fuzz target for commit authentication
//!
//! Tampered commits must never move a member to a new epoch.
//!
//! # Strategy
//!
//! - Corrupted signatures: flip bits in a valid commit signature
//! - Corrupted tags: flip bits in the confirmation tag
//! - Tampered framing: rewrite epoch, group id or sender after signing
//! - Tampered path: flip bits in update path ciphertexts
//!
//! # Invariants
//!
//! - The untouched commit is accepted
//! - Every tampered variant is rejected with an error
//! - NEVER panic on tampered input

#![no_main]

use arbitrary::Arbitrary;
use arbor_core::{
    BasicAuthenticationService, GroupConfig,
    env::test_utils::{MOCK_NOW, MockEnv},
    group::{
        AuthenticatedContent, CommitOutcome, Content, KeyPackage, MemberIdentity, Proposal,
        Provider, Sender, new_group,
    },
    tree::{Credential, LeafIndex, Lifetime},
};
use arbor_crypto::Curve25519ChaCha;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    seed: u64,
    attack: CommitAttack,
}

#[derive(Debug, Clone, Arbitrary)]
enum CommitAttack {
    CorruptedSignature { byte_offset: u8, bit_offset: u8 },
    CorruptedTag { byte_offset: u8, bit_offset: u8 },
    Epoch(u64),
    GroupId(Vec<u8>),
    Sender(u32),
    PathCiphertext { node: u8, byte_offset: u16, bit_offset: u8 },
}

fn flip(bytes: &mut [u8], byte_offset: usize, bit_offset: u8) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let index = byte_offset % bytes.len();
    bytes[index] ^= 1 << (bit_offset % 8);
    true
}

/// Apply `attack`; `false` when it leaves the commit unchanged.
fn tamper(commit: &mut AuthenticatedContent, attack: &CommitAttack) -> bool {
    match attack {
        CommitAttack::CorruptedSignature { byte_offset, bit_offset } => {
            flip(&mut commit.signature, usize::from(*byte_offset), *bit_offset)
        },
        CommitAttack::CorruptedTag { byte_offset, bit_offset } => commit
            .confirmation_tag
            .as_mut()
            .is_some_and(|tag| flip(tag, usize::from(*byte_offset), *bit_offset)),
        CommitAttack::Epoch(epoch) => {
            let changed = commit.content.epoch != *epoch;
            commit.content.epoch = *epoch;
            changed
        },
        CommitAttack::GroupId(group_id) => {
            let changed = commit.content.group_id != *group_id;
            commit.content.group_id.clone_from(group_id);
            changed
        },
        CommitAttack::Sender(leaf) => {
            let sender = Sender::Member(LeafIndex::new(*leaf));
            let changed = commit.content.sender != sender;
            commit.content.sender = sender;
            changed
        },
        CommitAttack::PathCiphertext { node, byte_offset, bit_offset } => {
            let Content::Commit(inner) = &mut commit.content.content else {
                return false;
            };
            let Some(path) = inner.path.as_mut() else {
                return false;
            };
            if path.nodes.is_empty() {
                return false;
            }
            let index = usize::from(*node) % path.nodes.len();
            path.nodes[index].encrypted_path_secret.first_mut().is_some_and(|ciphertext| {
                flip(&mut ciphertext.ciphertext, usize::from(*byte_offset), *bit_offset)
            })
        },
    }
}

fuzz_target!(|input: FuzzInput| {
    let suite = Curve25519ChaCha::new();
    let env = MockEnv::seeded(input.seed);
    let auth = BasicAuthenticationService::new();
    let provider = Provider::new(&suite, &env, &auth);
    let lifetime = Lifetime::starting_at(MOCK_NOW - 60, 3_600);

    let alice_id = MemberIdentity::generate(&suite, &env, Credential::basic("alice")).expect("identity");
    let alice = new_group(&provider, &alice_id, b"fuzz".to_vec(), vec![], GroupConfig::default())
        .expect("group");

    let bob_id = MemberIdentity::generate(&suite, &env, Credential::basic("bob")).expect("identity");
    let bob_kp = KeyPackage::generate(&suite, &env, &bob_id, lifetime).expect("key package");
    let prepared = alice
        .prepare_commit(&provider, vec![Proposal::Add { key_package: bob_kp.key_package.clone() }.into()])
        .expect("add");
    let welcome = prepared.welcome.expect("welcome");
    let alice = prepared.state.into_active().expect("active");
    let bob = welcome.join_group(&provider, &bob_kp, None, GroupConfig::default()).expect("join");

    let prepared = alice.prepare_commit(&provider, vec![]).expect("commit");
    let mut commit = prepared.commit.clone();
    if tamper(&mut commit, &input.attack) {
        assert!(bob.process_commit(&provider, &commit).is_err(), "tampered commit accepted");
    }

    let outcome = bob.process_commit(&provider, &prepared.commit).expect("valid commit");
    assert!(matches!(outcome, CommitOutcome::Applied(_)), "member must stay in the group");
});
