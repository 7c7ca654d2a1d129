//! Fuzz target for the per-sender message ratchet
//!
//! # Strategy
//!
//! - Arbitrary chain secrets and ratchet bounds
//! - Random sequences of sequential and random-access requests
//! - Requests far ahead of, and far behind, the ratchet head
//!
//! # Invariants
//!
//! - The ratchet never panics
//! - A successful request returns the generation asked for
//! - Random access agrees with a sender stepping sequentially
//! - No generation is handed out twice
//! - Failed requests leave the head where it was

#![no_main]

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use arbor_core::{RatchetConfig, secret_tree::Ratchet};
use arbor_crypto::{Curve25519ChaCha, Secret};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct RatchetScenario {
    secret: [u8; 32],
    skip_limit: u8,
    backlog_limit: u8,
    operations: Vec<RatchetOperation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum RatchetOperation {
    Next,
    Get { generation: u16 },
}

fuzz_target!(|scenario: RatchetScenario| {
    let suite = Curve25519ChaCha::new();
    let config = RatchetConfig {
        skip_limit: u32::from(scenario.skip_limit),
        backlog_limit: u32::from(scenario.backlog_limit),
    };
    let receiver = Ratchet::new(Secret::from(scenario.secret.to_vec()), config);
    let reference = Ratchet::new(Secret::from(scenario.secret.to_vec()), RatchetConfig::default());
    let mut expected = Vec::new();
    let mut issued = BTreeSet::new();

    for op in scenario.operations.into_iter().take(64) {
        let head = receiver.generation();
        let result = match op {
            RatchetOperation::Next => receiver.next(&suite).map(|s| (head, s)),
            RatchetOperation::Get { generation } => {
                let generation = u32::from(generation);
                receiver.get(&suite, generation).map(|s| (generation, s))
            },
        };

        match result {
            Ok((generation, secrets)) => {
                assert_eq!(secrets.generation(), generation, "wrong generation returned");
                assert!(issued.insert(generation), "generation {generation} issued twice");
                while expected.len() <= generation as usize {
                    expected.push(reference.next(&suite).expect("reference ratchet"));
                }
                assert_eq!(&secrets, &expected[generation as usize], "keys diverge from sender");
            },
            Err(_) => {
                assert_eq!(receiver.generation(), head, "failed request moved the ratchet");
            },
        }
    }
});
