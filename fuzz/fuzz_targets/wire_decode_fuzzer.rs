//! Fuzz target for decoding group structures from untrusted bytes
//!
//! # Strategy
//!
//! - Random bytes: arbitrary input for every decodable type
//! - Deep nesting: CBOR arrays nested to arbitrary depth
//! - Huge lengths: CBOR headers claiming enormous byte strings and arrays
//! - Node lists: arbitrary occupancy patterns fed to the tree importer
//!
//! # Invariants
//!
//! - Decoding never panics and never allocates the claimed length up front
//! - A decoded ratchet tree has a power-of-two leaf count and no trailing
//!   blank node
//! - A decoded tree encodes and decodes to itself

#![no_main]

use arbitrary::Arbitrary;
use arbor_core::{
    codec,
    group::{AuthenticatedContent, GroupInfo, KeyPackage, Welcome},
    tree::RatchetTree,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum DecodeAttack {
    RandomBytes { bytes: Vec<u8> },
    DeeplyNested { depth: u8 },
    HugeLength { claimed_len_exponent: u8, array: bool },
}

fn decode_all(bytes: &[u8]) {
    let _ = codec::decode::<AuthenticatedContent>(bytes);
    let _ = codec::decode::<Welcome>(bytes);
    let _ = codec::decode::<GroupInfo>(bytes);
    let _ = codec::decode::<KeyPackage>(bytes);

    if let Ok(tree) = codec::decode::<RatchetTree>(bytes) {
        assert!(tree.leaf_count().is_power_of_two(), "leaf count must be a power of two");
        assert!(
            matches!(tree.export_nodes().last(), Some(Some(_))),
            "exported tree must end with a node"
        );
        let encoded = codec::encode(&tree).expect("decoded tree must encode");
        let again: RatchetTree = codec::decode(&encoded).expect("re-encoded tree must decode");
        assert_eq!(again, tree, "tree must survive a second pass");
    }
}

fuzz_target!(|attack: DecodeAttack| {
    match attack {
        DecodeAttack::RandomBytes { bytes } => decode_all(&bytes),

        DecodeAttack::DeeplyNested { depth } => {
            let mut bytes = vec![0x81; usize::from(depth % 64)];
            bytes.push(0xF6);
            decode_all(&bytes);
        },

        DecodeAttack::HugeLength { claimed_len_exponent, array } => {
            let exponent = u32::from(claimed_len_exponent % 32);
            let claimed = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
            let major = if array { 0x9A } else { 0x5A };
            let mut bytes = vec![major];
            bytes.extend_from_slice(&claimed.to_be_bytes());
            decode_all(&bytes);
        },
    }
});
