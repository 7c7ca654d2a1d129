//! Private HPKE keys for the nodes a member can decrypt to.

use std::{collections::BTreeMap, fmt};

use arbor_crypto::{CipherSuite, HpkePrivateKey, HpkePublicKey};

use super::ratchet_tree::RatchetTree;

/// Private keys indexed by a hash of their public key.
///
/// Stores are values: cloning deep-copies every key so a provisional epoch
/// can be built without touching the live store. Dropped keys zeroize.
#[derive(Clone, Default)]
pub struct TreePrivateKeyStore {
    keys: BTreeMap<Vec<u8>, HpkePrivateKey>,
}

impl TreePrivateKeyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `private` under `public`, replacing any earlier entry.
    pub fn insert(
        &mut self,
        suite: &dyn CipherSuite,
        public: &HpkePublicKey,
        private: HpkePrivateKey,
    ) {
        self.keys.insert(key_id(suite, public), private);
    }

    /// Private key for `public`.
    pub fn get(&self, suite: &dyn CipherSuite, public: &HpkePublicKey) -> Option<&HpkePrivateKey> {
        self.keys.get(&key_id(suite, public))
    }

    /// Whether a private key for `public` is held.
    pub fn contains(&self, suite: &dyn CipherSuite, public: &HpkePublicKey) -> bool {
        self.keys.contains_key(&key_id(suite, public))
    }

    /// Move every key of `other` into this store.
    pub fn absorb(&mut self, other: Self) {
        self.keys.extend(other.keys);
    }

    /// Drop (and wipe) keys whose public key no longer appears in `tree`.
    pub fn retain_reachable(&mut self, suite: &dyn CipherSuite, tree: &RatchetTree) {
        let live: Vec<Vec<u8>> = tree
            .non_blank_nodes()
            .map(|(_, node)| key_id(suite, node.encryption_key()))
            .collect();
        self.keys.retain(|id, _| live.contains(id));
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are held.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn key_id(suite: &dyn CipherSuite, public: &HpkePublicKey) -> Vec<u8> {
    suite.hash(public.as_bytes())
}

impl fmt::Debug for TreePrivateKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreePrivateKeyStore").field("keys", &self.keys.len()).finish()
    }
}
