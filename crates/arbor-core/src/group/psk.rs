//! Pre-shared keys and the PSK secret chain.
//!
//! ```text
//! psk_extracted_i = Extract(0, psk_i)
//! psk_input_i     = ExpandWithLabel(psk_extracted_i, "derived psk", PSKLabel_i, Nh)
//! psk_secret_i    = Extract(psk_input_i, psk_secret_{i-1})      psk_secret_0 = 0
//! ```

use std::collections::BTreeMap;

use arbor_crypto::{CipherSuite, Secret};
use serde::{Deserialize, Serialize};

use crate::{
    codec,
    env::Environment,
    error::{GroupError, PskError},
};

const DERIVED_PSK_LABEL: &str = "derived psk";

/// Why a resumption PSK is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResumptionUsage {
    /// Ordinary injection within a group
    Application,
    /// Linking a re-initialized group to its predecessor
    ReInit,
    /// Linking a branched group to its parent
    Branch,
}

/// Which secret a PSK identifier refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Psk {
    /// Secret provisioned out of band
    External {
        /// Application-chosen identifier
        psk_id: Vec<u8>,
    },
    /// Resumption secret of an earlier epoch
    Resumption {
        /// Usage
        usage: ResumptionUsage,
        /// Group the epoch belongs to
        group_id: Vec<u8>,
        /// Epoch whose resumption secret is used
        epoch: u64,
    },
}

/// A PSK identifier with its freshness nonce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PreSharedKeyId {
    /// Referenced secret
    pub psk: Psk,
    /// Random nonce of `Nh` bytes
    pub psk_nonce: Vec<u8>,
}

impl PreSharedKeyId {
    /// External PSK identifier with a fresh nonce.
    pub fn external(suite: &dyn CipherSuite, env: &dyn Environment, psk_id: Vec<u8>) -> Self {
        Self { psk: Psk::External { psk_id }, psk_nonce: env.random_vec(suite.hash_len()) }
    }

    /// Resumption PSK identifier with a fresh nonce.
    pub fn resumption(
        suite: &dyn CipherSuite,
        env: &dyn Environment,
        usage: ResumptionUsage,
        group_id: Vec<u8>,
        epoch: u64,
    ) -> Self {
        Self {
            psk: Psk::Resumption { usage, group_id, epoch },
            psk_nonce: env.random_vec(suite.hash_len()),
        }
    }

    pub(crate) fn describe(&self) -> String {
        match &self.psk {
            Psk::External { psk_id } => format!("external:{}", hex::encode(psk_id)),
            Psk::Resumption { usage, group_id, epoch } => {
                format!("resumption:{usage:?}:{}:{epoch}", hex::encode(group_id))
            },
        }
    }
}

/// Resolves PSK identifiers to secrets.
pub trait PskLookup {
    /// Secret for `id`.
    fn resolve(&self, id: &PreSharedKeyId) -> Result<Secret, PskError>;
}

/// Lookup that knows no PSKs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPsks;

impl PskLookup for NoPsks {
    fn resolve(&self, id: &PreSharedKeyId) -> Result<Secret, PskError> {
        Err(PskError::UnknownPsk { id: id.describe() })
    }
}

/// In-memory store of external PSKs.
#[derive(Debug, Clone, Default)]
pub struct ExternalPskStore {
    secrets: BTreeMap<Vec<u8>, Secret>,
}

impl ExternalPskStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `secret` under `psk_id`.
    pub fn insert(&mut self, psk_id: Vec<u8>, secret: Secret) {
        self.secrets.insert(psk_id, secret);
    }
}

impl PskLookup for ExternalPskStore {
    fn resolve(&self, id: &PreSharedKeyId) -> Result<Secret, PskError> {
        match &id.psk {
            Psk::External { psk_id } => self
                .secrets
                .get(psk_id)
                .cloned()
                .ok_or_else(|| PskError::UnknownPsk { id: id.describe() }),
            Psk::Resumption { .. } => Err(PskError::UnknownPsk { id: id.describe() }),
        }
    }
}

/// Tries each lookup in order and returns the first hit.
pub struct PskChain<'a> {
    lookups: Vec<&'a dyn PskLookup>,
}

impl<'a> PskChain<'a> {
    /// Chain over `lookups`.
    pub fn new(lookups: Vec<&'a dyn PskLookup>) -> Self {
        Self { lookups }
    }
}

impl PskLookup for PskChain<'_> {
    fn resolve(&self, id: &PreSharedKeyId) -> Result<Secret, PskError> {
        let mut last = PskError::UnknownPsk { id: id.describe() };
        for lookup in &self.lookups {
            match lookup.resolve(id) {
                Ok(secret) => return Ok(secret),
                Err(err) => last = err,
            }
        }
        Err(last)
    }
}

#[derive(Serialize)]
struct PskLabel<'a> {
    id: &'a PreSharedKeyId,
    index: u16,
    count: u16,
}

/// Fold `ids` into the epoch's PSK secret. No PSKs yields the zero secret.
pub fn psk_secret(
    suite: &dyn CipherSuite,
    ids: &[PreSharedKeyId],
    lookup: &dyn PskLookup,
) -> Result<Secret, GroupError> {
    let hash_len = suite.hash_len();
    let zero = Secret::zero(hash_len);
    let count = ids.len() as u16;

    let mut secret = zero.clone();
    for (index, id) in (0u16..).zip(ids) {
        let psk = lookup.resolve(id)?;
        let extracted = suite.extract(zero.as_bytes(), psk.as_bytes());
        let label = codec::encode(&PskLabel { id, index, count })?;
        let input = suite.expand_with_label(&extracted, DERIVED_PSK_LABEL, &label, hash_len)?;
        secret = suite.extract(input.as_bytes(), secret.as_bytes());
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use arbor_crypto::Curve25519ChaCha;

    use super::*;
    use crate::env::test_utils::MockEnv;

    #[test]
    fn no_psks_is_zero() {
        let suite = Curve25519ChaCha::new();
        let secret = psk_secret(&suite, &[], &NoPsks).unwrap();
        assert_eq!(secret, Secret::zero(32));
    }

    #[test]
    fn external_psk_changes_secret() {
        let suite = Curve25519ChaCha::new();
        let env = MockEnv::seeded(1);
        let mut store = ExternalPskStore::new();
        store.insert(b"psk".to_vec(), Secret::from(vec![4; 32]));
        let id = PreSharedKeyId::external(&suite, &env, b"psk".to_vec());

        let secret = psk_secret(&suite, std::slice::from_ref(&id), &store).unwrap();
        assert_ne!(secret, Secret::zero(32));
        assert_eq!(id.psk_nonce.len(), 32);

        // Order matters.
        let other = PreSharedKeyId::external(&suite, &env, b"psk".to_vec());
        let ab = psk_secret(&suite, &[id.clone(), other.clone()], &store).unwrap();
        let ba = psk_secret(&suite, &[other, id], &store).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn unknown_psk_fails() {
        let suite = Curve25519ChaCha::new();
        let env = MockEnv::seeded(1);
        let id = PreSharedKeyId::external(&suite, &env, b"\x01\xff".to_vec());
        assert_eq!(
            psk_secret(&suite, &[id], &NoPsks),
            Err(GroupError::Psk(PskError::UnknownPsk { id: "external:01ff".to_string() }))
        );
    }

    #[test]
    fn chain_falls_through() {
        let suite = Curve25519ChaCha::new();
        let env = MockEnv::seeded(2);
        let mut store = ExternalPskStore::new();
        store.insert(b"k".to_vec(), Secret::from(vec![1; 32]));
        let chain = PskChain::new(vec![&NoPsks as &dyn PskLookup, &store]);
        let id = PreSharedKeyId::external(&suite, &env, b"k".to_vec());
        assert_eq!(chain.resolve(&id).unwrap(), Secret::from(vec![1; 32]));
    }
}
