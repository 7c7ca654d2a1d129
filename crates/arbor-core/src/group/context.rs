//! Group context and transcript hashes.
//!
//! ```text
//! confirmed_n = Hash(interim_{n-1} || ConfirmedTranscriptHashInput)
//! interim_n   = Hash(confirmed_n   || InterimTranscriptHashInput)
//! ```

use arbor_crypto::{CipherSuite, CipherSuiteId};
use serde::{Deserialize, Serialize};

use super::framing::{AuthenticatedContent, FramedContent, WireFormat};
use crate::{codec, error::CodecError, extension::Extension};

/// Shared summary of the group at one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupContext {
    /// Protocol version
    pub version: u16,
    /// Cipher suite
    pub cipher_suite: CipherSuiteId,
    /// Group identifier
    pub group_id: Vec<u8>,
    /// Epoch counter
    pub epoch: u64,
    /// Hash of the ratchet tree
    pub tree_hash: Vec<u8>,
    /// Transcript hash including the commit that created this epoch
    pub confirmed_transcript_hash: Vec<u8>,
    /// Confirmed transcript hash extended with the confirmation tag
    pub interim_transcript_hash: Vec<u8>,
    /// Group context extensions
    pub extensions: Vec<Extension>,
}

/// The context as it enters the key schedule and signatures. The interim
/// hash is derived after the key schedule and so cannot be part of it.
#[derive(Serialize)]
struct GroupContextBytes<'a> {
    version: u16,
    cipher_suite: CipherSuiteId,
    group_id: &'a [u8],
    epoch: u64,
    tree_hash: &'a [u8],
    confirmed_transcript_hash: &'a [u8],
    extensions: &'a [Extension],
}

#[derive(Serialize)]
struct ConfirmedTranscriptHashInput<'a> {
    wire_format: WireFormat,
    content: &'a FramedContent,
    signature: &'a [u8],
}

#[derive(Serialize)]
struct InterimTranscriptHashInput<'a> {
    confirmation_tag: &'a [u8],
}

impl GroupContext {
    /// Encoded context used by the key schedule, path encryption and
    /// message signatures.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(&GroupContextBytes {
            version: self.version,
            cipher_suite: self.cipher_suite,
            group_id: &self.group_id,
            epoch: self.epoch,
            tree_hash: &self.tree_hash,
            confirmed_transcript_hash: &self.confirmed_transcript_hash,
            extensions: &self.extensions,
        })
    }

    /// Context of the next epoch before its interim hash is known.
    pub(crate) fn successor(
        &self,
        tree_hash: Vec<u8>,
        confirmed_transcript_hash: Vec<u8>,
        extensions: Vec<Extension>,
    ) -> Self {
        Self {
            version: self.version,
            cipher_suite: self.cipher_suite,
            group_id: self.group_id.clone(),
            epoch: self.epoch + 1,
            tree_hash,
            confirmed_transcript_hash,
            interim_transcript_hash: Vec::new(),
            extensions,
        }
    }
}

/// Confirmed transcript hash after `commit`, chained from `interim`.
pub(crate) fn confirmed_transcript_hash(
    suite: &dyn CipherSuite,
    interim: &[u8],
    commit: &AuthenticatedContent,
) -> Result<Vec<u8>, CodecError> {
    let input = codec::encode(&ConfirmedTranscriptHashInput {
        wire_format: commit.wire_format,
        content: &commit.content,
        signature: &commit.signature,
    })?;
    Ok(suite.hash(&[interim, input.as_slice()].concat()))
}

/// Interim transcript hash from `confirmed` and the epoch's confirmation tag.
pub(crate) fn interim_transcript_hash(
    suite: &dyn CipherSuite,
    confirmed: &[u8],
    confirmation_tag: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let input = codec::encode(&InterimTranscriptHashInput { confirmation_tag })?;
    Ok(suite.hash(&[confirmed, input.as_slice()].concat()))
}

#[cfg(test)]
mod tests {
    use arbor_crypto::Curve25519ChaCha;

    use super::*;

    fn context() -> GroupContext {
        GroupContext {
            version: 1,
            cipher_suite: 3,
            group_id: b"g".to_vec(),
            epoch: 4,
            tree_hash: vec![1; 32],
            confirmed_transcript_hash: vec![2; 32],
            interim_transcript_hash: vec![3; 32],
            extensions: vec![],
        }
    }

    #[test]
    fn interim_hash_is_not_encoded() {
        let a = context();
        let mut b = context();
        b.interim_transcript_hash = vec![9; 32];
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
        b.epoch = 5;
        assert_ne!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn successor_advances_epoch() {
        let next = context().successor(vec![7; 32], vec![8; 32], vec![]);
        assert_eq!(next.epoch, 5);
        assert_eq!(next.group_id, b"g");
        assert!(next.interim_transcript_hash.is_empty());
    }

    #[test]
    fn interim_hash_depends_on_tag() {
        let suite = Curve25519ChaCha::new();
        let a = interim_transcript_hash(&suite, &[1; 32], &[2; 32]).unwrap();
        let b = interim_transcript_hash(&suite, &[1; 32], &[3; 32]).unwrap();
        assert_ne!(a, b);
    }
}
