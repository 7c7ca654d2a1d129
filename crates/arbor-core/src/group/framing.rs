//! Framed content and its signatures.
//!
//! ```text
//! FramedContentTBS = version || wire_format || FramedContent || [GroupContext]
//! signature        = SignWithLabel(sk, "FramedContentTBS", FramedContentTBS)
//! ProposalRef      = RefHash("MLS 1.0 Proposal Reference", AuthenticatedContent)
//! ```
//!
//! The group context is bound into the signature for senders that speak from
//! inside the group (members and external committers).

use arbor_crypto::{CipherSuite, SignaturePrivateKey, SignaturePublicKey};
use serde::{Deserialize, Serialize};

use super::{
    commit::Commit,
    context::GroupContext,
    proposal::{Proposal, ProposalRef},
};
use crate::{
    codec,
    constants::PROTOCOL_VERSION,
    error::{CodecError, GroupError},
    tree::LeafIndex,
};

const FRAMED_CONTENT_LABEL: &str = "FramedContentTBS";
const PROPOSAL_REF_LABEL: &str = "MLS 1.0 Proposal Reference";

/// How a message travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFormat {
    /// Signed, not encrypted
    PublicMessage,
    /// Signed and encrypted under the secret tree
    PrivateMessage,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sender {
    /// A current member, by leaf
    Member(LeafIndex),
    /// A signer listed in the external senders extension, by position
    External(u32),
    /// A prospective member proposing its own addition
    NewMemberProposal,
    /// A new member joining through an external commit
    NewMemberCommit,
}

impl Sender {
    /// Short label for errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Member(_) => "member",
            Self::External(_) => "external",
            Self::NewMemberProposal => "new_member_proposal",
            Self::NewMemberCommit => "new_member_commit",
        }
    }

    fn binds_context(self) -> bool {
        matches!(self, Self::Member(_) | Self::NewMemberCommit)
    }
}

/// Handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Content {
    /// A single proposal
    Proposal(Proposal),
    /// A commit
    Commit(Commit),
}

/// Message content before authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramedContent {
    /// Group the message belongs to
    pub group_id: Vec<u8>,
    /// Epoch the message was produced in
    pub epoch: u64,
    /// Producer
    pub sender: Sender,
    /// Application data authenticated alongside the content
    pub authenticated_data: Vec<u8>,
    /// Payload
    pub content: Content,
}

#[derive(Serialize)]
struct FramedContentTbs<'a> {
    version: u16,
    wire_format: WireFormat,
    content: &'a FramedContent,
    context: Option<&'a [u8]>,
}

/// Signed content, plus the confirmation tag when it is a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedContent {
    /// Wire format the signature covers
    pub wire_format: WireFormat,
    /// Signed content
    pub content: FramedContent,
    /// Sender's signature
    pub signature: Vec<u8>,
    /// MAC binding a commit to the epoch it creates
    pub confirmation_tag: Option<Vec<u8>>,
}

impl AuthenticatedContent {
    /// Sign `content` in the epoch described by `context`.
    pub fn sign(
        suite: &dyn CipherSuite,
        wire_format: WireFormat,
        content: FramedContent,
        signer: &SignaturePrivateKey,
        context: &GroupContext,
    ) -> Result<Self, GroupError> {
        let tbs = to_be_signed(wire_format, &content, context)?;
        let signature = suite.sign_with_label(signer, FRAMED_CONTENT_LABEL, &tbs)?;
        Ok(Self { wire_format, content, signature, confirmation_tag: None })
    }

    /// Verify the signature under `key`.
    pub fn verify(
        &self,
        suite: &dyn CipherSuite,
        key: &SignaturePublicKey,
        context: &GroupContext,
    ) -> Result<(), GroupError> {
        let tbs = to_be_signed(self.wire_format, &self.content, context)?;
        suite
            .verify_with_label(key, FRAMED_CONTENT_LABEL, &tbs, &self.signature)
            .map_err(|_| GroupError::InvalidSignature)
    }

    /// Reference under which a proposal message is cached.
    pub fn proposal_ref(&self, suite: &dyn CipherSuite) -> Result<ProposalRef, CodecError> {
        Ok(ProposalRef::new(suite.ref_hash(PROPOSAL_REF_LABEL, &codec::encode(self)?)))
    }
}

fn to_be_signed(
    wire_format: WireFormat,
    content: &FramedContent,
    context: &GroupContext,
) -> Result<Vec<u8>, CodecError> {
    let context_bytes =
        if content.sender.binds_context() { Some(context.to_bytes()?) } else { None };
    codec::encode(&FramedContentTbs {
        version: PROTOCOL_VERSION,
        wire_format,
        content,
        context: context_bytes.as_deref(),
    })
}

#[cfg(test)]
mod tests {
    use arbor_crypto::Curve25519ChaCha;

    use super::*;

    fn context(epoch: u64) -> GroupContext {
        GroupContext {
            version: 1,
            cipher_suite: 3,
            group_id: b"group".to_vec(),
            epoch,
            tree_hash: vec![],
            confirmed_transcript_hash: vec![],
            interim_transcript_hash: vec![],
            extensions: vec![],
        }
    }

    fn content(sender: Sender) -> FramedContent {
        FramedContent {
            group_id: b"group".to_vec(),
            epoch: 0,
            sender,
            authenticated_data: vec![],
            content: Content::Proposal(Proposal::Remove { removed: LeafIndex::new(1) }),
        }
    }

    #[test]
    fn member_signature_binds_context() {
        let suite = Curve25519ChaCha::new();
        let keys = suite.derive_signature_key_pair(&[1; 32]).unwrap();
        let signed = AuthenticatedContent::sign(
            &suite,
            WireFormat::PublicMessage,
            content(Sender::Member(LeafIndex::new(0))),
            &keys.private_key,
            &context(0),
        )
        .unwrap();

        signed.verify(&suite, &keys.public_key, &context(0)).unwrap();
        assert_eq!(
            signed.verify(&suite, &keys.public_key, &context(1)),
            Err(GroupError::InvalidSignature)
        );
    }

    #[test]
    fn external_signature_ignores_context() {
        let suite = Curve25519ChaCha::new();
        let keys = suite.derive_signature_key_pair(&[2; 32]).unwrap();
        let signed = AuthenticatedContent::sign(
            &suite,
            WireFormat::PublicMessage,
            content(Sender::External(0)),
            &keys.private_key,
            &context(0),
        )
        .unwrap();
        signed.verify(&suite, &keys.public_key, &context(7)).unwrap();
    }

    #[test]
    fn proposal_ref_changes_with_content() {
        let suite = Curve25519ChaCha::new();
        let keys = suite.derive_signature_key_pair(&[3; 32]).unwrap();
        let sign = |sender| {
            AuthenticatedContent::sign(
                &suite,
                WireFormat::PublicMessage,
                content(sender),
                &keys.private_key,
                &context(0),
            )
            .unwrap()
        };
        let a = sign(Sender::Member(LeafIndex::new(0))).proposal_ref(&suite).unwrap();
        let b = sign(Sender::Member(LeafIndex::new(2))).proposal_ref(&suite).unwrap();
        assert_eq!(a.as_bytes().len(), 32);
        assert_ne!(a, b);
    }
}
