//! Error types for the group core.
//!
//! Each layer gets its own enum so callers can match on the failure class
//! that matters to them: tree structure, tree validation, leaf validation,
//! ratchet bounds, commit legality, PSK resolution and the codec seam.
//! [`GroupError`] is the umbrella returned by the state machine operations.
//!
//! Every operation that returns an error leaves the state it was called on
//! untouched; errors never leave a half-applied epoch behind.

use arbor_crypto::{CipherSuiteId, CryptoError};
use thiserror::Error;

/// Codec seam failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Value could not be serialized
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes are not a valid encoding of the requested type
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Structural ratchet tree errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Leaf index beyond the tree width
    #[error("leaf {leaf} out of range for {leaf_count} leaves")]
    LeafOutOfRange {
        /// Requested leaf
        leaf: u32,
        /// Current leaf count
        leaf_count: u32,
    },

    /// Operation requires an occupied leaf
    #[error("leaf {leaf} is blank")]
    BlankLeaf {
        /// Requested leaf
        leaf: u32,
    },

    /// Node list has no entries
    #[error("tree has no nodes")]
    EmptyTree,

    /// Exported node list ends with a blank node
    #[error("exported tree ends with a blank node")]
    TrailingBlank,

    /// A leaf sits at a parent position or vice versa
    #[error("node {index} has the wrong kind for its position")]
    NodeKindMismatch {
        /// Offending node index
        index: u32,
    },

    /// A parent lists an unmerged leaf outside the tree
    #[error("node {node} lists unmerged leaf {leaf} outside the tree")]
    BadUnmergedLeaf {
        /// Parent node index
        node: u32,
        /// Offending leaf
        leaf: u32,
    },

    /// Tree would exceed the addressable width
    #[error("tree is full")]
    TreeFull,

    /// Hash input could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Key derivation failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Leaf node validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeafNodeCheckError {
    /// Leaf signature does not verify under its own signature key
    #[error("leaf node signature is invalid")]
    InvalidSignature,

    /// Leaf does not advertise the group's protocol version
    #[error("leaf does not support protocol version {version}")]
    UnsupportedVersion {
        /// Group protocol version
        version: u16,
    },

    /// Leaf does not advertise the group's cipher suite
    #[error("leaf does not support cipher suite {cipher_suite:#06x}")]
    UnsupportedCipherSuite {
        /// Group cipher suite
        cipher_suite: CipherSuiteId,
    },

    /// Leaf lacks a capability the group requires
    #[error("leaf lacks required {kind} {value:#06x}")]
    MissingRequiredCapability {
        /// Capability class ("extension", "proposal", "credential")
        kind: &'static str,
        /// Required type code
        value: u16,
    },

    /// Leaf carries an extension it does not advertise
    #[error("leaf carries unsupported extension {extension_type:#06x}")]
    UnsupportedExtension {
        /// Extension type code
        extension_type: u16,
    },

    /// Credential type is not supported by this leaf or by another member
    #[error("credential type {credential_type:#06x} is not supported by leaf {leaf}")]
    IncompatibleCredential {
        /// Credential type code
        credential_type: u16,
        /// Leaf lacking support
        leaf: u32,
    },

    /// Key package lifetime does not cover the current time
    #[error("lifetime [{not_before}, {not_after}] does not cover {now}")]
    LifetimeExpired {
        /// Current time
        now: u64,
        /// Start of validity
        not_before: u64,
        /// End of validity
        not_after: u64,
    },

    /// Leaf source does not match where the leaf appeared
    #[error("leaf source {actual} where {expected} was expected")]
    UnexpectedSource {
        /// Source required by context
        expected: &'static str,
        /// Source carried by the leaf
        actual: &'static str,
    },

    /// Encryption key already used by another node
    #[error("encryption key duplicates node {node}")]
    DuplicateEncryptionKey {
        /// Node holding the same key
        node: u32,
    },

    /// Signature key already used by another leaf
    #[error("signature key duplicates leaf {leaf}")]
    DuplicateSignatureKey {
        /// Leaf holding the same key
        leaf: u32,
    },

    /// Authentication service rejected the credential
    #[error("credential rejected: {reason}")]
    CredentialRejected {
        /// Reason from the authentication service
        reason: String,
    },

    /// Signed content could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Ratchet tree validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeCheckError {
    /// Tree hash differs from the group context
    #[error("tree hash does not match group context")]
    TreeHashMismatch,

    /// Parent node is not covered by exactly one valid parent-hash chain
    #[error("parent node {node} has parent-hash coverage {coverage}")]
    NotParentHashValid {
        /// Parent node index
        node: u32,
        /// Number of chains that verified through this node
        coverage: u32,
    },

    /// Unmerged leaf list violates tree structure
    #[error("node {node} lists invalid unmerged leaf {leaf}")]
    BadUnmergedLeaf {
        /// Parent node index
        node: u32,
        /// Offending leaf
        leaf: u32,
    },

    /// Two nodes share an encryption key
    #[error("nodes {first} and {second} share an encryption key")]
    DuplicateEncryptionKey {
        /// First node holding the key
        first: u32,
        /// Second node holding the key
        second: u32,
    },

    /// A leaf failed validation
    #[error("leaf {leaf} is invalid: {source}")]
    InvalidLeaf {
        /// Offending leaf
        leaf: u32,
        /// Leaf validation failure
        source: LeafNodeCheckError,
    },

    /// Structural failure while walking the tree
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Message ratchet failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RatchetError {
    /// Requested generation is too far ahead
    #[error("generation {requested} is more than {limit} ahead of {current}")]
    StepTooLarge {
        /// Ratchet head
        current: u32,
        /// Requested generation
        requested: u32,
        /// Configured skip limit
        limit: u32,
    },

    /// Requested generation was consumed or evicted
    #[error("generation {requested} is gone (head at {current})")]
    GenerationGone {
        /// Ratchet head
        current: u32,
        /// Requested generation
        requested: u32,
    },

    /// Generation counter exhausted
    #[error("ratchet generation overflow")]
    GenerationOverflow,

    /// Leaf has no ratchet in this secret tree
    #[error("leaf {leaf} not in secret tree of {leaf_count} leaves")]
    UnknownLeaf {
        /// Requested leaf
        leaf: u32,
        /// Secret tree width in leaves
        leaf_count: u32,
    },

    /// Key derivation failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Proposal and commit legality failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitValidationError {
    /// Commit requires an update path but carries none
    #[error("commit requires an update path")]
    MissingUpdatePath,

    /// Update path length differs from the filtered direct path
    #[error("update path has {actual} nodes, expected {expected}")]
    WrongUpdatePathLength {
        /// Filtered direct path length
        expected: usize,
        /// Nodes in the update path
        actual: usize,
    },

    /// Update path node has the wrong number of ciphertexts
    #[error("update path node {node} has {actual} ciphertexts, expected {expected}")]
    WrongCiphertextCount {
        /// Parent node index
        node: u32,
        /// Copath resolution size
        expected: usize,
        /// Ciphertexts supplied
        actual: usize,
    },

    /// Committer tried to commit its own update proposal
    #[error("committer cannot update itself by proposal")]
    CommitterSelfUpdate,

    /// Committer tried to remove itself
    #[error("committer cannot remove itself")]
    CommitterSelfRemove,

    /// Same leaf is both updated and removed
    #[error("leaf {leaf} is both updated and removed")]
    UpdateAndRemove {
        /// Affected leaf
        leaf: u32,
    },

    /// More than one update for the same leaf
    #[error("leaf {leaf} is updated twice")]
    DuplicateUpdate {
        /// Affected leaf
        leaf: u32,
    },

    /// More than one removal of the same leaf
    #[error("leaf {leaf} is removed twice")]
    DuplicateRemove {
        /// Affected leaf
        leaf: u32,
    },

    /// Two adds for the same client
    #[error("same client added twice")]
    DuplicateAdd,

    /// Add for a client that is already a member
    #[error("added client is already member at leaf {leaf}")]
    AlreadyMember {
        /// Existing leaf
        leaf: u32,
    },

    /// Same PSK injected twice
    #[error("pre-shared key injected twice")]
    DuplicatePsk,

    /// More than one group context extensions proposal
    #[error("more than one group context extensions proposal")]
    MultipleGroupContextExtensions,

    /// More than one reinit proposal
    #[error("more than one reinit proposal")]
    MultipleReInit,

    /// Reinit combined with other proposals
    #[error("reinit must be the only proposal in a commit")]
    ReInitWithOtherProposals,

    /// External init in a member commit
    #[error("external init is only valid in external commits")]
    ExternalInitFromMember,

    /// External commit proposal list is malformed
    #[error("invalid external commit: {reason}")]
    InvalidExternalCommit {
        /// What was wrong
        reason: &'static str,
    },

    /// Proposal type not allowed from this sender kind
    #[error("proposal type {proposal_type:#06x} not allowed from {sender}")]
    InvalidProposalSender {
        /// Proposal type code
        proposal_type: u16,
        /// Sender kind
        sender: &'static str,
    },

    /// Proposal targets a blank or out-of-range leaf
    #[error("leaf {leaf} is not a member")]
    UnknownMember {
        /// Target leaf
        leaf: u32,
    },

    /// Proposal reference not found in the cache
    #[error("unknown proposal reference")]
    UnknownProposalRef,

    /// Update keeps the old encryption key
    #[error("update must change the leaf encryption key")]
    UpdateShouldChangeEncryptionKey,

    /// Key package signature does not verify
    #[error("key package signature is invalid")]
    InvalidKeyPackageSignature,

    /// Key package uses a different version or cipher suite
    #[error("key package version {version} / suite {cipher_suite:#06x} does not match group")]
    KeyPackageMismatch {
        /// Key package version
        version: u16,
        /// Key package suite
        cipher_suite: CipherSuiteId,
    },

    /// Key package reuses its leaf encryption key as init key
    #[error("key package init key equals leaf encryption key")]
    InitKeyReuse,

    /// Some member does not support the proposed group context extensions
    #[error("leaf {leaf} does not support extension {extension_type:#06x}")]
    UnsupportedGroupExtension {
        /// Leaf lacking support
        leaf: u32,
        /// Extension type code
        extension_type: u16,
    },

    /// Reinit targets an older protocol version
    #[error("reinit to version {proposed} downgrades from {current}")]
    ReInitDowngrade {
        /// Current version
        current: u16,
        /// Proposed version
        proposed: u16,
    },

    /// A leaf node in a proposal or path is invalid
    #[error(transparent)]
    LeafNode(#[from] LeafNodeCheckError),

    /// Signed content could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Pre-shared key resolution failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PskError {
    /// No secret is known for the identifier
    #[error("unknown pre-shared key {id}")]
    UnknownPsk {
        /// Hex rendering of the identifier
        id: String,
    },

    /// Resumption PSK for another group or epoch
    #[error("resumption psk for epoch {epoch} is not available")]
    ResumptionUnavailable {
        /// Requested epoch
        epoch: u64,
    },

    /// PSK nonce has the wrong length
    #[error("psk nonce has {actual} bytes, expected {expected}")]
    InvalidNonce {
        /// Suite hash length
        expected: usize,
        /// Supplied length
        actual: usize,
    },
}

/// Errors from group state machine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// Message is for another epoch
    #[error("epoch mismatch: expected {expected}, got {actual}")]
    Epoch {
        /// Current epoch
        expected: u64,
        /// Epoch in the message
        actual: u64,
    },

    /// Message is for another group
    #[error("message addressed to another group")]
    WrongGroup,

    /// Cipher suite handle does not match the group
    #[error("cipher suite {actual:#06x} does not match group suite {expected:#06x}")]
    CipherSuiteMismatch {
        /// Group suite
        expected: CipherSuiteId,
        /// Supplied suite
        actual: CipherSuiteId,
    },

    /// Group has been suspended by a reinit commit
    #[error("group is suspended pending reinit")]
    Suspended,

    /// Operation requires a suspended group
    #[error("group is not suspended")]
    NotSuspended,

    /// Epoch counter exhausted
    #[error("epoch limit reached")]
    EpochExhausted,

    /// Message content type is wrong for the operation
    #[error("expected {expected} content")]
    UnexpectedContent {
        /// Content the operation needs
        expected: &'static str,
    },

    /// Sender kind is not allowed for this message
    #[error("invalid sender for {context}")]
    InvalidSender {
        /// What was being processed
        context: &'static str,
    },

    /// Framed content signature does not verify
    #[error("message signature is invalid")]
    InvalidSignature,

    /// Group info signature does not verify
    #[error("group info signature is invalid")]
    InvalidGroupInfoSignature,

    /// Committer's declared parent hash differs from the recomputed one
    #[error("update path parent hash mismatch")]
    WrongParentHash,

    /// Confirmation tag does not verify
    #[error("confirmation tag mismatch")]
    ConfirmationTagMismatch,

    /// Commit message carries no confirmation tag
    #[error("commit is missing its confirmation tag")]
    MissingConfirmationTag,

    /// Derived path public key differs from the one in the tree
    #[error("derived public key for node {node} does not match")]
    PathKeyMismatch {
        /// Parent node index
        node: u32,
    },

    /// No private key to decrypt the update path
    #[error("no private key for any node in the copath resolution")]
    NoDecryptionKey,

    /// Local member processed its own commit
    #[error("cannot process own commit; use the prepared state")]
    OwnCommit,

    /// Welcome has no entry for the supplied key package
    #[error("no welcome secrets for this key package")]
    NoMatchingKeyPackage,

    /// Ratchet tree neither embedded nor supplied
    #[error("ratchet tree not available")]
    MissingRatchetTree,

    /// External public key not present in group info
    #[error("group info carries no external public key")]
    MissingExternalPub,

    /// Joiner's leaf not found in the tree
    #[error("own leaf not found in tree")]
    NotAMember,

    /// Recomputed interim transcript hash differs from the group info
    #[error("interim transcript hash mismatch")]
    TranscriptMismatch,

    /// Proposal or commit is not legal
    #[error(transparent)]
    Validation(#[from] CommitValidationError),

    /// Leaf node failed validation
    #[error(transparent)]
    LeafNode(#[from] LeafNodeCheckError),

    /// Ratchet tree failed validation
    #[error(transparent)]
    TreeCheck(#[from] TreeCheckError),

    /// Structural tree failure
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Message ratchet failure
    #[error(transparent)]
    Ratchet(#[from] RatchetError),

    /// PSK resolution failure
    #[error(transparent)]
    Psk(#[from] PskError),

    /// Cryptographic failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Codec failure
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl GroupError {
    /// Returns true if the message was for an epoch this member has already
    /// left behind.
    ///
    /// Stale messages are expected under concurrency and can be dropped;
    /// every other error indicates a malformed or malicious message.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Epoch { expected, actual } if actual < expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_epoch_is_stale() {
        assert!(GroupError::Epoch { expected: 5, actual: 4 }.is_stale());
        assert!(!GroupError::Epoch { expected: 5, actual: 6 }.is_stale());
    }

    #[test]
    fn protocol_violations_are_not_stale() {
        assert!(!GroupError::WrongParentHash.is_stale());
        assert!(!GroupError::ConfirmationTagMismatch.is_stale());
        assert!(!GroupError::from(CommitValidationError::CommitterSelfRemove).is_stale());
    }

    #[test]
    fn nested_errors_render_source() {
        let err = TreeCheckError::InvalidLeaf {
            leaf: 2,
            source: LeafNodeCheckError::InvalidSignature,
        };
        assert_eq!(err.to_string(), "leaf 2 is invalid: leaf node signature is invalid");
    }
}
