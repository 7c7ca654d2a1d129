//! Protocol constants and limits.

/// Protocol version carried in group contexts and key packages (mls10).
pub const PROTOCOL_VERSION: u16 = 1;

/// Highest epoch a group may reach; commits beyond this are rejected.
pub const MAX_EPOCH: u64 = u64::MAX - 1;

/// Default key package lifetime: 90 days.
pub const DEFAULT_LIFETIME_SECS: u64 = 90 * 24 * 60 * 60;

/// Default ratchet look-ahead bound.
pub const DEFAULT_SKIP_LIMIT: u32 = 255;

/// Default number of skipped generations retained behind the ratchet head.
pub const DEFAULT_BACKLOG_LIMIT: u32 = 255;

/// Credential type codes.
pub mod credential_type {
    /// Basic identity credential
    pub const BASIC: u16 = 0x0001;
    /// X.509 certificate chain
    pub const X509: u16 = 0x0002;
}

/// Extension type codes.
pub mod extension_type {
    /// Application-defined identifier in a leaf node
    pub const APPLICATION_ID: u16 = 0x0001;
    /// Full ratchet tree carried in a `GroupInfo`
    pub const RATCHET_TREE: u16 = 0x0002;
    /// Capabilities every member must support
    pub const REQUIRED_CAPABILITIES: u16 = 0x0003;
    /// HPKE key for external commits
    pub const EXTERNAL_PUB: u16 = 0x0004;
    /// Signers allowed to send external proposals
    pub const EXTERNAL_SENDERS: u16 = 0x0005;

    /// Types every implementation understands without advertising them.
    pub const DEFAULTS: [u16; 5] =
        [APPLICATION_ID, RATCHET_TREE, REQUIRED_CAPABILITIES, EXTERNAL_PUB, EXTERNAL_SENDERS];
}

/// Proposal type codes.
pub mod proposal_type {
    /// Add a member
    pub const ADD: u16 = 0x0001;
    /// Replace the sender's leaf
    pub const UPDATE: u16 = 0x0002;
    /// Remove a member
    pub const REMOVE: u16 = 0x0003;
    /// Inject a pre-shared key
    pub const PRE_SHARED_KEY: u16 = 0x0004;
    /// Terminate and re-initialize the group
    pub const REINIT: u16 = 0x0005;
    /// External commit init secret
    pub const EXTERNAL_INIT: u16 = 0x0006;
    /// Replace the group context extensions
    pub const GROUP_CONTEXT_EXTENSIONS: u16 = 0x0007;

    /// Types every implementation understands without advertising them.
    pub const DEFAULTS: [u16; 7] =
        [ADD, UPDATE, REMOVE, PRE_SHARED_KEY, REINIT, EXTERNAL_INIT, GROUP_CONTEXT_EXTENSIONS];
}
