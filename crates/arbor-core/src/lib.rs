//! Arbor Group Core
//!
//! Tree-based group key agreement: a ratchet tree of member keys, a key
//! schedule that advances with every commit, and an immutable state machine
//! that moves a group from epoch to epoch.
//!
//! # Epoch Lifecycle
//!
//! ```text
//! proposals ──► validate & apply ──► update path ──► commit secret
//!                                                        │
//!   init_secret[n-1] ──────────────────────────► key schedule ──► epoch n
//!                                                        │
//!                         confirmation tag ◄─────────────┘
//! ```
//!
//! Each epoch's secrets feed a secret tree of per-member message ratchets
//! and the init secret of the following epoch. New members receive the
//! joiner secret in a [`group::Welcome`]; outsiders can join on their own
//! through [`group::GroupInfo::join_group_external`].
//!
//! # Determinism
//!
//! The core never reads the OS clock or entropy source directly. All
//! randomness and time flow through [`env::Environment`], so a seeded
//! [`env::test_utils::MockEnv`] reproduces every byte of a run.
//!
//! # Failure Model
//!
//! Every operation takes the current state by reference and returns a new
//! one. Rejected messages produce a typed [`error::GroupError`] and leave
//! the caller's state untouched.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod codec;
pub mod config;
pub mod constants;
pub mod env;
pub mod error;
pub mod extension;
pub mod group;
pub mod secret_tree;
pub mod tree;

pub use auth::{AuthenticationService, BasicAuthenticationService};
pub use config::{GroupConfig, RatchetConfig};
pub use env::{Environment, SystemEnv};
pub use error::{
    CodecError, CommitValidationError, GroupError, LeafNodeCheckError, PskError, RatchetError,
    TreeCheckError, TreeError,
};
pub use group::{
    Active, CommitOutcome, GroupContext, GroupInfo, GroupState, KeyPackage, KeyPackageBundle,
    MemberIdentity, PreparedCommit, Proposal, Provider, Suspended, Welcome, new_group,
};
pub use tree::{LeafIndex, NodeIndex, RatchetTree};
