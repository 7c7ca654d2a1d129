//! Group layer: context, key schedule, proposals, commits, joins and the
//! Active/Suspended state machine built on top of the ratchet tree.

mod commit;
mod context;
mod framing;
mod join;
mod key_package;
mod key_schedule;
mod proposal;
mod provider;
mod psk;
mod state;
mod validation;
mod welcome;

pub use commit::{Commit, UpdatePath, UpdatePathNode};
pub use context::GroupContext;
pub use framing::{AuthenticatedContent, Content, FramedContent, Sender, WireFormat};
pub use key_package::{KeyPackage, KeyPackageBundle, KeyPackageRef, MemberIdentity};
pub use key_schedule::KeySchedule;
pub use proposal::{Proposal, ProposalOrRef, ProposalRef};
pub use provider::Provider;
pub use psk::{
    ExternalPskStore, NoPsks, PreSharedKeyId, Psk, PskChain, PskLookup, ResumptionUsage,
    psk_secret,
};
pub use state::{
    Active, CommitOutcome, GroupEpoch, GroupState, PreparedCommit, Suspended, new_group,
};
pub use validation::ReInitTarget;
pub use welcome::{EncryptedGroupSecrets, GroupInfo, GroupSecrets, Welcome};
