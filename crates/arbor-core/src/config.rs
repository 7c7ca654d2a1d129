//! Group and ratchet policy configuration.

use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_BACKLOG_LIMIT, DEFAULT_SKIP_LIMIT},
    extension::RequiredCapabilities,
};

/// Bounds for out-of-order message key derivation.
///
/// These are local policy, not protocol constants: peers with different
/// limits interoperate, they only disagree on how much reordering they
/// tolerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatchetConfig {
    /// Maximum generations a single request may jump ahead of the ratchet
    pub skip_limit: u32,
    /// Skipped generations retained behind the ratchet head
    pub backlog_limit: u32,
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self { skip_limit: DEFAULT_SKIP_LIMIT, backlog_limit: DEFAULT_BACKLOG_LIMIT }
    }
}

/// Per-group policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Secret tree ratchet bounds
    pub ratchet: RatchetConfig,
    /// Embed the ratchet tree in every `GroupInfo` so joiners need no
    /// out-of-band tree download
    pub include_tree_in_group_info: bool,
    /// Attach an update path even when the proposals do not require one
    pub always_include_path: bool,
    /// Capabilities every member must advertise, published as a group
    /// context extension when the group is created
    pub required_capabilities: Option<RequiredCapabilities>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            ratchet: RatchetConfig::default(),
            include_tree_in_group_info: true,
            always_include_path: true,
            required_capabilities: None,
        }
    }
}
