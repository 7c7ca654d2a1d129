//! Typed extensions for leaf nodes, key packages, group contexts and group
//! info.

use arbor_crypto::{HpkePublicKey, SignaturePublicKey};
use serde::{Deserialize, Serialize};

use crate::{
    constants::extension_type,
    tree::{Credential, RatchetTree},
};

/// Capabilities every member must advertise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredCapabilities {
    /// Extension types
    pub extension_types: Vec<u16>,
    /// Proposal types
    pub proposal_types: Vec<u16>,
    /// Credential types
    pub credential_types: Vec<u16>,
}

/// A signer allowed to send proposals from outside the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSender {
    /// Key that signs the sender's proposals
    pub signature_key: SignaturePublicKey,
    /// Sender identity
    pub credential: Credential,
}

/// One extension entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extension {
    /// Application-defined leaf identifier
    ApplicationId(Vec<u8>),
    /// Full ratchet tree, carried in group info
    RatchetTree(RatchetTree),
    /// Capabilities every member must support
    RequiredCapabilities(RequiredCapabilities),
    /// HPKE key external joiners encrypt their init secret to
    ExternalPub(HpkePublicKey),
    /// Signers allowed to send external proposals
    ExternalSenders(Vec<ExternalSender>),
    /// Extension this implementation does not interpret
    Unknown {
        /// Registered type code
        extension_type: u16,
        /// Opaque payload
        data: Vec<u8>,
    },
}

impl Extension {
    /// Registered type code.
    pub fn extension_type(&self) -> u16 {
        match self {
            Self::ApplicationId(_) => extension_type::APPLICATION_ID,
            Self::RatchetTree(_) => extension_type::RATCHET_TREE,
            Self::RequiredCapabilities(_) => extension_type::REQUIRED_CAPABILITIES,
            Self::ExternalPub(_) => extension_type::EXTERNAL_PUB,
            Self::ExternalSenders(_) => extension_type::EXTERNAL_SENDERS,
            Self::Unknown { extension_type, .. } => *extension_type,
        }
    }
}

/// Whether every implementation understands `extension_type` implicitly.
pub fn is_default_extension(extension_type: u16) -> bool {
    extension_type::DEFAULTS.contains(&extension_type)
}

/// Required capabilities in `extensions`, if any.
pub fn required_capabilities(extensions: &[Extension]) -> Option<&RequiredCapabilities> {
    extensions.iter().find_map(|ext| match ext {
        Extension::RequiredCapabilities(required) => Some(required),
        _ => None,
    })
}

/// Ratchet tree in `extensions`, if any.
pub fn ratchet_tree(extensions: &[Extension]) -> Option<&RatchetTree> {
    extensions.iter().find_map(|ext| match ext {
        Extension::RatchetTree(tree) => Some(tree),
        _ => None,
    })
}

/// External public key in `extensions`, if any.
pub fn external_pub(extensions: &[Extension]) -> Option<&HpkePublicKey> {
    extensions.iter().find_map(|ext| match ext {
        Extension::ExternalPub(key) => Some(key),
        _ => None,
    })
}

/// External senders in `extensions`; empty when absent.
pub fn external_senders(extensions: &[Extension]) -> &[ExternalSender] {
    extensions
        .iter()
        .find_map(|ext| match ext {
            Extension::ExternalSenders(senders) => Some(senders.as_slice()),
            _ => None,
        })
        .unwrap_or(&[])
}
