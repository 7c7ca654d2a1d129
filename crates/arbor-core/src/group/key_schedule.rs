//! Epoch key schedule.
//!
//! ```text
//!                  init_secret_[n-1]
//!                        |
//!  commit_secret --> KDF.Extract
//!                        |
//!          ExpandWithLabel(., "joiner", GroupContext_[n], Nh)
//!                        |
//!                  joiner_secret
//!                        |
//!    psk_secret --> KDF.Extract
//!                        |
//!                   member secret --> DeriveSecret(., "welcome") = welcome_secret
//!                        |
//!          ExpandWithLabel(., "epoch", GroupContext_[n], Nh)
//!                        |
//!                   epoch_secret --> DeriveSecret(., <label>) = <secret>
//!                        |
//!          DeriveSecret(., "init") = init_secret_[n]
//! ```

use std::{fmt, sync::Arc};

use arbor_crypto::{CipherSuite, CryptoError, HpkeKeyPair, Secret};

use super::context::GroupContext;
use crate::{
    config::RatchetConfig,
    error::GroupError,
    secret_tree::SecretTree,
};

const WELCOME_LABEL: &str = "welcome";

/// Secrets derived from one epoch secret.
#[derive(Clone)]
struct EpochSecrets {
    sender_data: Secret,
    exporter: Secret,
    external: Secret,
    confirmation_key: Secret,
    membership_key: Secret,
    resumption_psk: Secret,
    epoch_authenticator: Secret,
    init_secret: Secret,
}

/// Everything the key schedule produced for the current epoch.
#[derive(Clone)]
pub struct KeySchedule {
    secrets: EpochSecrets,
    secret_tree: Arc<SecretTree>,
}

/// Result of advancing the schedule into a new epoch.
pub(crate) struct EpochDerivation {
    pub schedule: KeySchedule,
    pub joiner_secret: Secret,
    pub welcome_secret: Secret,
}

impl KeySchedule {
    /// Advance from `init_secret` into the epoch described by `context`.
    pub(crate) fn advance(
        suite: &dyn CipherSuite,
        init_secret: &Secret,
        commit_secret: &Secret,
        psk_secret: &Secret,
        context: &GroupContext,
        leaf_count: u32,
        config: RatchetConfig,
    ) -> Result<EpochDerivation, GroupError> {
        let context_bytes = context.to_bytes()?;
        let pre_joiner = suite.extract(init_secret.as_bytes(), commit_secret.as_bytes());
        let joiner_secret =
            suite.expand_with_label(&pre_joiner, "joiner", &context_bytes, suite.hash_len())?;
        let (schedule, welcome_secret) =
            Self::from_joiner(suite, &joiner_secret, psk_secret, context, leaf_count, config)?;
        Ok(EpochDerivation { schedule, joiner_secret, welcome_secret })
    }

    /// Enter the epoch from a joiner secret, as a welcomed member does.
    ///
    /// Returns the schedule and the welcome secret.
    pub(crate) fn from_joiner(
        suite: &dyn CipherSuite,
        joiner_secret: &Secret,
        psk_secret: &Secret,
        context: &GroupContext,
        leaf_count: u32,
        config: RatchetConfig,
    ) -> Result<(Self, Secret), GroupError> {
        let member_secret = suite.extract(joiner_secret.as_bytes(), psk_secret.as_bytes());
        let welcome_secret = suite.derive_secret(&member_secret, WELCOME_LABEL)?;
        let epoch_secret = suite.expand_with_label(
            &member_secret,
            "epoch",
            &context.to_bytes()?,
            suite.hash_len(),
        )?;

        let derive = |label: &str| suite.derive_secret(&epoch_secret, label);
        let encryption_secret = derive("encryption")?;
        let secrets = EpochSecrets {
            sender_data: derive("sender data")?,
            exporter: derive("exporter")?,
            external: derive("external")?,
            confirmation_key: derive("confirm")?,
            membership_key: derive("membership")?,
            resumption_psk: derive("resumption")?,
            epoch_authenticator: derive("authentication")?,
            init_secret: derive("init")?,
        };
        let secret_tree = SecretTree::new(suite, &encryption_secret, leaf_count, config)?;

        Ok((Self { secrets, secret_tree: Arc::new(secret_tree) }, welcome_secret))
    }

    /// Welcome secret alone, before the joiner knows the group context.
    pub(crate) fn welcome_secret(
        suite: &dyn CipherSuite,
        joiner_secret: &Secret,
        psk_secret: &Secret,
    ) -> Result<Secret, CryptoError> {
        let member_secret = suite.extract(joiner_secret.as_bytes(), psk_secret.as_bytes());
        suite.derive_secret(&member_secret, WELCOME_LABEL)
    }

    /// Confirmation tag over `confirmed_transcript_hash`.
    pub fn confirmation_tag(
        &self,
        suite: &dyn CipherSuite,
        confirmed_transcript_hash: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        suite.mac(self.secrets.confirmation_key.as_bytes(), confirmed_transcript_hash)
    }

    /// Check a received confirmation tag in constant time.
    pub fn verify_confirmation_tag(
        &self,
        suite: &dyn CipherSuite,
        confirmed_transcript_hash: &[u8],
        tag: &[u8],
    ) -> Result<(), GroupError> {
        suite
            .verify_mac(self.secrets.confirmation_key.as_bytes(), confirmed_transcript_hash, tag)
            .map_err(|_| GroupError::ConfirmationTagMismatch)
    }

    /// Exported secret for applications.
    ///
    /// `ExpandWithLabel(DeriveSecret(exporter, label), "exported", Hash(context), len)`
    pub fn export_secret(
        &self,
        suite: &dyn CipherSuite,
        label: &str,
        context: &[u8],
        len: usize,
    ) -> Result<Secret, CryptoError> {
        let derived = suite.derive_secret(&self.secrets.exporter, label)?;
        suite.expand_with_label(&derived, "exported", &suite.hash(context), len)
    }

    /// Key pair external joiners encrypt their init secret to.
    pub fn external_key_pair(&self, suite: &dyn CipherSuite) -> Result<HpkeKeyPair, CryptoError> {
        suite.derive_hpke_key_pair(self.secrets.external.as_bytes())
    }

    /// Value members can compare out of band to confirm a shared epoch.
    pub fn epoch_authenticator(&self) -> &Secret {
        &self.secrets.epoch_authenticator
    }

    /// Secret injected as a resumption PSK in later epochs or groups.
    pub fn resumption_psk(&self) -> &Secret {
        &self.secrets.resumption_psk
    }

    /// Key for membership tags on public messages.
    pub fn membership_key(&self) -> &Secret {
        &self.secrets.membership_key
    }

    /// Secret protecting sender data in private messages.
    pub fn sender_data_secret(&self) -> &Secret {
        &self.secrets.sender_data
    }

    /// Per-leaf message ratchets.
    pub fn secret_tree(&self) -> &SecretTree {
        &self.secret_tree
    }

    /// Init secret chained into the next epoch.
    pub(crate) fn init_secret(&self) -> &Secret {
        &self.secrets.init_secret
    }
}

impl fmt::Debug for KeySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySchedule")
            .field("leaves", &self.secret_tree.leaf_count())
            .finish_non_exhaustive()
    }
}
