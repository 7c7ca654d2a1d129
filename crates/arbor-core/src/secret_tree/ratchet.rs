//! Per-sender symmetric ratchet.
//!
//! ```text
//! key_g    = ExpandWithLabel(secret_g, "key",    g, Nk)
//! nonce_g  = ExpandWithLabel(secret_g, "nonce",  g, Nn)
//! secret_g+1 = ExpandWithLabel(secret_g, "secret", g, Nh)
//! ```
//!
//! # Security Properties
//!
//! - Forward secrecy: each chain secret is replaced (and wiped) once used
//! - One-shot keys: a generation's key is handed out at most once
//! - Bounded work: look-ahead and retained backlog are capped by
//!   [`RatchetConfig`]

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use arbor_crypto::{CipherSuite, Secret};
use tracing::trace;

use crate::{config::RatchetConfig, error::RatchetError};

const KEY_LABEL: &str = "key";
const NONCE_LABEL: &str = "nonce";
const SECRET_LABEL: &str = "secret";

/// Key and nonce for one message.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageSecrets {
    key: Secret,
    nonce: Secret,
    generation: u32,
}

impl MessageSecrets {
    /// AEAD key.
    pub fn key(&self) -> &Secret {
        &self.key
    }

    /// AEAD nonce.
    pub fn nonce(&self) -> &Secret {
        &self.nonce
    }

    /// Generation these secrets belong to.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for MessageSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSecrets").field("generation", &self.generation).finish_non_exhaustive()
    }
}

struct RatchetState {
    secret: Secret,
    generation: u32,
    skipped: BTreeMap<u32, MessageSecrets>,
}

/// Symmetric ratchet with a bounded cache of skipped generations.
///
/// Access is serialized through an internal lock so a ratchet shared by
/// several readers never hands out the same generation twice.
pub struct Ratchet {
    state: Mutex<RatchetState>,
    config: RatchetConfig,
}

impl Ratchet {
    /// Ratchet starting at generation 0 with `secret`.
    pub fn new(secret: Secret, config: RatchetConfig) -> Self {
        Self {
            state: Mutex::new(RatchetState { secret, generation: 0, skipped: BTreeMap::new() }),
            config,
        }
    }

    /// Next generation [`next`](Self::next) would return.
    pub fn generation(&self) -> u32 {
        self.lock().generation
    }

    /// Consume the current generation.
    pub fn next(&self, suite: &dyn CipherSuite) -> Result<MessageSecrets, RatchetError> {
        let mut state = self.lock();
        let secrets = state.step(suite)?;
        state.trim_backlog(self.config.backlog_limit);
        Ok(secrets)
    }

    /// Secrets for `generation`, ratcheting forward if needed.
    ///
    /// Generations stepped over are cached so late messages can still be
    /// opened, up to the configured backlog.
    ///
    /// # Errors
    ///
    /// - `StepTooLarge`: `generation` is more than the skip limit ahead
    /// - `GenerationGone`: `generation` was consumed or evicted
    pub fn get(
        &self,
        suite: &dyn CipherSuite,
        generation: u32,
    ) -> Result<MessageSecrets, RatchetError> {
        let mut state = self.lock();
        let current = state.generation;

        if generation < current {
            return state
                .skipped
                .remove(&generation)
                .ok_or(RatchetError::GenerationGone { current, requested: generation });
        }
        if generation - current > self.config.skip_limit {
            return Err(RatchetError::StepTooLarge {
                current,
                requested: generation,
                limit: self.config.skip_limit,
            });
        }

        if generation > current {
            trace!(current, requested = generation, "ratchet look-ahead");
        }
        while state.generation < generation {
            let skipped = state.step(suite)?;
            state.skipped.insert(skipped.generation, skipped);
        }
        let secrets = state.step(suite)?;
        state.trim_backlog(self.config.backlog_limit);
        Ok(secrets)
    }

    fn lock(&self) -> MutexGuard<'_, RatchetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RatchetState {
    /// Drop skipped generations older than `backlog_limit` behind the head.
    fn trim_backlog(&mut self, backlog_limit: u32) {
        let floor = self.generation.saturating_sub(backlog_limit);
        let before = self.skipped.len();
        self.skipped.retain(|g, _| *g >= floor);
        if self.skipped.len() < before {
            trace!(evicted = before - self.skipped.len(), floor, "ratchet backlog trimmed");
        }
    }

    fn step(&mut self, suite: &dyn CipherSuite) -> Result<MessageSecrets, RatchetError> {
        let generation = self.generation;
        let next_generation = generation.checked_add(1).ok_or(RatchetError::GenerationOverflow)?;
        let context = generation.to_be_bytes();

        let key = suite.expand_with_label(&self.secret, KEY_LABEL, &context, suite.aead_key_len())?;
        let nonce =
            suite.expand_with_label(&self.secret, NONCE_LABEL, &context, suite.aead_nonce_len())?;
        // Old secret zeroizes on drop when replaced.
        self.secret =
            suite.expand_with_label(&self.secret, SECRET_LABEL, &context, suite.hash_len())?;
        self.generation = next_generation;

        Ok(MessageSecrets { key, nonce, generation })
    }
}

impl fmt::Debug for Ratchet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Ratchet")
            .field("generation", &state.generation)
            .field("skipped", &state.skipped.len())
            .finish_non_exhaustive()
    }
}
