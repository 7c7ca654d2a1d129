//! Bundle of the services a group operation needs.
//!
//! Group states hold no handles of their own: every operation is passed a
//! [`Provider`] naming the cipher suite, the environment for randomness and
//! time, the authentication service and the PSK store to use.

use arbor_crypto::CipherSuite;

use super::{
    context::GroupContext,
    psk::{NoPsks, PskLookup},
};
use crate::{auth::AuthenticationService, env::Environment, error::GroupError};

/// Services for one group operation.
#[derive(Clone, Copy)]
pub struct Provider<'a> {
    /// Cipher suite of the group
    pub suite: &'a dyn CipherSuite,
    /// Randomness and wall-clock time
    pub env: &'a dyn Environment,
    /// Credential policy
    pub auth: &'a dyn AuthenticationService,
    /// Pre-shared keys the operation may inject or expect
    pub psks: &'a dyn PskLookup,
}

impl<'a> Provider<'a> {
    /// Provider without any pre-shared keys.
    pub fn new(
        suite: &'a dyn CipherSuite,
        env: &'a dyn Environment,
        auth: &'a dyn AuthenticationService,
    ) -> Self {
        Self { suite, env, auth, psks: &NoPsks }
    }

    /// Same services, resolving PSKs through `psks`.
    #[must_use]
    pub fn with_psks(self, psks: &'a dyn PskLookup) -> Self {
        Self { psks, ..self }
    }

    /// Current time in seconds.
    pub fn now(&self) -> u64 {
        self.env.unix_time()
    }

    /// The suite, checked against the group it is used for.
    pub(crate) fn suite_for(&self, context: &GroupContext) -> Result<&'a dyn CipherSuite, GroupError> {
        if self.suite.id() == context.cipher_suite {
            Ok(self.suite)
        } else {
            Err(GroupError::CipherSuiteMismatch {
                expected: context.cipher_suite,
                actual: self.suite.id(),
            })
        }
    }
}
