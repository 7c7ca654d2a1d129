//! Authentication service seam.
//!
//! The core never decides on its own whether a credential is acceptable; it
//! asks an [`AuthenticationService`] supplied by the caller.

use std::collections::BTreeSet;

use crate::tree::Credential;

/// Validates credentials and relates them to clients.
pub trait AuthenticationService: Send + Sync {
    /// Accept or reject one credential.
    fn validate(&self, credential: &Credential) -> Result<(), String>;

    /// Validate a batch; the default validates one at a time.
    ///
    /// Returns the position and reason of the first rejection.
    fn validate_all(&self, credentials: &[&Credential]) -> Result<(), (usize, String)> {
        for (i, credential) in credentials.iter().enumerate() {
            self.validate(credential).map_err(|reason| (i, reason))?;
        }
        Ok(())
    }

    /// Whether two credentials belong to the same client.
    fn is_same_client(&self, a: &Credential, b: &Credential) -> bool;
}

/// Service for basic credentials: identities are compared byte for byte.
///
/// X.509 chains are accepted when non-empty and compared by their leaf
/// certificate; no path validation is performed.
#[derive(Debug, Clone, Default)]
pub struct BasicAuthenticationService {
    allowed: Option<BTreeSet<Vec<u8>>>,
}

impl BasicAuthenticationService {
    /// Accept any non-empty identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only the listed basic identities.
    pub fn with_allowed<I, T>(identities: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        Self { allowed: Some(identities.into_iter().map(Into::into).collect()) }
    }
}

impl AuthenticationService for BasicAuthenticationService {
    fn validate(&self, credential: &Credential) -> Result<(), String> {
        match credential {
            Credential::Basic { identity } if identity.is_empty() => {
                Err("empty identity".to_string())
            },
            Credential::Basic { identity } => match &self.allowed {
                Some(allowed) if !allowed.contains(identity) => {
                    Err(format!("identity {} not allowed", String::from_utf8_lossy(identity)))
                },
                _ => Ok(()),
            },
            Credential::X509 { certificates } if certificates.is_empty() => {
                Err("empty certificate chain".to_string())
            },
            Credential::X509 { .. } => Ok(()),
        }
    }

    fn is_same_client(&self, a: &Credential, b: &Credential) -> bool {
        match (a, b) {
            (Credential::Basic { identity: x }, Credential::Basic { identity: y }) => x == y,
            (Credential::X509 { certificates: x }, Credential::X509 { certificates: y }) => {
                x.first().is_some() && x.first() == y.first()
            },
            _ => false,
        }
    }
}
