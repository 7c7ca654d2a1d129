//! Key, secret and ciphertext value types.
//!
//! Public values compare and hash by content. Private values zeroize on drop
//! and never print their contents.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Cipher suite identifier as registered for MLS.
pub type CipherSuiteId = u16;

macro_rules! public_bytes {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Vec<u8>);

        impl $name {
            /// Raw encoded bytes.
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                for byte in self.0.iter().take(8) {
                    write!(f, "{byte:02x}")?;
                }
                if self.0.len() > 8 {
                    write!(f, "..")?;
                }
                write!(f, ")")
            }
        }
    };
}

macro_rules! private_bytes {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
        pub struct $name(Vec<u8>);

        impl $name {
            /// Raw secret bytes. Callers must not retain copies.
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            /// Length in bytes.
            pub fn len(&self) -> usize {
                self.0.len()
            }

            /// True for the zero-length value.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(<{} bytes redacted>)", stringify!($name), self.0.len())
            }
        }
    };
}

public_bytes!(
    /// HPKE (DHKEM) public key used for tree node encryption and init keys.
    HpkePublicKey
);

public_bytes!(
    /// Signature verification key bound to a member's credential.
    SignaturePublicKey
);

private_bytes!(
    /// HPKE (DHKEM) private key.
    HpkePrivateKey
);

private_bytes!(
    /// Signing key for leaf nodes, key packages and framed content.
    SignaturePrivateKey
);

private_bytes!(
    /// Generic secret: path secrets, epoch secrets, ratchet secrets.
    Secret
);

impl Secret {
    /// All-zero secret of `len` bytes, used where the key schedule calls for
    /// a zero vector (no commit secret, no PSKs).
    pub fn zero(len: usize) -> Self {
        Self(vec![0u8; len])
    }
}

/// HPKE ciphertext: encapsulated key plus AEAD ciphertext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpkeCiphertext {
    /// Ephemeral public key produced by encapsulation
    pub kem_output: Vec<u8>,
    /// AEAD ciphertext including tag
    pub ciphertext: Vec<u8>,
}

impl fmt::Debug for HpkeCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HpkeCiphertext")
            .field("kem_output_len", &self.kem_output.len())
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// A freshly derived HPKE key pair.
#[derive(Clone, Debug)]
pub struct HpkeKeyPair {
    /// Private half
    pub private_key: HpkePrivateKey,
    /// Public half
    pub public_key: HpkePublicKey,
}

/// A freshly derived signature key pair.
#[derive(Clone, Debug)]
pub struct SignatureKeyPair {
    /// Signing half
    pub private_key: SignaturePrivateKey,
    /// Verification half
    pub public_key: SignaturePublicKey,
}
