//! X25519 key management.
//!
//! Identity keypairs are long-lived (loaded from disk); ephemeral keypairs
//! are generated fresh for every session and discarded when it ends.

use crypto_box::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::core::KEY_LEN;

/// An X25519 keypair: a public key and its matching secret.
///
/// The secret half is zeroized on drop.
#[derive(Clone)]
pub struct Keypair {
    public: [u8; KEY_LEN],
    secret: [u8; KEY_LEN],
}

impl Keypair {
    /// Generate a fresh random keypair using the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();
        Self {
            public: *public.as_bytes(),
            secret: *secret.to_bytes(),
        }
    }

    /// Build a keypair from raw bytes, e.g. as read from an identity file.
    pub fn from_bytes(public: [u8; KEY_LEN], secret: [u8; KEY_LEN]) -> Self {
        Self { public, secret }
    }

    /// The public half.
    pub fn public(&self) -> &[u8; KEY_LEN] {
        &self.public
    }

    /// The secret half.
    ///
    /// Handle with care: this exposes the session or identity's private key.
    pub fn secret(&self) -> &[u8; KEY_LEN] {
        &self.secret
    }

    pub(crate) fn secret_key(&self) -> SecretKey {
        SecretKey::from(self.secret)
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Wrap a raw 32-byte array as a `crypto_box` public key.
pub(crate) fn public_key_from(bytes: &[u8; KEY_LEN]) -> PublicKey {
    PublicKey::from(*bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keypairs_differ() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_ne!(a.public(), b.public());
        assert_ne!(a.secret(), b.secret());
    }

    #[test]
    fn from_bytes_roundtrips() {
        let a = Keypair::generate();
        let b = Keypair::from_bytes(*a.public(), *a.secret());
        assert_eq!(a.public(), b.public());
        assert_eq!(a.secret(), b.secret());
    }
}
