//! X25519/XSalsa20-Poly1305 key management and the encrypted block stream (C2).

mod channel;
mod keys;

pub use channel::{counter_nonce, open_with_nonce, seal_with_random_nonce, EncryptedChannel};
pub use keys::Keypair;
pub(crate) use keys::public_key_from;
