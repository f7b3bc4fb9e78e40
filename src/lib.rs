//! Numscull protocol: encrypted JSON-RPC transport and session layer for a
//! code-review collaboration server and client.
//!
//! The wire format is a stream of fixed-size NaCl Box ciphertext blocks
//! ([`crypto`]) carrying length-prefixed JSON frames ([`transport`]).
//! Sessions authenticate via a three-phase handshake ([`handshake`]) before
//! exchanging requests dispatched against an in-memory project store
//! ([`domain`], [`rpc`]). [`server`] and [`client`] wire these layers into a
//! runnable binary and a library client, respectively.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod core;
pub mod crypto;
pub mod domain;
pub mod handshake;
pub mod rpc;
pub mod server;
pub mod session;
pub mod transport;

/// Common imports for consumers of this crate.
pub mod prelude {
    pub use crate::client::{Client, ClientError};
    pub use crate::core::{
        ConfigError, CryptoError, DispatchError, DomainError, FramingError, HandshakeError, SessionError,
    };
    pub use crate::crypto::{EncryptedChannel, Keypair};
    pub use crate::domain::Store;
    pub use crate::rpc::{Request, Response};
}
