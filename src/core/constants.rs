//! Protocol constants for the Numscull wire format.
//!
//! These values are fixed by the protocol and MUST NOT be changed.

/// Width of the ASCII decimal length header used by plaintext framing.
pub const HEADER_SIZE: usize = 10;

/// Size of one plaintext block before sealing.
pub const BLOCK_SIZE: usize = 512;

/// NaCl Box authentication tag length (Poly1305).
pub const TAG_LEN: usize = 16;

/// NaCl Box nonce length.
pub const NONCE_LEN: usize = 24;

/// X25519 key length (public or private).
pub const KEY_LEN: usize = 32;

/// Size of one sealed block on the wire.
pub const ENCRYPTED_BLOCK_SIZE: usize = BLOCK_SIZE + TAG_LEN;

/// Largest framed payload (length prefix + JSON) that fits in one block.
pub const MAX_FRAMED_IN_BLOCK: usize = BLOCK_SIZE - 2;

/// Default port used by demo deployments of the server.
pub const DEFAULT_SERVER_PORT: u16 = 5222;

/// Default port assumed by the client library when unconfigured.
pub const DEFAULT_CLIENT_PORT: u16 = 5000;

/// Protocol version string sent in `control/init`.
pub const PROTOCOL_VERSION: &str = "0.2.4";
