//! Error taxonomy for the Numscull protocol.

use thiserror::Error;

/// Errors in the block-cipher / NaCl Box layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The ephemeral-key handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// AEAD open failed (invalid tag, wrong key, or corrupted ciphertext).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// A 64-bit nonce counter would wrap around.
    #[error("nonce counter exhausted - session must terminate")]
    CounterExhausted,
}

/// Errors in the plaintext/block framing layer.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The length header was not ten ASCII decimal digits.
    #[error("malformed length header: {0}")]
    Malformed(String),

    /// The socket closed before the expected number of bytes arrived.
    #[error("connection closed while reading data")]
    ConnectionClosed,

    /// A message does not fit in one block and multi-block framing was violated.
    #[error("message too large: {0} > {1}")]
    MessageTooLarge(usize, usize),

    /// A continuation block's announced length disagreed with the first block's total.
    #[error("protocol violation: inconsistent multi-block length")]
    ProtocolViolation,
}

/// Errors during the three-phase handshake (§4.3).
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The client identity has no known public key on the server.
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),

    /// Framing failed during the plaintext or ephemeral-exchange phases.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The ephemeral key exchange failed cryptographically.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O failure on the underlying socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while answering one RPC, before it is shaped into a response.
///
/// A `DispatchError` never closes the session on its own; the dispatcher
/// turns it into a well-formed `control/error` response (§7).
#[derive(Debug, Error, Clone)]
#[error("{reason}")]
pub struct DispatchError {
    /// Human-readable reason surfaced to the client.
    pub reason: String,
}

impl DispatchError {
    /// Build a dispatch error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors in the in-memory domain store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// No project with that name exists.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// No flow with that id exists in the active project.
    #[error("flow not found: {0}")]
    FlowNotFound(u64),

    /// No node with that id exists in any flow of the active project.
    #[error("node not found: {0}")]
    NodeNotFound(u64),

    /// An RPC outside `control/*` arrived with no active project selected.
    #[error("no active project")]
    NoActiveProject,
}

impl From<DomainError> for DispatchError {
    fn from(err: DomainError) -> Self {
        DispatchError::new(err.to_string())
    }
}

/// Top-level error for a single connection's lifetime.
///
/// Any variant here is fatal: the session task logs it and closes the
/// socket without sending a response, per §4.4 and §7.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Handshake failed; the connection never reached READY.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// A framing violation occurred on the encrypted stream.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A cryptographic failure occurred on the encrypted stream.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O failure on the underlying socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the server's configuration and key-storage layer (C8/C9).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The identity/keypair file had the wrong length or was unreadable.
    #[error("invalid key file {path}: {reason}")]
    InvalidKeyFile {
        /// Path that failed to load.
        path: String,
        /// Why it failed.
        reason: String,
    },

    /// I/O failure reading or writing config-directory files.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// `server.json` was present but not valid JSON for its schema.
    #[error("invalid server.json: {0}")]
    InvalidServerJson(String),
}
