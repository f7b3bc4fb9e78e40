//! Core constants and error types shared by every layer of the protocol.

mod constants;
mod error;

pub use constants::*;
pub use error::{ConfigError, CryptoError, DispatchError, DomainError, FramingError, HandshakeError, SessionError};
