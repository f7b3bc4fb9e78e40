//! Client library for connecting to and issuing RPCs against a Numscull server (C7).

mod client;

pub use client::{Client, ClientError, DEFAULT_PORT};
