//! Wire-level framing (C1).

mod framing;

pub use framing::{
    pack_plaintext, pack_plaintext_bytes, parse_header, read_exact, recv_plaintext, send_plaintext,
};
