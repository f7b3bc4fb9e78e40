//! Encrypted block stream (C2).
//!
//! Post-handshake traffic is a concatenation of 528-byte ciphertext blocks.
//! Each direction is sealed under its own ephemeral Box keypair with an
//! independent, strictly increasing 64-bit nonce counter.

use crypto_box::aead::{Aead, AeadCore};
use crypto_box::{Nonce, PublicKey, SalsaBox, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::{
    CryptoError, FramingError, BLOCK_SIZE, ENCRYPTED_BLOCK_SIZE, HEADER_SIZE, KEY_LEN,
    MAX_FRAMED_IN_BLOCK, NONCE_LEN, SessionError,
};
use crate::transport::{pack_plaintext, parse_header};

use super::keys::public_key_from;

/// Encode a 64-bit counter as the 24-byte nonce used throughout the protocol:
/// little-endian counter, then 16 zero bytes.
pub fn counter_nonce(counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Seal one 512-byte plaintext block under an arbitrary NaCl Box, with a
/// fully random nonce. Used only during the handshake's ephemeral pushes.
pub fn seal_with_random_nonce(
    plaintext: &[u8; BLOCK_SIZE],
    their_pk: &[u8; KEY_LEN],
    our_sk: &[u8; KEY_LEN],
) -> ([u8; NONCE_LEN], Vec<u8>) {
    let salsa_box = SalsaBox::new(&public_key_from(their_pk), &SecretKey::from(*our_sk));
    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let ciphertext = salsa_box
        .encrypt(&nonce, plaintext.as_slice())
        .expect("sealing a fixed-size block cannot fail");
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce.as_slice());
    (nonce_bytes, ciphertext)
}

/// Open a block sealed by [`seal_with_random_nonce`].
pub fn open_with_nonce(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
    their_pk: &[u8; KEY_LEN],
    our_sk: &[u8; KEY_LEN],
) -> Result<[u8; BLOCK_SIZE], CryptoError> {
    let salsa_box = SalsaBox::new(&public_key_from(their_pk), &SecretKey::from(*our_sk));
    let nonce = Nonce::from_slice(nonce);
    let plaintext = salsa_box
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    plaintext
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed)
}

fn build_block(framed_chunk: &[u8]) -> [u8; BLOCK_SIZE] {
    assert!(framed_chunk.len() <= MAX_FRAMED_IN_BLOCK, "chunk exceeds one block");
    let mut block = [0u8; BLOCK_SIZE];
    block[0..2].copy_from_slice(&(framed_chunk.len() as u16).to_le_bytes());
    block[2..2 + framed_chunk.len()].copy_from_slice(framed_chunk);
    OsRng.fill_bytes(&mut block[2 + framed_chunk.len()..]);
    block
}

/// One simplex direction's key material and nonce counter.
struct Simplex {
    our_sk: SecretKey,
    their_pk: PublicKey,
    counter: u64,
}

impl Simplex {
    fn new(our_sk: [u8; KEY_LEN], their_pk: [u8; KEY_LEN]) -> Self {
        Self {
            our_sk: SecretKey::from(our_sk),
            their_pk: public_key_from(&their_pk),
            counter: 1,
        }
    }

    fn next_nonce(&mut self) -> Result<[u8; NONCE_LEN], CryptoError> {
        let nonce = counter_nonce(self.counter);
        self.counter = self.counter.checked_add(1).ok_or(CryptoError::CounterExhausted)?;
        Ok(nonce)
    }
}

/// A pair of independent one-way encrypted streams over one TCP connection.
///
/// Sealing uses the send simplex's keys; opening uses the recv simplex's
/// keys. Both directions maintain their own nonce counter starting at 1.
pub struct EncryptedChannel {
    send: Simplex,
    recv: Simplex,
}

impl EncryptedChannel {
    /// Construct a channel from the four keys produced by the handshake.
    pub fn new(
        ours_send_sk: [u8; KEY_LEN],
        theirs_send_pk: [u8; KEY_LEN],
        ours_recv_sk: [u8; KEY_LEN],
        theirs_recv_pk: [u8; KEY_LEN],
    ) -> Self {
        Self {
            send: Simplex::new(ours_send_sk, theirs_send_pk),
            recv: Simplex::new(ours_recv_sk, theirs_recv_pk),
        }
    }

    /// Serialize `value` to JSON, frame it, and send it across one or more blocks.
    pub async fn send<W, T>(&mut self, stream: &mut W, value: &T) -> Result<(), SessionError>
    where
        W: AsyncWrite + Unpin,
        T: serde::Serialize,
    {
        let framed = pack_plaintext(value);
        let mut offset = 0usize;
        loop {
            let end = (offset + MAX_FRAMED_IN_BLOCK).min(framed.len());
            let chunk = &framed[offset..end];
            let block = build_block(chunk);
            let nonce = self.send.next_nonce()?;
            let salsa_box = SalsaBox::new(&self.send.their_pk, &self.send.our_sk);
            let ciphertext = salsa_box
                .encrypt(Nonce::from_slice(&nonce), block.as_slice())
                .expect("sealing a fixed-size block cannot fail");
            stream
                .write_all(&ciphertext)
                .await
                .map_err(|_| FramingError::ConnectionClosed)?;
            offset = end;
            if offset >= framed.len() {
                break;
            }
        }
        Ok(())
    }

    /// Decrypt one block, returning its announced framed-region contribution.
    async fn recv_block<R>(&mut self, stream: &mut R) -> Result<Vec<u8>, SessionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut ciphertext = [0u8; ENCRYPTED_BLOCK_SIZE];
        stream
            .read_exact(&mut ciphertext)
            .await
            .map_err(|_| FramingError::ConnectionClosed)?;
        let nonce = self.recv.next_nonce()?;
        let salsa_box = SalsaBox::new(&self.recv.their_pk, &self.recv.our_sk);
        let plaintext = salsa_box
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let msg_len = u16::from_le_bytes([plaintext[0], plaintext[1]]) as usize;
        if 2 + msg_len > plaintext.len() {
            return Err(FramingError::ProtocolViolation.into());
        }
        Ok(plaintext[2..2 + msg_len].to_vec())
    }

    /// Receive, decrypt, and reassemble one JSON-RPC message (possibly
    /// spanning multiple blocks per §4.2).
    pub async fn recv<R, T>(&mut self, stream: &mut R) -> Result<T, SessionError>
    where
        R: AsyncRead + Unpin,
        T: serde::de::DeserializeOwned,
    {
        let first = self.recv_block(stream).await?;
        if first.len() < HEADER_SIZE {
            return Err(FramingError::ProtocolViolation.into());
        }
        let json_len = parse_header(&first[..HEADER_SIZE]).map_err(|_| FramingError::ProtocolViolation)?;
        let mut json_bytes = first[HEADER_SIZE..].to_vec();
        while json_bytes.len() < json_len {
            let more = self.recv_block(stream).await?;
            json_bytes.extend_from_slice(&more);
        }
        json_bytes.truncate(json_len);
        serde_json::from_slice(&json_bytes).map_err(|e| FramingError::Malformed(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::io::Cursor;

    fn linked_channels() -> (EncryptedChannel, EncryptedChannel) {
        let a_recv = crate::crypto::Keypair::generate();
        let a_send = crate::crypto::Keypair::generate();
        let b_recv = crate::crypto::Keypair::generate();
        let b_send = crate::crypto::Keypair::generate();

        // a's "send" talks to b's "recv"; a's "recv" listens for b's "send".
        let a = EncryptedChannel::new(*a_send.secret(), *b_recv.public(), *a_recv.secret(), *b_send.public());
        let b = EncryptedChannel::new(*b_send.secret(), *a_recv.public(), *b_recv.secret(), *a_send.public());
        (a, b)
    }

    #[tokio::test]
    async fn single_block_roundtrip() {
        let (mut a, mut b) = linked_channels();
        let mut wire = Vec::new();
        let msg = json!({"id": 1, "method": "control/list/project", "params": {}});
        a.send(&mut wire, &msg).await.unwrap();
        assert_eq!(wire.len(), ENCRYPTED_BLOCK_SIZE);
        let mut cursor = Cursor::new(wire);
        let got: Value = b.recv(&mut cursor).await.unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn exact_one_block_boundary_roundtrips() {
        let (mut a, mut b) = linked_channels();
        // Build a JSON string whose framed length is exactly MAX_FRAMED_IN_BLOCK.
        let overhead = pack_plaintext(&json!({"id": 1, "method": "m", "params": {"t": ""}})).len();
        let pad_len = MAX_FRAMED_IN_BLOCK - overhead;
        let msg = json!({"id": 1, "method": "m", "params": {"t": "x".repeat(pad_len)}});
        let framed_len = pack_plaintext(&msg).len();
        assert_eq!(framed_len, MAX_FRAMED_IN_BLOCK);

        let mut wire = Vec::new();
        a.send(&mut wire, &msg).await.unwrap();
        assert_eq!(wire.len(), ENCRYPTED_BLOCK_SIZE, "must still fit in one block");
        let mut cursor = Cursor::new(wire);
        let got: Value = b.recv(&mut cursor).await.unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn two_block_message_roundtrips() {
        let (mut a, mut b) = linked_channels();
        let msg = json!({"id": 1, "method": "notes/set", "params": {"note": {"text": "x".repeat(700)}}});
        let mut wire = Vec::new();
        a.send(&mut wire, &msg).await.unwrap();
        assert_eq!(wire.len(), ENCRYPTED_BLOCK_SIZE * 2);
        let mut cursor = Cursor::new(wire);
        let got: Value = b.recv(&mut cursor).await.unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn replayed_block_is_rejected() {
        let (mut a, mut b) = linked_channels();
        let msg = json!({"id": 1, "method": "control/list/project", "params": {}});
        let mut wire = Vec::new();
        a.send(&mut wire, &msg).await.unwrap();

        let mut cursor = Cursor::new(wire.clone());
        let _first: Value = b.recv(&mut cursor).await.unwrap();

        // Replaying the exact same ciphertext must fail: the receiver's
        // counter has already advanced, so the nonce used to open it no
        // longer matches what the sender used.
        let mut replay = Cursor::new(wire);
        let err = b.recv::<_, Value>(&mut replay).await.unwrap_err();
        assert!(matches!(err, SessionError::Crypto(CryptoError::DecryptionFailed)));
    }
}
