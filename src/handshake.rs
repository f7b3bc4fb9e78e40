//! Three-phase handshake (C3): plaintext init, then mirrored ephemeral
//! key pushes sealed under the long-lived static identities.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::{FramingError, HandshakeError, BLOCK_SIZE, KEY_LEN, NONCE_LEN, PROTOCOL_VERSION};
use crate::crypto::{open_with_nonce, seal_with_random_nonce, EncryptedChannel, Keypair};
use crate::rpc::message::Request;
use crate::transport::{recv_plaintext, send_plaintext};

const EPHEMERAL_BLOCK_WIRE_LEN: usize = NONCE_LEN + BLOCK_SIZE + crate::core::TAG_LEN;

fn build_ephemeral_block(recv_pub: &[u8; KEY_LEN], send_pub: &[u8; KEY_LEN]) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[..KEY_LEN].copy_from_slice(recv_pub);
    block[KEY_LEN..2 * KEY_LEN].copy_from_slice(send_pub);
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(&mut block[2 * KEY_LEN..]);
    block
}

fn parse_ephemeral_block(block: &[u8; BLOCK_SIZE]) -> ([u8; KEY_LEN], [u8; KEY_LEN]) {
    let mut recv_pub = [0u8; KEY_LEN];
    let mut send_pub = [0u8; KEY_LEN];
    recv_pub.copy_from_slice(&block[..KEY_LEN]);
    send_pub.copy_from_slice(&block[KEY_LEN..2 * KEY_LEN]);
    (recv_pub, send_pub)
}

async fn write_ephemeral_push<W>(
    stream: &mut W,
    our_recv_pub: &[u8; KEY_LEN],
    our_send_pub: &[u8; KEY_LEN],
    their_static_pk: &[u8; KEY_LEN],
    our_static_sk: &[u8; KEY_LEN],
) -> Result<(), HandshakeError>
where
    W: AsyncWrite + Unpin,
{
    let block = build_ephemeral_block(our_recv_pub, our_send_pub);
    let (nonce, ciphertext) = seal_with_random_nonce(&block, their_static_pk, our_static_sk);
    let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    wire.extend_from_slice(&nonce);
    wire.extend_from_slice(&ciphertext);
    stream
        .write_all(&wire)
        .await
        .map_err(HandshakeError::Io)
}

async fn read_ephemeral_push<R>(
    stream: &mut R,
    their_static_pk: &[u8; KEY_LEN],
    our_static_sk: &[u8; KEY_LEN],
) -> Result<([u8; KEY_LEN], [u8; KEY_LEN]), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut wire = vec![0u8; EPHEMERAL_BLOCK_WIRE_LEN];
    stream.read_exact(&mut wire).await.map_err(HandshakeError::Io)?;
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&wire[..NONCE_LEN]);
    let block = open_with_nonce(&wire[NONCE_LEN..], &nonce, their_static_pk, our_static_sk)?;
    Ok(parse_ephemeral_block(&block))
}

/// Server side of the handshake.
///
/// `resolve_identity` looks up a claimed identity name against stored user
/// public keys (C8). Returns the established channel and the caller's
/// identity name on success.
pub async fn server_handshake<S, F>(
    stream: &mut S,
    static_keys: &Keypair,
    resolve_identity: F,
) -> Result<(EncryptedChannel, String), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce(&str) -> Option<[u8; KEY_LEN]>,
{
    let request: Request = recv_plaintext(stream).await.map_err(HandshakeError::Framing)?;
    if request.method != "control/init" {
        return Err(HandshakeError::Framing(FramingError::ProtocolViolation));
    }
    let identity = request
        .params
        .get("identity")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandshakeError::Framing(FramingError::Malformed("missing identity".into())))?
        .to_string();

    let client_static_pk = resolve_identity(&identity);
    let valid = client_static_pk.is_some();

    let response = json!({
        "id": request.id,
        "method": "control/init",
        "params": {
            "valid": valid,
            "publicKey": { "bytes": BASE64.encode(static_keys.public()) },
        },
    });
    send_plaintext(stream, &response).await.map_err(HandshakeError::Framing)?;

    let client_static_pk = match client_static_pk {
        Some(pk) => pk,
        None => return Err(HandshakeError::UnknownIdentity(identity)),
    };

    let server_recv = Keypair::generate();
    let server_send = Keypair::generate();
    write_ephemeral_push(
        stream,
        server_recv.public(),
        server_send.public(),
        &client_static_pk,
        static_keys.secret(),
    )
    .await?;

    let (client_recv_pub, client_send_pub) =
        read_ephemeral_push(stream, &client_static_pk, static_keys.secret()).await?;

    let channel = EncryptedChannel::new(
        *server_send.secret(),
        client_recv_pub,
        *server_recv.secret(),
        client_send_pub,
    );
    Ok((channel, identity))
}

/// Client side of the handshake. Returns the established channel and the
/// server's static public key (for the caller to pin/record if desired).
pub async fn client_handshake<S>(
    stream: &mut S,
    identity: &str,
    static_keys: &Keypair,
) -> Result<(EncryptedChannel, [u8; KEY_LEN]), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = json!({
        "id": 1,
        "method": "control/init",
        "params": { "identity": identity, "version": PROTOCOL_VERSION },
    });
    send_plaintext(stream, &request).await.map_err(HandshakeError::Framing)?;

    let response: serde_json::Value = recv_plaintext(stream).await.map_err(HandshakeError::Framing)?;
    let params = response
        .get("params")
        .ok_or_else(|| HandshakeError::Framing(FramingError::Malformed("missing params".into())))?;
    let valid = params.get("valid").and_then(|v| v.as_bool()).unwrap_or(false);
    let server_pk_b64 = params
        .get("publicKey")
        .and_then(|v| v.get("bytes"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandshakeError::Framing(FramingError::Malformed("missing publicKey".into())))?;
    let server_pk_vec = BASE64
        .decode(server_pk_b64)
        .map_err(|e| HandshakeError::Framing(FramingError::Malformed(e.to_string())))?;
    let server_static_pk: [u8; KEY_LEN] = server_pk_vec
        .try_into()
        .map_err(|_| HandshakeError::Framing(FramingError::Malformed("bad public key length".into())))?;

    if !valid {
        return Err(HandshakeError::UnknownIdentity(identity.to_string()));
    }

    let (server_recv_pub, server_send_pub) =
        read_ephemeral_push(stream, &server_static_pk, static_keys.secret()).await?;

    let client_recv = Keypair::generate();
    let client_send = Keypair::generate();
    write_ephemeral_push(
        stream,
        client_recv.public(),
        client_send.public(),
        &server_static_pk,
        static_keys.secret(),
    )
    .await?;

    let channel = EncryptedChannel::new(
        *client_send.secret(),
        server_recv_pub,
        *client_recv.secret(),
        server_send_pub,
    );
    Ok((channel, server_static_pk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn known_identity_completes_handshake_both_sides() {
        let server_static = Keypair::generate();
        let client_static = Keypair::generate();
        let client_pub = *client_static.public();
        let server_pub_for_client = *server_static.public();

        let (mut client_io, mut server_io) = duplex(64 * 1024);

        let server_static_clone = server_static.clone();
        let server_task = tokio::spawn(async move {
            server_handshake(&mut server_io, &server_static_clone, |name| {
                assert_eq!(name, "alice");
                Some(client_pub)
            })
            .await
        });

        let client_task = tokio::spawn(async move {
            client_handshake(&mut client_io, "alice", &client_static).await
        });

        let (mut server_channel, identity) = server_task.await.unwrap().unwrap();
        let (mut client_channel, server_pk) = client_task.await.unwrap().unwrap();

        assert_eq!(identity, "alice");
        assert_eq!(server_pk, server_pub_for_client);

        // Prove the derived channels actually agree by round-tripping a message.
        let mut wire = Vec::new();
        let msg = serde_json::json!({"id": 2, "method": "control/list/project", "params": {}});
        client_channel.send(&mut wire, &msg).await.unwrap();
        let mut cursor = std::io::Cursor::new(wire);
        let got: serde_json::Value = server_channel.recv(&mut cursor).await.unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn unknown_identity_is_rejected_after_reply() {
        let server_static = Keypair::generate();
        let client_static = Keypair::generate();

        let (mut client_io, mut server_io) = duplex(64 * 1024);

        let server_static_clone = server_static.clone();
        let server_task =
            tokio::spawn(async move { server_handshake(&mut server_io, &server_static_clone, |_| None).await });

        let client_task =
            tokio::spawn(async move { client_handshake(&mut client_io, "mallory", &client_static).await });

        let server_result = server_task.await.unwrap();
        let client_result = client_task.await.unwrap();

        assert!(matches!(server_result, Err(HandshakeError::UnknownIdentity(_))));
        assert!(matches!(client_result, Err(HandshakeError::UnknownIdentity(_))));
    }
}
