//! Plaintext length-prefixed framing (C1).
//!
//! A frame is `LEN10 ‖ PAYLOAD` where `LEN10` is ten zero-padded ASCII
//! decimal digits giving the byte length of `PAYLOAD`. This framing is used
//! verbatim on the raw socket during `control/init`, and again inside every
//! encrypted block to delimit the JSON payload from its padding.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::core::{FramingError, HEADER_SIZE};

/// Read exactly `nbytes` from `stream`, or fail with [`FramingError::ConnectionClosed`].
pub async fn read_exact<R>(stream: &mut R, nbytes: usize) -> Result<Vec<u8>, FramingError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = vec![0u8; nbytes];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|_| FramingError::ConnectionClosed)?;
    Ok(buf)
}

/// Prefix `payload` with its ten-digit zero-padded decimal length.
pub fn pack_plaintext_bytes(payload: &[u8]) -> Vec<u8> {
    let mut framed = format!("{:0width$}", payload.len(), width = HEADER_SIZE).into_bytes();
    framed.extend_from_slice(payload);
    framed
}

/// Serialize `value` as JSON and frame it.
pub fn pack_plaintext<T: serde::Serialize>(value: &T) -> Vec<u8> {
    let json = serde_json::to_vec(value).expect("JSON-RPC messages are always serializable");
    pack_plaintext_bytes(&json)
}

/// Parse a ten-digit ASCII decimal length header.
pub fn parse_header(header: &[u8]) -> Result<usize, FramingError> {
    let text = std::str::from_utf8(header)
        .map_err(|e| FramingError::Malformed(e.to_string()))?;
    text.parse::<usize>()
        .map_err(|e| FramingError::Malformed(e.to_string()))
}

/// Write a framed JSON message to `stream`.
pub async fn send_plaintext<W, T>(stream: &mut W, value: &T) -> Result<(), FramingError>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let framed = pack_plaintext(value);
    stream
        .write_all(&framed)
        .await
        .map_err(|_| FramingError::ConnectionClosed)
}

/// Read one framed JSON message from `stream`.
pub async fn recv_plaintext<R, T>(stream: &mut R) -> Result<T, FramingError>
where
    R: tokio::io::AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let header = read_exact(stream, HEADER_SIZE).await?;
    let len = parse_header(&header)?;
    let payload = read_exact(stream, len).await?;
    serde_json::from_slice(&payload).map_err(|e| FramingError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[tokio::test]
    async fn pack_then_parse_roundtrips() {
        let framed = pack_plaintext_bytes(b"hello");
        assert_eq!(&framed[..HEADER_SIZE], b"0000000005");
        let mut cursor = Cursor::new(framed);
        let header = read_exact(&mut cursor, HEADER_SIZE).await.unwrap();
        let len = parse_header(&header).unwrap();
        assert_eq!(len, 5);
        let payload = read_exact(&mut cursor, len).await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn recv_plaintext_parses_json() {
        let value = json!({"id": 1, "method": "control/init", "params": {}});
        let framed = pack_plaintext(&value);
        let mut cursor = Cursor::new(framed);
        let parsed: serde_json::Value = recv_plaintext(&mut cursor).await.unwrap();
        assert_eq!(parsed, value);
    }

    #[tokio::test]
    async fn short_read_is_connection_closed() {
        let mut cursor = Cursor::new(b"000000".to_vec());
        let err = read_exact(&mut cursor, HEADER_SIZE).await.unwrap_err();
        assert!(matches!(err, FramingError::ConnectionClosed));
    }

    #[test]
    fn non_decimal_header_is_malformed() {
        let err = parse_header(b"not-a-num!").unwrap_err();
        assert!(matches!(err, FramingError::Malformed(_)));
    }
}
