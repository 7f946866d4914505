//! Length-prefixed JSON wire framing.
//!
//! A message on the wire is a 10-byte zero-padded decimal ASCII length
//! header followed by that many bytes of UTF-8 JSON. This is the framing
//! every DPC transport (TLS, DTLS, WebRTC, gossip) uses underneath the
//! higher-level message envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed width of the ASCII decimal length header.
pub const HEADER_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed length header: {0}")]
    MalformedLength(String),

    #[error("payload was not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("payload was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The generic P2P message envelope carried over every transport (spec §6):
/// `{"command": str, "payload": any}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub command: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(command: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            command: command.into(),
            payload,
        }
    }
}

/// Reads length-prefixed JSON messages from an async byte stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads one framed message. Returns `Ok(None)` on a clean EOF before any
    /// header bytes arrive (a graceful close). A short read after the header
    /// has started, a non-decimal header, or invalid UTF-8/JSON payload is a
    /// `WireError` — the caller must treat the stream as unusable and close it.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, WireError> {
        let mut header = [0u8; HEADER_LEN];
        match read_exact_or_eof(&mut self.inner, &mut header).await? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Short => {
                return Err(WireError::MalformedLength(
                    "connection closed mid-header".to_string(),
                ))
            }
            ReadOutcome::Full => {}
        }

        let header_str = std::str::from_utf8(&header)?;
        let len: usize = header_str
            .trim()
            .parse()
            .map_err(|_| WireError::MalformedLength(header_str.to_string()))?;

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;

        let value: T = serde_json::from_slice(&payload)?;
        Ok(Some(value))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

enum ReadOutcome {
    Full,
    Short,
    Eof,
}

async fn read_exact_or_eof<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<ReadOutcome, std::io::Error> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(if filled == 0 {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Short
            });
        }
        filled += n;
    }
    Ok(ReadOutcome::Full)
}

/// Writes length-prefixed JSON messages to an async byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_message<T: Serialize>(&mut self, value: &T) -> Result<(), WireError> {
        let payload = serde_json::to_vec(value)?;
        let header = format!("{:0>width$}", payload.len(), width = HEADER_LEN);
        if header.len() != HEADER_LEN {
            // Payload too large to express in a 10-digit decimal length.
            return Err(WireError::MalformedLength(header));
        }
        self.inner.write_all(header.as_bytes()).await?;
        self.inner.write_all(&payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_message() {
        let mut buf = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buf);
            writer
                .write_message(&Envelope::new("HELLO", json!({"node_id": "dpc-node-abc"})))
                .await
                .unwrap();
        }

        let mut reader = FrameReader::new(Cursor::new(buf));
        let msg: Envelope = reader.read_message().await.unwrap().unwrap();
        assert_eq!(msg.command, "HELLO");
        assert_eq!(msg.payload["node_id"], "dpc-node-abc");
    }

    #[tokio::test]
    async fn clean_eof_before_header_is_none() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let msg: Option<Envelope> = reader.read_message().await.unwrap();
        assert!(msg.is_none());
    }

    #[tokio::test]
    async fn short_read_after_header_starts_is_an_error() {
        let mut reader = FrameReader::new(Cursor::new(b"0000000".to_vec()));
        let err = reader.read_message::<Envelope>().await.unwrap_err();
        assert!(matches!(err, WireError::MalformedLength(_)));
    }

    #[tokio::test]
    async fn malformed_length_header_is_an_error() {
        let mut reader = FrameReader::new(Cursor::new(b"not-a-len{}".to_vec()));
        let err = reader.read_message::<Envelope>().await.unwrap_err();
        assert!(matches!(err, WireError::MalformedLength(_)));
    }

    #[tokio::test]
    async fn invalid_json_payload_is_an_error() {
        let mut buf = Vec::new();
        let payload = b"not json";
        buf.extend_from_slice(format!("{:0>10}", payload.len()).as_bytes());
        buf.extend_from_slice(payload);

        let mut reader = FrameReader::new(Cursor::new(buf));
        let err = reader.read_message::<Envelope>().await.unwrap_err();
        assert!(matches!(err, WireError::InvalidJson(_)));
    }
}
