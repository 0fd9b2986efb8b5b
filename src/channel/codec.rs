//! Native-messaging framing over any `AsyncRead`/`AsyncWrite` stream.
//!
//! Each message is a `u32` little-endian byte length followed by a UTF-8
//! JSON body.

use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RelayError;

const INITIAL_BUF_CAPACITY: usize = 8 * 1024;
const LENGTH_PREFIX: usize = 4;

/// Largest message accepted from the peer.
pub const MAX_INBOUND_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Largest message the browser accepts from a native host.
pub const MAX_OUTBOUND_FRAME_LEN: usize = 1024 * 1024;

/// Buffered reader yielding complete message bodies.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUF_CAPACITY),
        }
    }

    /// Read the next message body. Returns `None` on clean EOF.
    pub async fn read_message(&mut self) -> Result<Option<BytesMut>, RelayError> {
        loop {
            if let Some(body) = self.try_split_message()? {
                return Ok(Some(body));
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(RelayError::Frame(
                    "connection closed with incomplete frame".to_string(),
                ));
            }
        }
    }

    /// Read and deserialize the next JSON message.
    pub async fn read_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>, RelayError> {
        match self.read_message().await? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }

    fn try_split_message(&mut self) -> Result<Option<BytesMut>, RelayError> {
        if self.buf.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&self.buf[..LENGTH_PREFIX]);
        let len = u32::from_le_bytes(prefix) as usize;
        if len > MAX_INBOUND_FRAME_LEN {
            return Err(RelayError::Frame(format!(
                "inbound frame of {len} bytes exceeds limit of {MAX_INBOUND_FRAME_LEN}"
            )));
        }
        if self.buf.len() < LENGTH_PREFIX + len {
            self.buf.reserve(LENGTH_PREFIX + len - self.buf.len());
            return Ok(None);
        }
        self.buf.advance(LENGTH_PREFIX);
        Ok(Some(self.buf.split_to(len)))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writer emitting length-prefixed JSON messages.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one message body and flush.
    pub async fn write_message(&mut self, body: &[u8]) -> Result<(), RelayError> {
        if body.len() > MAX_OUTBOUND_FRAME_LEN {
            return Err(RelayError::Frame(format!(
                "outbound frame of {} bytes exceeds limit of {MAX_OUTBOUND_FRAME_LEN}",
                body.len()
            )));
        }
        let len = body.len() as u32;
        self.inner.write_all(&len.to_le_bytes()).await?;
        self.inner.write_all(body).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Serialize `value` as JSON and write it as one message.
    pub async fn write_json<T: Serialize>(&mut self, value: &T) -> Result<(), RelayError> {
        let body = serde_json::to_vec(value)?;
        self.write_message(&body).await
    }

    pub async fn shutdown(&mut self) -> Result<(), RelayError> {
        self.inner.shutdown().await?;
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

    #[tokio::test]
    async fn reader_sees_messages_then_clean_eof() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer.write_json(&json!({"n": 1})).await.unwrap();
        writer.write_message(b"{\"n\":2}").await.unwrap();
        drop(writer);

        let first: serde_json::Value = reader.read_json().await.unwrap().unwrap();
        assert_eq!(first["n"], 1);
        let second: serde_json::Value = reader.read_json().await.unwrap().unwrap();
        assert_eq!(second["n"], 2);
        assert!(reader.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn length_prefix_is_little_endian() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client);
        writer.write_message(b"abc").await.unwrap();

        let mut raw = [0u8; 7];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw[..4], &[3, 0, 0, 0]);
        assert_eq!(&raw[4..], b"abc");
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&10u32.to_le_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let mut reader = FrameReader::new(server);
        let err = reader.read_message().await.unwrap_err();
        assert!(matches!(err, RelayError::Frame(msg) if msg.contains("incomplete")));
    }

    #[tokio::test]
    async fn oversized_outbound_frame_is_rejected() {
        let (client, _server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client);
        let body = vec![b'x'; MAX_OUTBOUND_FRAME_LEN + 1];
        let err = writer.write_message(&body).await.unwrap_err();
        assert!(matches!(err, RelayError::Frame(_)));
    }
}
