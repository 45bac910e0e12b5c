//! Frames exchanged between a [`TcpTransport`](crate::TcpTransport) and a
//! [`TcpHub`](crate::TcpHub).
//!
//! Every frame is a 4-byte big-endian length followed by a MessagePack body.
//! Requests from the client carry a `seq` that the hub echoes in its `ack`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Framing errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A frame on the hub connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client → hub: start forwarding `topic` under subscription `id`.
    #[serde(rename = "subscribe")]
    Subscribe { seq: u64, id: u64, topic: String },

    /// Client → hub: stop forwarding subscription `id`. Not acknowledged.
    #[serde(rename = "unsubscribe")]
    Unsubscribe { id: u64 },

    /// Client → hub: publish a record.
    #[serde(rename = "publish")]
    Publish {
        seq: u64,
        topic: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Hub → client: outcome of the request numbered `seq`.
    #[serde(rename = "ack")]
    Ack {
        seq: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Hub → client: a record for subscription `id`.
    #[serde(rename = "record")]
    Record {
        id: u64,
        topic: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        timestamp: u64,
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Hub → client: subscription `id` ended on the hub side.
    #[serde(rename = "end")]
    End { id: u64 },
}

/// Encode a frame with its length prefix.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, WireError> {
    let body = rmp_serde::to_vec_named(frame)?;

    if body.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(body.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);

    Ok(buf.freeze())
}

/// Write one frame and flush.
///
/// # Errors
///
/// Returns an error if encoding or the write fails.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode(frame)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean end of stream between frames.
///
/// # Errors
///
/// Returns an error on a truncated or oversized frame, or invalid data.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, WireError>
where
    R: AsyncRead + Unpin,
{
    let length = match reader.read_u32().await {
        Ok(length) => length as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if length > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(length));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(rmp_serde::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_survive_the_stream() {
        let (mut client, mut hub) = tokio::io::duplex(1024);

        let publish = Frame::Publish {
            seq: 7,
            topic: "rpcRequestTopic".to_string(),
            key: Some("id-1".to_string()),
            payload: br#"{"command":"NICK"}"#.to_vec(),
        };
        let unsubscribe = Frame::Unsubscribe { id: 3 };

        write_frame(&mut client, &publish).await.unwrap();
        write_frame(&mut client, &unsubscribe).await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut hub).await.unwrap(), Some(publish));
        assert_eq!(read_frame(&mut hub).await.unwrap(), Some(unsubscribe));
        assert_eq!(read_frame(&mut hub).await.unwrap(), None);
    }

    #[test]
    fn test_length_prefix() {
        let encoded = encode(&Frame::End { id: 1 }).unwrap();
        let length = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(length as usize, encoded.len() - LENGTH_PREFIX_SIZE);
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut writer, mut reader) = tokio::io::duplex(64);
        writer
            .write_all(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes())
            .await
            .unwrap();

        assert!(matches!(
            read_frame(&mut reader).await,
            Err(WireError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut writer, mut reader) = tokio::io::duplex(64);
        writer.write_all(&10u32.to_be_bytes()).await.unwrap();
        writer.write_all(b"abc").await.unwrap();
        drop(writer);

        assert!(matches!(read_frame(&mut reader).await, Err(WireError::Io(_))));
    }
}
