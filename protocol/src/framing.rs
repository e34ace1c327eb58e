//! # Frame I/O
//!
//! Length-prefixed framing shared by the directory and RPC layers. Every
//! message on a WEFT connection is one frame: a `u32` big-endian length
//! followed by that many bytes of bincode payload.
//!
//! The length is validated against [`config::MAX_FRAME_SIZE`] before any
//! allocation happens. A peer announcing an absurd length is treated as a
//! protocol violation, not a memory-allocation request.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config;

/// Errors that can occur while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying transport failed or closed mid-frame.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer announced a frame larger than [`config::MAX_FRAME_SIZE`].
    #[error("oversized frame: {len} bytes (limit {limit})")]
    Oversized { len: usize, limit: usize },

    /// The frame body did not decode as the expected message type.
    #[error("frame decode error: {0}")]
    Decode(String),

    /// The message did not encode. This means a bug in the message type,
    /// not a network condition.
    #[error("frame encode error: {0}")]
    Encode(String),
}

/// Reads one length-prefixed frame and decodes it as `T`.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary — the peer hung
/// up between messages, which is how connections normally end. EOF in the
/// middle of a frame is an I/O error.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > config::MAX_FRAME_SIZE {
        return Err(FrameError::Oversized {
            len,
            limit: config::MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    bincode::deserialize(&body).map(Some).map_err(|e| FrameError::Decode(e.to_string()))
}

/// Encodes `msg` and writes it as one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(msg).map_err(|e| FrameError::Encode(e.to_string()))?;
    if body.len() > config::MAX_FRAME_SIZE {
        return Err(FrameError::Oversized {
            len: body.len(),
            limit: config::MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Probe {
        tag: String,
        body: Vec<u8>,
    }

    #[tokio::test]
    async fn roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        let msg = Probe {
            tag: "hello".into(),
            body: vec![0xAB; 1024],
        };

        write_frame(&mut a, &msg).await.unwrap();
        let got: Probe = read_frame(&mut b).await.unwrap().expect("one frame");
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn multiple_frames_in_order() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        for i in 0..5u8 {
            let msg = Probe {
                tag: format!("frame-{i}"),
                body: vec![i; 16],
            };
            write_frame(&mut a, &msg).await.unwrap();
        }
        drop(a);

        for i in 0..5u8 {
            let got: Probe = read_frame(&mut b).await.unwrap().expect("frame");
            assert_eq!(got.tag, format!("frame-{i}"));
        }
        // Clean EOF at the boundary.
        let end: Option<Probe> = read_frame(&mut b).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_rejected_before_allocation() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        // Hand-craft a length prefix way beyond the limit.
        let bogus = ((config::MAX_FRAME_SIZE + 1) as u32).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &bogus).await.unwrap();

        let res: Result<Option<Probe>, _> = read_frame(&mut b).await;
        assert!(matches!(res, Err(FrameError::Oversized { .. })));
    }

    #[tokio::test]
    async fn truncated_frame_is_io_error_not_eof() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        // Announce 100 bytes, deliver 10, hang up.
        tokio::io::AsyncWriteExt::write_all(&mut a, &100u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut a, &[0u8; 10]).await.unwrap();
        drop(a);

        let res: Result<Option<Probe>, _> = read_frame(&mut b).await;
        assert!(matches!(res, Err(FrameError::Io(_))));
    }
}
