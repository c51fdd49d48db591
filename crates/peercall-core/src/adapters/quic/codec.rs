//! CBOR-based relay frame codec plus length-prefixed framing.
//!
//! Each frame on the control stream is a 4-byte big-endian length followed by
//! the CBOR body.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::signal::RelayFrame;

/// Default upper bound for a single frame body.
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024;

/// Encodes / decodes relay frames to/from bytes.
pub trait FrameCodec: Send + Sync {
    fn encode(&self, frame: &RelayFrame) -> anyhow::Result<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> anyhow::Result<RelayFrame>;
}

/// Encodes / decodes [`RelayFrame`] using CBOR (via `serde_cbor`).
pub struct CborFrameCodec;

impl FrameCodec for CborFrameCodec {
    fn encode(&self, frame: &RelayFrame) -> anyhow::Result<Vec<u8>> {
        serde_cbor::to_vec(frame).map_err(Into::into)
    }

    fn decode(&self, data: &[u8]) -> anyhow::Result<RelayFrame> {
        serde_cbor::from_slice(data).map_err(Into::into)
    }
}

pub async fn write_frame<W>(
    writer: &mut W,
    codec: &dyn FrameCodec,
    frame: &RelayFrame,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let payload = codec.encode(frame)?;
    let len = u32::try_from(payload.len())?.to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(&payload).await?;
    Ok(())
}

pub async fn read_frame<R>(
    reader: &mut R,
    codec: &dyn FrameCodec,
    max_len: usize,
) -> anyhow::Result<RelayFrame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        anyhow::bail!("frame of {len} bytes exceeds the {max_len} byte limit");
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    codec.decode(&payload)
}
