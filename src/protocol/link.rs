//! Link framing used when frames travel over a byte stream

use crate::protocol::error::ProtocolError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, trace};

fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Largest frame carried over the link
pub const MAX_LINK_FRAME: usize = 64 * 1024;

/// Fixed-size link header (8 bytes)
#[derive(Debug, Clone)]
pub struct LinkHeader {
    pub payload_len: u32,
    pub checksum: u32,
}

impl LinkHeader {
    pub const SIZE: usize = 8;

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            error!("Link header too short: {} bytes", buf.len());
            return Err(ProtocolError::Truncated);
        }

        Ok(Self {
            payload_len: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            checksum: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<Vec<u8>> {
    let mut header_buf = [0u8; LinkHeader::SIZE];
    reader.read_exact(&mut header_buf).await?;
    let header = LinkHeader::decode(&header_buf)?;

    let len = header.payload_len as usize;
    if len > MAX_LINK_FRAME {
        error!("Link frame too large: {} bytes", len);
        return Err(anyhow::anyhow!("Link frame too large: {} bytes", len));
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut payload).await?;
    }

    let computed = crc32(&payload);
    if computed != header.checksum {
        error!("Checksum mismatch: expected={:x}, computed={:x}", header.checksum, computed);
        return Err(anyhow::anyhow!("Checksum mismatch"));
    }

    trace!("Link frame in: {}", hex::encode(&payload));
    Ok(payload)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> anyhow::Result<()> {
    if payload.len() > MAX_LINK_FRAME {
        return Err(anyhow::anyhow!("Link frame too large: {} bytes", payload.len()));
    }

    let header = LinkHeader {
        payload_len: payload.len() as u32,
        checksum: crc32(payload),
    };

    trace!("Link frame out: {}", hex::encode(payload));
    writer.write_all(&header.encode()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_survives_the_link() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"CHUNK_COMPLETE").await.unwrap();
        let payload = read_frame(&mut b).await.unwrap();
        assert_eq!(payload, b"CHUNK_COMPLETE");
    }

    #[tokio::test]
    async fn corrupted_payload_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let header = LinkHeader { payload_len: 3, checksum: crc32(b"abc") };
        a.write_all(&header.encode()).await.unwrap();
        a.write_all(b"abd").await.unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn oversized_length_is_rejected_before_reading() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let header = LinkHeader { payload_len: (MAX_LINK_FRAME + 1) as u32, checksum: 0 };
        a.write_all(&header.encode()).await.unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }
}
