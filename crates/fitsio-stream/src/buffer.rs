//! The compacting block buffer shared by the reader and writer.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::block::BLOCK_SIZE;
use crate::error::{Error, Result};

/// Fixed-capacity byte buffer holding whole 2880-byte blocks.
///
/// Valid bytes always start at offset 0: every [`BlockBuffer::consume`]
/// shifts the remainder to the front and zeroes the freed tail, so the next
/// fill lands directly after the valid region.
#[derive(Debug)]
pub struct BlockBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl BlockBuffer {
    /// Allocate a buffer of `blocks` physical blocks.
    pub fn new(blocks: usize) -> Result<BlockBuffer> {
        if blocks == 0 {
            return Err(Error::BufferContractViolation(
                "buffer must hold at least one block",
            ));
        }
        Ok(BlockBuffer {
            data: vec![0u8; blocks * BLOCK_SIZE].into_boxed_slice(),
            len: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Room left after the valid bytes.
    pub fn spare(&self) -> usize {
        self.capacity() - self.len
    }

    /// The valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Issue one read from `reader` into the spare tail. Returns the byte
    /// count; 0 means end of stream.
    pub async fn fill_from<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<usize> {
        if self.spare() == 0 {
            return Err(Error::BufferContractViolation("fill requested on a full buffer"));
        }
        let n = reader.read(&mut self.data[self.len..]).await?;
        self.len += n;
        tracing::trace!(read = n, buffered = self.len, "buffer filled");
        Ok(n)
    }

    /// Drop the first `n` valid bytes and compact.
    pub fn consume(&mut self, n: usize) -> Result<()> {
        if n > self.len {
            return Err(Error::BufferContractViolation(
                "consume past the valid region",
            ));
        }
        self.data.copy_within(n..self.len, 0);
        let remaining = self.len - n;
        self.data[remaining..self.len].fill(0);
        self.len = remaining;
        Ok(())
    }

    /// Push bytes back in front of the valid region.
    pub fn unread(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.spare() {
            return Err(Error::BufferContractViolation(
                "no room to push bytes back",
            ));
        }
        self.data.copy_within(0..self.len, bytes.len());
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Append as much of `bytes` as fits; returns how many were taken.
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.spare());
        self.data[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        n
    }

    /// Write every valid byte to `writer` and empty the buffer.
    pub async fn drain_to<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<usize> {
        let n = self.len;
        writer.write_all(&self.data[..n]).await?;
        self.consume(n)?;
        tracing::trace!(written = n, "buffer drained");
        Ok(n)
    }
}
