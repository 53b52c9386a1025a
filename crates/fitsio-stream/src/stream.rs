//! Asynchronous HDU reader and writer over a byte stream.
//!
//! Each reader/writer owns one [`BlockBuffer`] and its stream behind a
//! `tokio` mutex, so at most one HDU operation runs per instance at a time.
//! Public methods take the lock once; the steps they are built from live on
//! [`Locked`], which can only be obtained from the guard and therefore never
//! locks again.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::block::{Blob, BlockState, BLOCK_SIZE, DATA_PAD_BYTE};
use crate::buffer::BlockBuffer;
use crate::descriptor::resolve;
use crate::error::{Error, Result};
use crate::hdu::Hdu;
use crate::header::{serialize_header, Card};

/// Default shared buffer size, in blocks.
pub const DEFAULT_BUFFER_BLOCKS: usize = 16;

/// Run-time settings for [`FitsReader`] and [`FitsWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Shared buffer size in 2880-byte blocks (at least 1).
    pub buffer_blocks: usize,
    /// Hand the stream back from `close` instead of shutting it down.
    pub leave_open: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            buffer_blocks: DEFAULT_BUFFER_BLOCKS,
            leave_open: false,
        }
    }
}

impl StreamOptions {
    pub fn with_buffer_blocks(mut self, blocks: usize) -> Self {
        self.buffer_blocks = blocks;
        self
    }

    pub fn with_leave_open(mut self, leave_open: bool) -> Self {
        self.leave_open = leave_open;
        self
    }
}

/// State guarded by the instance mutex.
#[derive(Debug)]
struct Shared<S> {
    stream: S,
    buffer: BlockBuffer,
    /// Bytes handed out (reader) or produced (writer) so far.
    position: u64,
    poisoned: bool,
    leave_open: bool,
}

impl<S> Shared<S> {
    fn new(stream: S, options: StreamOptions) -> Result<Shared<S>> {
        Ok(Shared {
            stream,
            buffer: BlockBuffer::new(options.buffer_blocks)?,
            position: 0,
            poisoned: false,
            leave_open: options.leave_open,
        })
    }
}

/// Proof that the instance lock is held.
struct Locked<'a, S> {
    guard: MutexGuard<'a, Shared<S>>,
}

impl<'a, S> Locked<'a, S> {
    async fn acquire(mutex: &'a Mutex<Shared<S>>) -> Result<Locked<'a, S>> {
        let guard = mutex.lock().await;
        if guard.poisoned {
            return Err(Error::Poisoned);
        }
        Ok(Locked { guard })
    }

    /// Record the outcome of one operation, poisoning on fatal errors.
    fn settle<T>(&mut self, op: &'static str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            let fatal = e.is_fatal();
            if fatal {
                self.guard.poisoned = true;
            }
            warn!(op, error = %e, fatal, position = self.guard.position, "hdu operation failed");
        }
        result
    }
}

// ---- Reader ----

/// Reads whole HDUs from an [`AsyncRead`] stream.
#[derive(Debug)]
pub struct FitsReader<R> {
    inner: Mutex<Shared<R>>,
}

impl<R: AsyncRead + Unpin> FitsReader<R> {
    /// Reader with default options.
    pub fn new(stream: R) -> Result<FitsReader<R>> {
        FitsReader::with_options(stream, StreamOptions::default())
    }

    pub fn with_options(stream: R, options: StreamOptions) -> Result<FitsReader<R>> {
        Ok(FitsReader {
            inner: Mutex::new(Shared::new(stream, options)?),
        })
    }

    /// Read the next HDU.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly at an HDU boundary.
    /// The payload is returned in native byte order.
    pub async fn read_hdu(&self) -> Result<Option<Hdu>> {
        let mut locked = Locked::acquire(&self.inner).await?;
        let result = locked.read_hdu().await;
        locked.settle("read_hdu", result)
    }

    /// Read HDUs until the stream ends.
    pub async fn read_all(&self) -> Result<Vec<Hdu>> {
        let mut locked = Locked::acquire(&self.inner).await?;
        let mut hdus = Vec::new();
        loop {
            let result = locked.read_hdu().await;
            match locked.settle("read_all", result)? {
                Some(hdu) => hdus.push(hdu),
                None => return Ok(hdus),
            }
        }
    }

    /// Discard one physical block. Returns `false` at end of stream.
    ///
    /// After a [`Error::HeaderNeverClosed`] failure the offending block is
    /// left at the front of the buffer; this steps past it.
    pub async fn skip_block(&self) -> Result<bool> {
        let mut locked = Locked::acquire(&self.inner).await?;
        let result = locked.next_block().await.map(|raw| raw.is_some());
        locked.settle("skip_block", result)
    }

    /// Bytes consumed so far. A multiple of 2880 between operations.
    pub async fn position(&self) -> u64 {
        self.inner.lock().await.position
    }

    /// Release the reader. The stream comes back only with `leave_open`.
    pub fn close(self) -> Option<R> {
        let shared = self.inner.into_inner();
        shared.leave_open.then_some(shared.stream)
    }
}

impl<R: AsyncRead + Unpin> Locked<'_, R> {
    /// Make sure at least `n` bytes are buffered. Returns `false` if the
    /// stream ended first.
    async fn ensure(&mut self, n: usize) -> Result<bool> {
        let shared = &mut *self.guard;
        while shared.buffer.len() < n {
            if shared.buffer.fill_from(&mut shared.stream).await? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Take the next physical block out of the buffer. `None` at a clean end
    /// of stream; a partial block is a short read.
    async fn next_block(&mut self) -> Result<Option<Box<[u8; BLOCK_SIZE]>>> {
        if !self.ensure(BLOCK_SIZE).await? {
            let available = self.guard.buffer.len();
            if available == 0 {
                return Ok(None);
            }
            return Err(Error::ShortRead {
                expected: BLOCK_SIZE,
                available,
            });
        }
        let shared = &mut *self.guard;
        let mut raw = Box::new([0u8; BLOCK_SIZE]);
        raw.copy_from_slice(&shared.buffer.as_slice()[..BLOCK_SIZE]);
        shared.buffer.consume(BLOCK_SIZE)?;
        shared.position += BLOCK_SIZE as u64;
        trace!(position = shared.position, "block pulled");
        Ok(Some(raw))
    }

    /// Push a block back to the front of the buffer.
    fn unread_block(&mut self, raw: &[u8; BLOCK_SIZE]) -> Result<()> {
        let shared = &mut *self.guard;
        shared.buffer.unread(raw)?;
        shared.position -= BLOCK_SIZE as u64;
        Ok(())
    }

    /// Accumulate header blocks up to and including the one holding `END`.
    /// Returns the records before `END` and the number of blocks read, or
    /// `None` if the stream ended before the first block.
    async fn scan_header(&mut self) -> Result<Option<(Vec<Card>, usize)>> {
        let mut cards: Vec<Card> = Vec::new();
        let mut blocks = 0;
        let mut blob = Blob::new();
        loop {
            let raw = match self.next_block().await? {
                Some(raw) => raw,
                None if blocks == 0 => return Ok(None),
                None => {
                    return Err(Error::ShortRead {
                        expected: BLOCK_SIZE,
                        available: 0,
                    })
                }
            };
            blob.reset();
            let state = blob.try_initialize(&raw[..])?;
            if state != BlockState::Header {
                self.unread_block(&raw)?;
                return Err(Error::HeaderNeverClosed {
                    cards_seen: cards.len(),
                    block: state,
                });
            }
            blocks += 1;
            let block_cards = blob.cards()?;
            if let Some(end) = block_cards.iter().position(Card::is_end) {
                cards.extend(block_cards.into_iter().take(end));
                return Ok(Some((cards, blocks)));
            }
            cards.extend(block_cards);
        }
    }

    /// Copy `byte_size` payload bytes out of the stream and drop the padding
    /// up to `aligned_size`.
    async fn fill_data(&mut self, byte_size: usize, aligned_size: usize) -> Result<Vec<u8>> {
        // Grows only as bytes arrive.
        let mut data = Vec::new();
        let mut supplied = 0;
        while supplied < aligned_size {
            let shared = &mut *self.guard;
            if shared.buffer.is_empty() && shared.buffer.fill_from(&mut shared.stream).await? == 0
            {
                return Err(Error::ShortRead {
                    expected: aligned_size,
                    available: supplied,
                });
            }
            let take = shared.buffer.len().min(aligned_size - supplied);
            let keep = take.min(byte_size.saturating_sub(supplied));
            data.extend_from_slice(&shared.buffer.as_slice()[..keep]);
            shared.buffer.consume(take)?;
            shared.position += take as u64;
            supplied += take;
        }
        Ok(data)
    }

    async fn read_hdu(&mut self) -> Result<Option<Hdu>> {
        let Some((cards, blocks)) = self.scan_header().await? else {
            debug!(position = self.guard.position, "end of stream");
            return Ok(None);
        };
        let mut descriptor = resolve(&cards)?;
        descriptor.key_count = blocks * crate::block::CARDS_PER_BLOCK;
        debug!(
            cards = cards.len(),
            bytes = descriptor.byte_size(),
            position = self.guard.position,
            "header closed"
        );

        let data = self
            .fill_data(descriptor.byte_size(), descriptor.aligned_size())
            .await?;
        let mut hdu = Hdu::from_resolved(descriptor, cards, data, false)?;
        hdu.normalize_endianness()?;
        debug!(
            cards = hdu.cards().len(),
            bytes = hdu.bytes().len(),
            position = self.guard.position,
            "hdu read"
        );
        Ok(Some(hdu))
    }
}

// ---- Writer ----

/// Writes whole HDUs to an [`AsyncWrite`] stream.
#[derive(Debug)]
pub struct FitsWriter<W> {
    inner: Mutex<Shared<W>>,
}

impl<W: AsyncWrite + Unpin> FitsWriter<W> {
    /// Writer with default options.
    pub fn new(stream: W) -> Result<FitsWriter<W>> {
        FitsWriter::with_options(stream, StreamOptions::default())
    }

    pub fn with_options(stream: W, options: StreamOptions) -> Result<FitsWriter<W>> {
        Ok(FitsWriter {
            inner: Mutex::new(Shared::new(stream, options)?),
        })
    }

    /// Write one HDU and flush it.
    pub async fn write_hdu(&self, hdu: &Hdu) -> Result<()> {
        let header = hdu.header_bytes()?;
        let data = hdu.to_stream_bytes()?;
        let mut locked = Locked::acquire(&self.inner).await?;
        let result = locked.write_unit(&header, &data).await;
        locked.settle("write_hdu", result)
    }

    /// Write a header built from `cards` followed by `data`, which must
    /// already be in big-endian file order.
    pub async fn write_cards(&self, cards: &[Card], data: &[u8]) -> Result<()> {
        let descriptor = resolve(cards)?;
        if data.len() != descriptor.byte_size() {
            return Err(Error::DataSizeMismatch {
                expected: descriptor.byte_size(),
                actual: data.len(),
            });
        }
        let header = serialize_header(cards)?;
        let mut locked = Locked::acquire(&self.inner).await?;
        let result = locked.write_unit(&header, data).await;
        locked.settle("write_cards", result)
    }

    /// Bytes written so far. A multiple of 2880 between operations.
    pub async fn position(&self) -> u64 {
        self.inner.lock().await.position
    }

    /// Flush and release the writer. With `leave_open` the stream is handed
    /// back; otherwise it is shut down.
    pub async fn close(self) -> Result<Option<W>> {
        let mut shared = self.inner.into_inner();
        if !shared.buffer.is_empty() {
            shared.buffer.drain_to(&mut shared.stream).await?;
        }
        shared.stream.flush().await?;
        if shared.leave_open {
            return Ok(Some(shared.stream));
        }
        shared.stream.shutdown().await?;
        Ok(None)
    }
}

impl<W: AsyncWrite + Unpin> Locked<'_, W> {
    /// Queue bytes through the buffer, draining whenever it fills.
    async fn push(&mut self, mut bytes: &[u8]) -> Result<()> {
        let shared = &mut *self.guard;
        while !bytes.is_empty() {
            let n = shared.buffer.extend(bytes);
            bytes = &bytes[n..];
            shared.position += n as u64;
            if shared.buffer.spare() == 0 {
                shared.buffer.drain_to(&mut shared.stream).await?;
            }
        }
        Ok(())
    }

    async fn pad_data(&mut self, len: usize) -> Result<()> {
        let padding = crate::block::padded_byte_len(len) - len;
        if padding > 0 {
            self.push(&vec![DATA_PAD_BYTE; padding]).await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let shared = &mut *self.guard;
        shared.buffer.drain_to(&mut shared.stream).await?;
        shared.stream.flush().await?;
        Ok(())
    }

    async fn write_unit(&mut self, header: &[u8], data: &[u8]) -> Result<()> {
        self.push(header).await?;
        self.push(data).await?;
        self.pad_data(data.len()).await?;
        self.flush().await?;
        debug!(
            cards = header.len() / crate::block::CARD_SIZE,
            bytes = data.len(),
            position = self.guard.position,
            "hdu written"
        );
        Ok(())
    }
}
