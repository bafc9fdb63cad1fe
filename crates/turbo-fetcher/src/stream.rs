//! Composite stream over channel-delivered chunk buffers.
//!
//! A [`ChunkStream`] glues an ordered sequence of [`ChunkBuffer`]s,
//! received over a bounded channel, into one logical byte stream. The
//! producer enqueues buffers in chunk-index order, so bytes emitted by
//! sequential reads are the chunks' contents concatenated in resource
//! order - even while later chunks are still downloading.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    buffer::{BufferError, ChunkBuffer},
    errors::FetchError,
};

/// One logical read stream assembled from per-chunk buffers.
///
/// Reads advance through the buffers in arrival order, blocking on each
/// buffer's readiness latch; positioned reads and peeks never move the
/// logical cursor.
#[derive(Debug)]
pub struct ChunkStream {
    /// Receive handle for buffers still in flight.
    receiver: mpsc::Receiver<Arc<ChunkBuffer>>,
    /// Buffers pulled so far, in arrival order.
    buffers: Vec<Arc<ChunkBuffer>>,
    /// Index of the active buffer; `buffers.len()` when the next buffer has
    /// not been pulled yet.
    current: usize,
    /// Set once the channel reported closed-and-drained.
    channel_drained: bool,
    /// Set by [`ChunkStream::close`]; all later operations fail.
    closed: bool,
}

impl ChunkStream {
    /// Wraps a channel of chunk buffers. Normally called by the download
    /// engine, which guarantees chunk-index enqueue order.
    pub fn new(receiver: mpsc::Receiver<Arc<ChunkBuffer>>) -> Self {
        Self {
            receiver,
            buffers: Vec::new(),
            current: 0,
            channel_drained: false,
            closed: false,
        }
    }

    /// Fails with [`FetchError::Closed`] once the stream has been closed.
    fn ensure_open(&self) -> Result<(), FetchError> {
        if self.closed {
            return Err(FetchError::Closed);
        }
        Ok(())
    }

    /// Pulls from the channel until `buffers[index]` exists. Returns false
    /// when the channel closes first.
    async fn materialize(&mut self, index: usize) -> bool {
        while self.buffers.len() <= index {
            if self.channel_drained {
                return false;
            }
            match self.receiver.recv().await {
                Some(buffer) => self.buffers.push(buffer),
                None => {
                    self.channel_drained = true;
                    return false;
                },
            }
        }
        true
    }

    /// Materializes every remaining upstream buffer.
    async fn drain_channel(&mut self) {
        while !self.channel_drained {
            match self.receiver.recv().await {
                Some(buffer) => self.buffers.push(buffer),
                None => self.channel_drained = true,
            }
        }
    }

    /// Fills `buf` from the active buffer, advancing to the next one on
    /// per-buffer EOF, until `buf` is full or the stream ends.
    ///
    /// Returns `Ok(0)` when the stream has ended and `buf` is non-empty;
    /// returns `Ok(0)` immediately for an empty `buf`.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FetchError> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let mut filled = 0;
        while filled < buf.len() {
            if !self.materialize(self.current).await {
                break;
            }
            let count = self.buffers[self.current].read(&mut buf[filled..]).await?;
            if count == 0 {
                // Active buffer drained; move to the next one.
                self.current += 1;
                continue;
            }
            filled += count;
        }
        Ok(filled)
    }

    /// Returns the next byte of the logical stream, or `Ok(None)` at its
    /// end.
    pub async fn read_byte(&mut self) -> Result<Option<u8>, FetchError> {
        self.ensure_open()?;
        loop {
            if !self.materialize(self.current).await {
                return Ok(None);
            }
            match self.buffers[self.current].read_byte().await? {
                Some(byte) => return Ok(Some(byte)),
                None => self.current += 1,
            }
        }
    }

    /// Reads from absolute stream position `pos` without moving the logical
    /// cursor.
    ///
    /// Materializes every upstream buffer to locate the one covering `pos`,
    /// then delegates with the intra-buffer offset. Returns `Ok(0)` when
    /// `pos` is at or beyond the total length.
    pub async fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<usize, FetchError> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        self.drain_channel().await;
        let mut cumulative: u64 = 0;
        for buffer in &self.buffers {
            let total = buffer.total_len().await;
            if pos < cumulative + total {
                return Ok(buffer.read_at(buf, pos - cumulative).await?);
            }
            cumulative += total;
        }
        Ok(0)
    }

    /// Returns up to the next `count` unread bytes without advancing,
    /// walking forward across buffers. A buffer with fewer bytes than
    /// requested contributes everything it has. If the stream ends before
    /// `count` bytes are assembled the result is simply shorter.
    pub async fn peek(&mut self, count: usize) -> Result<Vec<u8>, FetchError> {
        self.ensure_open()?;
        let mut out = Vec::with_capacity(count);
        let mut index = self.current;
        while out.len() < count {
            if !self.materialize(index).await {
                break;
            }
            match self.buffers[index].peek(count - out.len()).await {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(BufferError::PeekTruncated { data }) => {
                    out.extend_from_slice(&data);
                    index += 1;
                },
                Err(err) => return Err(err.into()),
            }
        }
        Ok(out)
    }

    /// Remaining length of the logical stream: the sum of every
    /// not-yet-drained buffer's remaining length. Decreases as the caller
    /// reads.
    pub async fn len(&mut self) -> Result<u64, FetchError> {
        self.ensure_open()?;
        self.drain_channel().await;
        let mut total: u64 = 0;
        for buffer in self.buffers.iter().skip(self.current) {
            total += buffer.len().await;
        }
        Ok(total)
    }

    /// Reads the whole remaining stream into memory.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, FetchError> {
        let mut out = Vec::new();
        let mut buf = vec![0_u8; 64 * 1024];
        loop {
            let count = self.read(&mut buf).await?;
            if count == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..count]);
        }
    }

    /// Closes the stream. The first call succeeds; every subsequent
    /// operation (including a second close) fails with
    /// [`FetchError::Closed`].
    pub fn close(&mut self) -> Result<(), FetchError> {
        self.ensure_open()?;
        self.closed = true;
        self.receiver.close();
        Ok(())
    }
}
