//! Single-chunk lazy-delivery buffer.
//!
//! A [`ChunkBuffer`] is filled once by exactly one producer (a chunk
//! download task) and then read by exactly one consumer. The consumer may
//! query metadata before the producer has finished, and every read blocks
//! on a one-shot readiness latch until the producer calls
//! [`ChunkBuffer::complete`]. The latch is a `tokio::sync::watch` edge so
//! any number of waiters observe the transition without extra
//! synchronization.

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::{pin_mut, Stream, StreamExt};
use tokio::sync::watch;

/// Errors raised by [`ChunkBuffer`] operations.
///
/// These surface to the caller of the offending operation and are never
/// retried internally.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// `peek` asked for more bytes than remain unread. The bytes that were
    /// available travel inside the error so the caller gets both the
    /// truncated slice and the overflow signal.
    #[error("peek truncated to {} available bytes", .data.len())]
    PeekTruncated {
        /// Every unread byte the buffer held at the time of the call.
        data: Vec<u8>,
    },

    /// The buffer was already marked ready; its contents are immutable.
    #[error("buffer already marked ready")]
    AlreadyCompleted,

    /// The announced size may only be published once.
    #[error("size already set")]
    SizeAlreadySet,

    /// The producer abandoned this buffer; waiting readers are unblocked
    /// with this error instead of data.
    #[error("chunk download failed: {0}")]
    Failed(String),

    /// The source stream handed to `fill_from` yielded an error.
    #[error("error reading fill source: {0}")]
    Fill(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The one-shot readiness latch. Transitions out of `Waiting` exactly once.
#[derive(Debug, Clone)]
enum Latch {
    /// The producer is still filling the buffer.
    Waiting,
    /// The producer finished; contents are final.
    Ready,
    /// The producer failed; the payload is the failure reason.
    Failed(String),
}

/// State guarded by the buffer mutex. The lock is only ever held for short
/// copies, never across an await point.
#[derive(Debug)]
struct Inner {
    /// The buffered bytes.
    data: Vec<u8>,
    /// Read cursor; always `<= data.len()`.
    offset: usize,
    /// Size announced ahead of completion, set at most once.
    announced: Option<u64>,
    /// Readiness latch state.
    latch: Latch,
}

/// A single-producer single-consumer byte buffer with a readiness gate and
/// an optional pre-announced size.
#[derive(Debug)]
pub struct ChunkBuffer {
    /// Buffer contents and latch state.
    inner: Mutex<Inner>,
    /// Fires (once) when the latch leaves `Waiting`.
    ready_tx: watch::Sender<bool>,
    /// Fires (once) when a size is announced.
    size_tx: watch::Sender<bool>,
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty buffer with a capacity hint for the final payload.
    pub fn with_capacity(capacity: usize) -> Self {
        let (ready_tx, _) = watch::channel(false);
        let (size_tx, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                data: Vec::with_capacity(capacity),
                offset: 0,
                announced: None,
                latch: Latch::Waiting,
            }),
            ready_tx,
            size_tx,
        }
    }

    /// Locks the inner state, recovering from a poisoned mutex (no code
    /// path panics while holding the lock).
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consumes `source` fully into the buffer, returning the number of
    /// bytes appended.
    ///
    /// Allowed only while the buffer is still waiting; filling a completed
    /// buffer fails with [`BufferError::AlreadyCompleted`]. Not safe to
    /// call concurrently with itself (single producer).
    pub async fn fill_from<S, B, E>(&self, source: S) -> Result<u64, BufferError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if !matches!(self.lock().latch, Latch::Waiting) {
            return Err(BufferError::AlreadyCompleted);
        }
        let mut appended: u64 = 0;
        pin_mut!(source);
        while let Some(item) = source.next().await {
            let bytes = item.map_err(|err| BufferError::Fill(err.into()))?;
            let bytes = bytes.as_ref();
            let mut inner = self.lock();
            if !matches!(inner.latch, Latch::Waiting) {
                return Err(BufferError::AlreadyCompleted);
            }
            inner.data.extend_from_slice(bytes);
            appended += bytes.len() as u64;
        }
        Ok(appended)
    }

    /// Publishes the expected final length before the fill completes, so
    /// consumers can size reads without waiting for readiness.
    ///
    /// May be called at most once.
    pub fn set_size(&self, size: u64) -> Result<(), BufferError> {
        let mut inner = self.lock();
        if inner.announced.is_some() {
            return Err(BufferError::SizeAlreadySet);
        }
        inner.announced = Some(size);
        drop(inner);
        self.size_tx.send_replace(true);
        Ok(())
    }

    /// Latches the buffer ready. Idempotent; after the first call the
    /// contents are immutable and all readers unblock.
    pub fn complete(&self) {
        let mut inner = self.lock();
        if matches!(inner.latch, Latch::Waiting) {
            inner.latch = Latch::Ready;
            drop(inner);
            self.ready_tx.send_replace(true);
        }
    }

    /// Poisons the buffer: waiting readers unblock with
    /// [`BufferError::Failed`] carrying `reason`. No effect once ready.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut inner = self.lock();
        if matches!(inner.latch, Latch::Waiting) {
            inner.latch = Latch::Failed(reason.into());
            drop(inner);
            self.ready_tx.send_replace(true);
        }
    }

    /// Non-blocking readiness probe.
    pub fn is_ready(&self) -> bool {
        matches!(self.lock().latch, Latch::Ready)
    }

    /// Blocks until the buffer is ready, or fails if the producer poisoned
    /// it.
    pub async fn wait_ready(&self) -> Result<(), BufferError> {
        loop {
            match &self.lock().latch {
                Latch::Ready => return Ok(()),
                Latch::Failed(reason) => return Err(BufferError::Failed(reason.clone())),
                Latch::Waiting => {},
            }
            let mut rx = self.ready_tx.subscribe();
            if rx.wait_for(|fired| *fired).await.is_err() {
                return Err(BufferError::Failed("readiness latch dropped".to_string()));
            }
        }
    }

    /// Copies up to `buf.len()` unread bytes into `buf`, advancing the read
    /// cursor. Returns `Ok(0)` once the buffer is drained (EOF), and
    /// `Ok(0)` immediately for an empty `buf` regardless of buffer state.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, BufferError> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.wait_ready().await?;
        let mut inner = self.lock();
        let start = inner.offset;
        let count = (inner.data.len() - start).min(buf.len());
        if count == 0 {
            return Ok(0);
        }
        buf[..count].copy_from_slice(&inner.data[start..start + count]);
        inner.offset = start + count;
        Ok(count)
    }

    /// Copies from absolute position `pos` without moving the read cursor.
    /// Returns `Ok(0)` when `pos` is at or beyond the buffered length.
    pub async fn read_at(&self, buf: &mut [u8], pos: u64) -> Result<usize, BufferError> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.wait_ready().await?;
        let inner = self.lock();
        if pos >= inner.data.len() as u64 {
            return Ok(0);
        }
        let start = pos as usize;
        let count = (inner.data.len() - start).min(buf.len());
        buf[..count].copy_from_slice(&inner.data[start..start + count]);
        Ok(count)
    }

    /// Returns the next unread byte, advancing the cursor, or `Ok(None)`
    /// once drained.
    pub async fn read_byte(&self) -> Result<Option<u8>, BufferError> {
        self.wait_ready().await?;
        let mut inner = self.lock();
        let start = inner.offset;
        match inner.data.get(start).copied() {
            Some(byte) => {
                inner.offset = start + 1;
                Ok(Some(byte))
            },
            None => Ok(None),
        }
    }

    /// Returns the next `count` unread bytes without advancing the cursor.
    ///
    /// When fewer than `count` bytes remain, the available bytes are
    /// returned inside [`BufferError::PeekTruncated`].
    pub async fn peek(&self, count: usize) -> Result<Vec<u8>, BufferError> {
        self.wait_ready().await?;
        let inner = self.lock();
        let unread = &inner.data[inner.offset..];
        if count <= unread.len() {
            Ok(unread[..count].to_vec())
        } else {
            Err(BufferError::PeekTruncated {
                data: unread.to_vec(),
            })
        }
    }

    /// Remaining length. Waits for the first of {readiness, announced size}
    /// to be established, then prefers the real unread length once ready
    /// and the announced size otherwise. Never blocks after either latch
    /// has fired.
    pub async fn len(&self) -> u64 {
        loop {
            {
                let inner = self.lock();
                match inner.latch {
                    Latch::Ready | Latch::Failed(_) => {
                        return (inner.data.len() - inner.offset) as u64;
                    },
                    Latch::Waiting => {
                        if let Some(size) = inner.announced {
                            return size;
                        }
                    },
                }
            }
            let mut ready_rx = self.ready_tx.subscribe();
            let mut size_rx = self.size_tx.subscribe();
            let closed = tokio::select! {
                res = ready_rx.wait_for(|fired| *fired) => res.is_err(),
                res = size_rx.wait_for(|fired| *fired) => res.is_err(),
            };
            if closed {
                return 0;
            }
        }
    }

    /// Full buffered length, ignoring the read cursor: the real data length
    /// once ready, otherwise the announced size. Used to map absolute
    /// offsets onto the composite stream.
    pub(crate) async fn total_len(&self) -> u64 {
        loop {
            {
                let inner = self.lock();
                match inner.latch {
                    Latch::Ready | Latch::Failed(_) => return inner.data.len() as u64,
                    Latch::Waiting => {
                        if let Some(size) = inner.announced {
                            return size;
                        }
                    },
                }
            }
            let mut ready_rx = self.ready_tx.subscribe();
            let mut size_rx = self.size_tx.subscribe();
            let closed = tokio::select! {
                res = ready_rx.wait_for(|fired| *fired) => res.is_err(),
                res = size_rx.wait_for(|fired| *fired) => res.is_err(),
            };
            if closed {
                return 0;
            }
        }
    }

    /// Returns the buffer to its pristine state: latches cleared, contents
    /// emptied, cursor at zero. Intended for pool reuse before publication.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.data.clear();
        inner.offset = 0;
        inner.announced = None;
        inner.latch = Latch::Waiting;
        drop(inner);
        self.ready_tx.send_replace(false);
        self.size_tx.send_replace(false);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use futures::stream;

    use super::*;

    /// An infallible byte stream for feeding `fill_from` in tests.
    fn byte_stream(
        parts: Vec<&'static [u8]>,
    ) -> impl Stream<Item = Result<&'static [u8], std::io::Error>> {
        stream::iter(parts.into_iter().map(Ok))
    }

    async fn filled(parts: Vec<&'static [u8]>) -> ChunkBuffer {
        let buffer = ChunkBuffer::new();
        buffer.fill_from(byte_stream(parts)).await.unwrap();
        buffer.complete();
        buffer
    }

    #[tokio::test]
    async fn test_zero_length_read_never_blocks() {
        let buffer = ChunkBuffer::new();
        // Not ready, and a zero length destination: must return instantly.
        let mut buf = [0_u8; 0];
        assert_eq!(buffer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_blocks_until_complete() {
        let buffer = std::sync::Arc::new(ChunkBuffer::new());
        let writer = buffer.clone();
        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.fill_from(byte_stream(vec![b"hello".as_slice()])).await.unwrap();
            writer.complete();
        });
        let mut buf = [0_u8; 5];
        assert_eq!(buffer.read(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf, b"hello");
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_ready_buffer_is_eof() {
        let buffer = filled(vec![]).await;
        let mut buf = [0_u8; 4];
        assert_eq!(buffer.read(&mut buf).await.unwrap(), 0);
        assert_eq!(buffer.read_byte().await.unwrap(), None);
        match buffer.peek(1).await {
            Err(BufferError::PeekTruncated { data }) => assert!(data.is_empty()),
            other => panic!("expected truncated peek, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drained_buffer_reports_eof() {
        let buffer = filled(vec![b"ab".as_slice()]).await;
        let mut buf = [0_u8; 8];
        assert_eq!(buffer.read(&mut buf).await.unwrap(), 2);
        assert_eq!(buffer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_size_twice_fails() {
        let buffer = ChunkBuffer::new();
        buffer.set_size(10).unwrap();
        assert!(matches!(
            buffer.set_size(10),
            Err(BufferError::SizeAlreadySet)
        ));
    }

    #[tokio::test]
    async fn test_fill_after_complete_fails() {
        let buffer = filled(vec![b"x".as_slice()]).await;
        let result = buffer.fill_from(byte_stream(vec![b"y".as_slice()])).await;
        assert!(matches!(result, Err(BufferError::AlreadyCompleted)));
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let buffer = filled(vec![b"abc".as_slice()]).await;
        buffer.complete();
        assert_eq!(buffer.len().await, 3);
    }

    #[tokio::test]
    async fn test_len_prefers_real_length_once_ready() {
        let buffer = ChunkBuffer::new();
        buffer.set_size(100).unwrap();
        assert_eq!(buffer.len().await, 100);
        buffer.fill_from(byte_stream(vec![b"0123456789".as_slice()])).await.unwrap();
        // Still waiting: the announced size wins.
        assert_eq!(buffer.len().await, 100);
        buffer.complete();
        assert_eq!(buffer.len().await, 10);
    }

    #[tokio::test]
    async fn test_len_decreases_with_reads() {
        let buffer = filled(vec![b"0123456789".as_slice()]).await;
        assert_eq!(buffer.len().await, 10);
        let mut buf = [0_u8; 4];
        assert_eq!(buffer.read(&mut buf).await.unwrap(), 4);
        assert_eq!(buffer.len().await, 6);
        assert_eq!(buffer.read(&mut buf).await.unwrap(), 4);
        assert_eq!(buffer.len().await, 2);
    }

    #[tokio::test]
    async fn test_peek_truncates_and_reports() {
        let buffer = filled(vec![b"abc".as_slice()]).await;
        match buffer.peek(5).await {
            Err(BufferError::PeekTruncated { data }) => assert_eq!(data, b"abc"),
            other => panic!("expected truncated peek, got {other:?}"),
        }
        // Exact and smaller requests succeed.
        assert_eq!(buffer.peek(3).await.unwrap(), b"abc");
        assert_eq!(buffer.peek(2).await.unwrap(), b"ab");
    }

    #[tokio::test]
    async fn test_peek_and_read_at_do_not_advance() {
        let buffer = filled(vec![b"0123456789".as_slice()]).await;
        assert_eq!(buffer.peek(4).await.unwrap(), b"0123");
        let mut at = [0_u8; 3];
        assert_eq!(buffer.read_at(&mut at, 5).await.unwrap(), 3);
        assert_eq!(&at, b"567");
        // The cursor has not moved.
        let mut buf = [0_u8; 4];
        assert_eq!(buffer.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"0123");
    }

    #[tokio::test]
    async fn test_read_at_beyond_length_is_eof() {
        let buffer = filled(vec![b"0123".as_slice()]).await;
        let mut buf = [0_u8; 4];
        assert_eq!(buffer.read_at(&mut buf, 4).await.unwrap(), 0);
        assert_eq!(buffer.read_at(&mut buf, 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_byte_sequence() {
        let buffer = filled(vec![b"ab".as_slice()]).await;
        assert_eq!(buffer.read_byte().await.unwrap(), Some(b'a'));
        assert_eq!(buffer.read_byte().await.unwrap(), Some(b'b'));
        assert_eq!(buffer.read_byte().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fill_source_error_propagates() {
        let buffer = ChunkBuffer::new();
        let source = stream::iter(vec![
            Ok(&b"ok"[..]),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom")),
        ]);
        assert!(matches!(
            buffer.fill_from(source).await,
            Err(BufferError::Fill(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_buffer_unblocks_readers() {
        let buffer = std::sync::Arc::new(ChunkBuffer::new());
        let producer = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.fail("connection reset");
        });
        let mut buf = [0_u8; 1];
        match buffer.read(&mut buf).await {
            Err(BufferError::Failed(reason)) => assert_eq!(reason, "connection reset"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reset_restores_pristine_state() {
        let buffer = filled(vec![b"abc".as_slice()]).await;
        buffer.reset();
        assert!(!buffer.is_ready());
        buffer.set_size(2).unwrap();
        buffer.fill_from(byte_stream(vec![b"xy".as_slice()])).await.unwrap();
        buffer.complete();
        assert_eq!(buffer.peek(2).await.unwrap(), b"xy");
    }
}
