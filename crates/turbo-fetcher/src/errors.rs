//! Error types for the fetcher library.
//!
//! Library crates return typed errors (`thiserror`); the CLI binary folds
//! them into `anyhow` at its boundary.

use crate::buffer::BufferError;

/// Errors produced while planning, transporting, or streaming a download.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Invalid user-supplied configuration, detected before any network I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// The size probe failed to produce a usable content length.
    #[error("unable to determine file size")]
    Sizing,

    /// A network-level failure surfaced by the HTTP client.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with an error status.
    #[error("unexpected HTTP status {status} from {url}")]
    Http {
        /// The HTTP status code received.
        status: u16,
        /// The request URL.
        url: String,
    },

    /// A chunk body ended before (or after) the requested range was served.
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead {
        /// Bytes the range demanded.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },

    /// Every retry attempt for a request failed.
    #[error("failed to download {url} after {retries} retries")]
    RetriesExhausted {
        /// The request URL.
        url: String,
        /// The configured retry budget.
        retries: u32,
    },

    /// The operation was cancelled before it could complete.
    #[error("operation cancelled")]
    Cancelled,

    /// A chunk task ended abnormally (panic or runtime shutdown).
    #[error("chunk task aborted: {0}")]
    TaskAborted(String),

    /// The stream was closed and can no longer be used.
    #[error("stream is closed")]
    Closed,

    /// A chunk buffer rejected an operation or was poisoned by a failed
    /// download task.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Filesystem-level failure while writing or extracting the result.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
