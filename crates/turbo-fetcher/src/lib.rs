//! Parallel range-request HTTP fetcher.
//!
//! Downloads a single resource over many concurrent connections: a `HEAD`
//! probe learns the size, a planner splits it into byte ranges, and one
//! task per range issues a `Range` GET through a retrying transport into a
//! pre-announced chunk buffer. The buffers are stitched back together by a
//! [`ChunkStream`] the caller can read while later chunks are still in
//! flight.
//!
//! ```no_run
//! # async fn run() -> Result<(), turbo_fetcher::FetchError> {
//! use turbo_fetcher::{Downloader, FetchOptions};
//!
//! let downloader = Downloader::new(FetchOptions::default())?;
//! let mut fetched = downloader.fetch("https://example.com/big.bin").await?;
//! let payload = fetched.stream.read_to_end().await?;
//! assert_eq!(payload.len() as u64, fetched.total_size);
//! # Ok(()) }
//! ```

mod buffer;
mod downloader;
mod errors;
mod extract;
mod options;
mod plan;
mod progress;
mod resolver;
mod size;
mod stream;
mod transport;

pub use buffer::{BufferError, ChunkBuffer};
pub use downloader::{Downloader, Fetch};
pub use errors::FetchError;
pub use extract::{unpack_archive, ArchiveKind};
pub use options::{
    FetchOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MIN_CHUNK_SIZE, DEFAULT_RETRIES,
};
pub use plan::ChunkPlan;
pub use progress::DownloadSummary;
pub use resolver::DnsOverrides;
pub use size::{format_bytes, parse_size};
pub use stream::ChunkStream;
pub use transport::RetryingClient;
