//! Download options.

use std::time::Duration;

use crate::resolver::DnsOverrides;

/// Default retry budget per request.
pub const DEFAULT_RETRIES: u32 = 5;

/// Default lower bound on the per-chunk byte range ("16M", decimal).
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 16_000_000;

/// Default TCP dial timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a parallel fetch.
///
/// An explicit value passed to [`crate::Downloader::new`]; the engine keeps
/// no process-wide state.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Upper bound on simultaneous chunk requests.
    pub max_concurrency: usize,
    /// Maximum retry attempts per chunk request.
    pub retries: u32,
    /// Lower bound on the size of a single chunk, in bytes.
    pub min_chunk_size: u64,
    /// TCP dial timeout.
    pub connect_timeout: Duration,
    /// Static hostname overrides applied to every connection.
    pub dns_overrides: DnsOverrides,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4 * num_cpus::get(),
            retries: DEFAULT_RETRIES,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            dns_overrides: DnsOverrides::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_default_concurrency_scales_with_cores() {
        let options = FetchOptions::default();
        assert_eq!(options.max_concurrency, 4 * num_cpus::get());
        assert!(options.max_concurrency >= 4);
    }

    #[test]
    fn test_default_numerics() {
        let options = FetchOptions::default();
        assert_eq!(options.retries, 5);
        assert_eq!(options.min_chunk_size, 16_000_000);
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
    }
}
