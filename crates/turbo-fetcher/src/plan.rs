//! Chunk planning: turning a known resource size into byte ranges.

use crate::errors::FetchError;

/// An immutable download plan: how many chunks to fetch concurrently and
/// which inclusive byte range each chunk covers.
///
/// Ranges are non-overlapping, contiguous, cover `[0, total_size - 1]`, and
/// the last range always ends at `total_size - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Number of chunk requests to issue.
    pub concurrency: usize,
    /// Nominal chunk size; the last chunk absorbs the remainder.
    pub chunk_size: u64,
    /// Total resource size from the size probe.
    pub total_size: u64,
    /// Inclusive `(start, end)` byte ranges, in resource order.
    pub ranges: Vec<(u64, u64)>,
}

impl ChunkPlan {
    /// Computes the plan for a resource of `total_size` bytes, using at
    /// most `max_concurrency` chunks of at least `min_chunk_size` bytes.
    ///
    /// A zero `total_size` means the size probe failed and is rejected;
    /// zero bounds are configuration errors.
    pub fn compute(
        total_size: u64,
        max_concurrency: usize,
        min_chunk_size: u64,
    ) -> Result<Self, FetchError> {
        if total_size == 0 {
            return Err(FetchError::Sizing);
        }
        if max_concurrency == 0 {
            return Err(FetchError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if min_chunk_size == 0 {
            return Err(FetchError::Config(
                "minimum chunk size must be at least 1 byte".to_string(),
            ));
        }

        let chunk_size = min_chunk_size.max(total_size / max_concurrency as u64);
        let concurrency = (max_concurrency as u64).min(total_size.div_ceil(chunk_size)) as usize;

        let mut ranges = Vec::with_capacity(concurrency);
        for index in 0..concurrency as u64 {
            let start = index * chunk_size;
            let end = start + chunk_size - 1;
            ranges.push((start, end));
        }
        if let Some(last) = ranges.last_mut() {
            last.1 = total_size - 1;
        }

        Ok(Self {
            concurrency,
            chunk_size,
            total_size,
            ranges,
        })
    }

    /// Length in bytes of the `index`-th range.
    pub fn range_len(&self, index: usize) -> u64 {
        self.ranges
            .get(index)
            .map_or(0, |(start, end)| end - start + 1)
    }
}
