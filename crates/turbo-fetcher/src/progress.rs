//! End-of-download summary reporting.

use std::time::Duration;

use serde::Serialize;

use crate::size::format_bytes;

/// Outcome of a completed download, suitable for logging or serializing.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    /// Total payload bytes delivered.
    pub total_bytes: u64,
    /// Wall-clock seconds the download took.
    pub elapsed_seconds: f64,
}

impl DownloadSummary {
    /// Builds a summary from raw measurements.
    pub fn new(total_bytes: u64, elapsed: Duration) -> Self {
        Self {
            total_bytes,
            elapsed_seconds: elapsed.as_secs_f64(),
        }
    }

    /// Mean throughput in bytes per second.
    pub fn throughput(&self) -> f64 {
        if self.elapsed_seconds <= f64::EPSILON {
            return self.total_bytes as f64;
        }
        self.total_bytes as f64 / self.elapsed_seconds
    }

    /// One human-readable line: total bytes, elapsed seconds, throughput.
    pub fn human_line(&self) -> String {
        format!(
            "downloaded {} in {:.2}s ({}/s)",
            format_bytes(self.total_bytes),
            self.elapsed_seconds,
            format_bytes(self.throughput() as u64),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_is_bytes_per_second() {
        let summary = DownloadSummary::new(10_000_000, Duration::from_secs(2));
        assert!((summary.throughput() - 5_000_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_elapsed_does_not_divide_by_zero() {
        let summary = DownloadSummary::new(42, Duration::ZERO);
        assert!((summary.throughput() - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_human_line_mentions_all_three_figures() {
        let summary = DownloadSummary::new(10_000_000, Duration::from_secs(2));
        let line = summary.human_line();
        assert!(line.contains("10 MB"), "{line}");
        assert!(line.contains("2.00s"), "{line}");
        assert!(line.contains("5 MB/s"), "{line}");
    }

    #[test]
    fn test_summary_serializes() {
        let summary = DownloadSummary::new(1, Duration::from_secs(1));
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"total_bytes\":1"), "{json}");
    }
}
