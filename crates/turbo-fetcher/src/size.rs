//! Humanized byte sizes: parsing user input and formatting output.

use bytesize::ByteSize;
use humansize::{FormatSizeOptions, SizeFormatter, DECIMAL};

use crate::errors::FetchError;

/// Parses a humanized byte count such as `16M`, `1.5G`, or `32Ki`.
///
/// Bare numbers are bytes; `K`/`M`/`G` are decimal multiples and
/// `Ki`/`Mi`/`Gi` binary ones (a trailing `B` is accepted either way).
pub fn parse_size(input: &str) -> Result<u64, FetchError> {
    let trimmed = input.trim();
    trimmed
        .parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|err| FetchError::Config(format!("invalid size {trimmed:?}: {err}")))
}

/// Formats a byte count for humans, e.g. `16.00 MB`.
pub fn format_bytes(bytes: u64) -> SizeFormatter<u64, FormatSizeOptions> {
    SizeFormatter::new(bytes, DECIMAL)
}
