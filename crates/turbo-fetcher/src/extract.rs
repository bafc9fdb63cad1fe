//! Tar archive extraction for downloaded payloads.

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::debug;

use crate::errors::FetchError;

/// Compression wrapper around a tar payload, detected from the resource
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// An uncompressed tar stream.
    Plain,
    /// Gzip-compressed (`.tar.gz` / `.tgz`).
    Gzip,
    /// Zstandard-compressed (`.tar.zst`).
    Zstd,
}

impl ArchiveKind {
    /// Detects the compression from a file or URL-path name. Anything
    /// without a recognized compressed suffix is treated as plain tar.
    pub fn detect(name: &str) -> Self {
        let lowered = name.to_ascii_lowercase();
        if lowered.ends_with(".tar.gz") || lowered.ends_with(".tgz") {
            Self::Gzip
        } else if lowered.ends_with(".tar.zst") {
            Self::Zstd
        } else {
            Self::Plain
        }
    }
}

/// Unpacks the tar stream in `source` under `dest`, decompressing first
/// when `kind` calls for it.
pub fn unpack_archive<R: Read>(source: R, kind: ArchiveKind, dest: &Path) -> Result<(), FetchError> {
    match kind {
        ArchiveKind::Plain => unpack_tar(Archive::new(source), dest),
        ArchiveKind::Gzip => unpack_tar(Archive::new(GzDecoder::new(source)), dest),
        ArchiveKind::Zstd => unpack_tar(Archive::new(zstd::stream::read::Decoder::new(source)?), dest),
    }
}

/// Unpacks every entry of `archive` under `dest`.
///
/// Directory entries are delayed until the end so their permissions cannot
/// block descendant extraction.
fn unpack_tar<R: Read>(mut archive: Archive<R>, dest: &Path) -> Result<(), FetchError> {
    if dest.symlink_metadata().is_err() {
        fs::create_dir_all(dest)?;
    }
    // Canonicalizing lets extended-length paths work on Windows.
    let dest: PathBuf = dest.canonicalize().unwrap_or_else(|_| dest.to_path_buf());

    let mut directories = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        debug!(
            entry_type = ?entry.header().entry_type(),
            path = %entry.path()?.display(),
            "unpacking archive entry"
        );
        if entry.header().entry_type() == tar::EntryType::Directory {
            directories.push(entry);
        } else {
            entry.unpack_in(&dest)?;
        }
    }
    for mut directory in directories {
        directory.unpack_in(&dest)?;
    }
    Ok(())
}
