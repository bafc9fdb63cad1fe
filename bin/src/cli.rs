//! CLI interpreter for the download tool.

use std::{path::Path, process::ExitCode, time::Duration};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use turbo_fetcher::{
    parse_size, unpack_archive, ArchiveKind, ChunkStream, DnsOverrides, Downloader, FetchOptions,
    DEFAULT_RETRIES,
};

/// Fetch a URL over many parallel range requests.
///
/// Every option is also settable through an environment variable with the
/// `TURBOFETCH_` prefix and hyphens replaced by underscores.
#[derive(Parser, Debug)]
#[command(name = "turbofetch", version, about)]
pub(crate) struct Cli {
    /// Source URL.
    url: String,

    /// Destination file (or directory when --extract is given).
    dest: std::path::PathBuf,

    /// Upper bound on simultaneous chunk requests [default: 4 x CPU count].
    #[arg(long, env = "TURBOFETCH_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Maximum retry attempts per chunk request.
    #[arg(long, env = "TURBOFETCH_RETRIES", default_value_t = DEFAULT_RETRIES)]
    retries: u32,

    /// Lower bound on the per-chunk byte range (K/M/G/Ki/Mi/Gi suffixes).
    #[arg(long, env = "TURBOFETCH_MINIMUM_CHUNK_SIZE", default_value = "16M")]
    minimum_chunk_size: String,

    /// Overwrite the destination if it already exists.
    #[arg(long, env = "TURBOFETCH_FORCE", default_value_t = false)]
    force: bool,

    /// Treat the download as a tar archive and unpack it under DEST.
    #[arg(long, env = "TURBOFETCH_EXTRACT", default_value_t = false)]
    extract: bool,

    /// Log retries, redirects, and DNS overrides.
    #[arg(long, env = "TURBOFETCH_VERBOSE", default_value_t = false)]
    verbose: bool,

    /// DNS override as host:port:ip. Repeatable (comma-separated in the
    /// environment variable).
    #[arg(long, env = "TURBOFETCH_RESOLVE", value_name = "HOST:PORT:IP", value_delimiter = ',')]
    resolve: Vec<String>,

    /// TCP dial timeout (humantime format, e.g. 5s).
    #[arg(long, env = "TURBOFETCH_CONNECT_TIMEOUT", default_value = "5s")]
    connect_timeout: String,
}

impl Cli {
    /// Runs the command, mapping any failure to a non-zero exit code.
    pub(crate) async fn exec(self) -> ExitCode {
        if let Err(err) = crate::logger::init(self.verbose) {
            eprintln!("failed to initialize logging: {err}");
            return ExitCode::FAILURE;
        }
        match self.run().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!("{err:#}");
                ExitCode::FAILURE
            },
        }
    }

    /// Downloads the URL and writes (or extracts) it to the destination.
    async fn run(self) -> anyhow::Result<()> {
        let min_chunk_size = parse_size(&self.minimum_chunk_size)?;
        let connect_timeout: Duration = humantime::parse_duration(&self.connect_timeout)
            .context("invalid --connect-timeout")?;
        let dns_overrides = DnsOverrides::parse(&self.resolve)?;

        if self.dest.exists() && !self.force {
            anyhow::bail!(
                "destination {} already exists; remove it or pass --force",
                self.dest.display()
            );
        }

        let options = FetchOptions {
            max_concurrency: self.concurrency.unwrap_or_else(|| 4 * num_cpus::get()),
            retries: self.retries,
            min_chunk_size,
            connect_timeout,
            dns_overrides,
        };
        let downloader = Downloader::new(options)?;
        let mut fetched = downloader.fetch(&self.url).await?;

        if self.extract {
            // Assemble in memory, then unpack on a blocking worker.
            let payload = fetched.stream.read_to_end().await?;
            let kind = ArchiveKind::detect(fetched.url.path());
            let dest = self.dest.clone();
            tokio::task::spawn_blocking(move || {
                unpack_archive(std::io::Cursor::new(payload), kind, &dest)
            })
            .await??;
            info!(dest = %self.dest.display(), "archive extracted");
        } else {
            write_stream(&mut fetched.stream, &self.dest).await?;
            info!(
                dest = %self.dest.display(),
                bytes = fetched.total_size,
                "download written"
            );
        }
        Ok(())
    }
}

/// Copies the stream to `dest` as bytes arrive.
async fn write_stream(stream: &mut ChunkStream, dest: &Path) -> anyhow::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("cannot create {}", dest.display()))?;
    let mut buf = vec![0_u8; 1024 * 1024];
    loop {
        let count = stream.read(&mut buf).await?;
        if count == 0 {
            break;
        }
        file.write_all(&buf[..count]).await?;
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["turbofetch", "https://example.com/a.bin", "out.bin"])
            .unwrap();
        assert_eq!(cli.url, "https://example.com/a.bin");
        assert_eq!(cli.retries, 5);
        assert_eq!(cli.minimum_chunk_size, "16M");
        assert_eq!(cli.connect_timeout, "5s");
        assert!(cli.concurrency.is_none());
        assert!(!cli.force);
        assert!(!cli.extract);
        assert!(!cli.verbose);
        assert!(cli.resolve.is_empty());
    }

    #[test]
    fn test_url_and_dest_are_required() {
        assert!(Cli::try_parse_from(["turbofetch"]).is_err());
        assert!(Cli::try_parse_from(["turbofetch", "https://example.com/a.bin"]).is_err());
    }

    #[test]
    fn test_resolve_is_repeatable() {
        let cli = Cli::try_parse_from([
            "turbofetch",
            "https://example.com/a.bin",
            "out.bin",
            "--resolve",
            "cdn.example.com:443:10.0.0.1",
            "--resolve",
            "api.example.com:443:10.0.0.2",
        ])
        .unwrap();
        assert_eq!(cli.resolve.len(), 2);
    }

    #[test]
    fn test_flags_parse() {
        let cli = Cli::try_parse_from([
            "turbofetch",
            "https://example.com/a.tar.gz",
            "outdir",
            "--force",
            "--extract",
            "--verbose",
            "--concurrency",
            "8",
            "--retries",
            "2",
            "--minimum-chunk-size",
            "1Mi",
            "--connect-timeout",
            "250ms",
        ])
        .unwrap();
        assert!(cli.force && cli.extract && cli.verbose);
        assert_eq!(cli.concurrency, Some(8));
        assert_eq!(cli.retries, 2);
        assert_eq!(cli.minimum_chunk_size, "1Mi");
        assert_eq!(cli.connect_timeout, "250ms");
    }
}
