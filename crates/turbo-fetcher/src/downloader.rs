//! The parallel range-download engine.
//!
//! A download starts with a `HEAD` probe that records the post-redirect
//! URL and the content length, then fans out one cooperative task per
//! chunk. Every chunk buffer is allocated and published on the channel in
//! chunk-index order before any task runs, so the composite stream's
//! ordering holds no matter which chunks finish first; consumers simply
//! block on each buffer's readiness latch in turn.

use std::{sync::Arc, time::Instant};

use reqwest::{header::CONTENT_LENGTH, redirect, Client, StatusCode};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    buffer::ChunkBuffer,
    errors::FetchError,
    options::FetchOptions,
    plan::ChunkPlan,
    progress::DownloadSummary,
    stream::ChunkStream,
    transport::{RetryingClient, PRODUCT_USER_AGENT},
};

/// Redirect hops allowed before a request is failed.
const MAX_REDIRECTS: usize = 10;

/// A running or completed download handed back to the caller.
#[derive(Debug)]
pub struct Fetch {
    /// The composite stream; readable while chunks are still in flight.
    pub stream: ChunkStream,
    /// Total resource size learned from the probe.
    pub total_size: u64,
    /// The post-redirect URL chunks were fetched from.
    pub url: Url,
    /// Shared token cancelling the remaining chunk tasks.
    cancel: CancellationToken,
}

impl Fetch {
    /// Aborts the in-flight chunk tasks. Readers blocked on unfinished
    /// chunks unblock with an error.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// The engine: probes sizes, plans chunks, and runs the chunk tasks.
#[derive(Debug)]
pub struct Downloader {
    /// Engine configuration.
    options: FetchOptions,
    /// Shared connection pool for probes and chunk requests.
    client: Client,
    /// Retrying executor wrapped around the same pool.
    transport: RetryingClient,
}

impl Downloader {
    /// Builds an engine (and its HTTP client) from explicit options.
    pub fn new(options: FetchOptions) -> Result<Self, FetchError> {
        let client = build_client(&options)?;
        let transport = RetryingClient::new(client.clone(), options.retries);
        Ok(Self {
            options,
            client,
            transport,
        })
    }

    /// Starts a parallel download of `url`.
    ///
    /// Returns as soon as the chunk tasks are spawned; the returned
    /// [`ChunkStream`] yields bytes while later chunks are still
    /// downloading. The first chunk failure cancels its siblings and
    /// surfaces through the stream.
    pub async fn fetch(&self, url: &str) -> Result<Fetch, FetchError> {
        let started = Instant::now();
        let (final_url, total_size) = self.probe(url).await?;
        debug!(url = %final_url, total_size, "size probe complete");

        let plan = ChunkPlan::compute(
            total_size,
            self.options.max_concurrency,
            self.options.min_chunk_size,
        )?;
        info!(
            chunks = plan.concurrency,
            chunk_size = plan.chunk_size,
            total_size,
            "starting parallel download"
        );

        // Allocate and publish every buffer up front, in chunk-index order.
        // Dropping the sender afterwards closes the channel: consumers see
        // exactly `concurrency` buffers and then end-of-stream.
        let (sender, receiver) = mpsc::channel(plan.concurrency);
        let mut buffers = Vec::with_capacity(plan.concurrency);
        for index in 0..plan.concurrency {
            let buffer = Arc::new(ChunkBuffer::with_capacity(plan.range_len(index) as usize));
            buffer.set_size(plan.range_len(index))?;
            if sender.send(Arc::clone(&buffer)).await.is_err() {
                return Err(FetchError::Closed);
            }
            buffers.push(buffer);
        }
        drop(sender);

        let cancel = CancellationToken::new();
        let mut tasks: JoinSet<Result<(), FetchError>> = JoinSet::new();
        for (index, &range) in plan.ranges.iter().enumerate() {
            let transport = self.transport.clone();
            let buffer = Arc::clone(&buffers[index]);
            let url = final_url.clone();
            let token = cancel.clone();
            tasks.spawn(async move { fetch_chunk(&transport, &url, range, &buffer, &token).await });
        }

        // Supervisor: joins the chunk tasks, cancels siblings on the first
        // error, and poisons unfinished buffers so blocked readers wake.
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut first_error: Option<FetchError> = None;
            while let Some(joined) = tasks.join_next().await {
                let result = joined
                    .unwrap_or_else(|err| Err(FetchError::TaskAborted(err.to_string())));
                if let Err(err) = result {
                    if first_error.is_none() {
                        warn!(error = %err, "chunk failed; cancelling remaining chunks");
                        token.cancel();
                        first_error = Some(err);
                    }
                }
            }
            match first_error {
                None => {
                    let summary = DownloadSummary::new(total_size, started.elapsed());
                    info!("{}", summary.human_line());
                },
                Some(err) => {
                    let reason = err.to_string();
                    for buffer in &buffers {
                        buffer.fail(reason.clone());
                    }
                },
            }
        });

        Ok(Fetch {
            stream: ChunkStream::new(receiver),
            total_size,
            url: final_url,
            cancel,
        })
    }

    /// `HEAD` probe: resolves redirects and reads the content length.
    async fn probe(&self, url: &str) -> Result<(Url, u64), FetchError> {
        let parsed = Url::parse(url)
            .map_err(|err| FetchError::Config(format!("invalid url {url:?}: {err}")))?;
        let response = self.client.head(parsed).send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let final_url = response.url().clone();
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        if size == 0 {
            return Err(FetchError::Sizing);
        }
        Ok((final_url, size))
    }
}

/// Downloads one chunk into its buffer, poisoning the buffer on failure so
/// the consumer never blocks forever.
async fn fetch_chunk(
    transport: &RetryingClient,
    url: &Url,
    range: (u64, u64),
    buffer: &Arc<ChunkBuffer>,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    let result = fetch_chunk_inner(transport, url, range, buffer, cancel).await;
    if let Err(ref err) = result {
        buffer.fail(err.to_string());
    }
    result
}

/// The chunk body: one ranged GET through the retrying transport, then a
/// byte-count check against the range.
async fn fetch_chunk_inner(
    transport: &RetryingClient,
    url: &Url,
    (start, end): (u64, u64),
    buffer: &Arc<ChunkBuffer>,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    let expected = end - start + 1;
    debug!(start, end, "requesting chunk");
    let request = transport
        .inner()
        .get(url.clone())
        .header(reqwest::header::RANGE, format!("bytes={start}-{end}"))
        .build()?;
    let response = transport.execute(request, cancel).await?;
    // A plain 200 to a ranged request means the server ignored the Range
    // header and is serving the whole resource.
    if response.status() == StatusCode::OK && start != 0 {
        return Err(FetchError::Http {
            status: 200,
            url: url.to_string(),
        });
    }
    let received = tokio::select! {
        () = cancel.cancelled() => return Err(FetchError::Cancelled),
        result = buffer.fill_from(response.bytes_stream()) => result?,
    };
    if received != expected {
        return Err(FetchError::ShortRead { expected, received });
    }
    buffer.complete();
    Ok(())
}

/// Builds the shared HTTP client: dial timeout, DNS overrides, redirect
/// logging, and keep-alive disabled (stale pooled connections stall long
/// downloads).
fn build_client(options: &FetchOptions) -> Result<Client, FetchError> {
    let redirect_policy = redirect::Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else {
            debug!(url = %attempt.url(), "following redirect");
            attempt.follow()
        }
    });
    // Range responses must arrive byte-exact, so transparent content
    // decompression stays off.
    let builder = Client::builder()
        .user_agent(PRODUCT_USER_AGENT)
        .connect_timeout(options.connect_timeout)
        .pool_max_idle_per_host(0)
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .no_zstd()
        .redirect(redirect_policy);
    Ok(options.dns_overrides.apply(builder).build()?)
}
