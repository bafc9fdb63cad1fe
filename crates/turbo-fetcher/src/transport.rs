//! Retrying HTTP executor.
//!
//! Wraps a `reqwest::Client` with retry, exponential backoff, and jitter.
//! All retry bookkeeping lives here; chunk tasks just hand requests over.
//! Redirects are followed (and logged) by the client's redirect policy and
//! are not counted as retries.

use std::time::Duration;

use rand::Rng;
use reqwest::{
    header::{HeaderValue, USER_AGENT},
    Client, Request, Response,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::FetchError;

/// Product identifier sent with every request.
pub(crate) const PRODUCT_USER_AGENT: &str = concat!("turbofetch/", env!("CARGO_PKG_VERSION"));

/// Header carrying the attempt number on retried requests.
const RETRY_COUNT_HEADER: &str = "Retry-Count";

/// Fixed delay component before every retry.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound (exclusive) of the random jitter component, in milliseconds.
const RETRY_JITTER_MS: u64 = 500;

/// Cap applied to the exponential component of the backoff (not to the
/// total sleep).
const RETRY_BACKOFF_CAP: Duration = Duration::from_millis(3000);

/// First rung of the exponential backoff ladder, in milliseconds.
const RETRY_BACKOFF_STEP_MS: u64 = 500;

/// An HTTP executor that retries transport failures and error statuses
/// with exponential backoff plus jitter.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    /// The underlying connection pool, shared with the rest of the engine.
    client: Client,
    /// Maximum retry attempts after the initial one.
    retries: u32,
}

impl RetryingClient {
    /// Wraps `client` with a retry budget.
    pub fn new(client: Client, retries: u32) -> Self {
        Self { client, retries }
    }

    /// The wrapped client, for building requests against the same pool.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Sleep before retry attempt `attempt` (>= 1):
    /// `100ms + jitter(0..500ms) + min(3000ms, 500ms * 2^attempt)`.
    fn backoff(attempt: u32) -> Duration {
        let exponential = RETRY_BACKOFF_STEP_MS.saturating_mul(1_u64 << attempt.min(20));
        let capped = Duration::from_millis(exponential).min(RETRY_BACKOFF_CAP);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..RETRY_JITTER_MS));
        RETRY_BASE_DELAY + jitter + capped
    }

    /// Executes `request`, retrying transport errors and HTTP statuses
    /// >= 400 until the retry budget is exhausted. The first 2xx/3xx
    /// response is returned immediately. Retried attempts carry a
    /// `Retry-Count` header with the attempt number.
    pub async fn execute(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, FetchError> {
        let url = request.url().clone();
        for attempt in 0..=self.retries {
            let Some(mut attempt_request) = request.try_clone() else {
                return Err(FetchError::Config(
                    "request body is not cloneable for retries".to_string(),
                ));
            };
            if attempt > 0 {
                let delay = Self::backoff(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, url = %url, "retrying request");
                tokio::select! {
                    () = cancel.cancelled() => return Err(FetchError::Cancelled),
                    () = tokio::time::sleep(delay) => {},
                }
                if let Ok(value) = HeaderValue::from_str(&attempt.to_string()) {
                    attempt_request
                        .headers_mut()
                        .insert(RETRY_COUNT_HEADER, value);
                }
            }
            attempt_request
                .headers_mut()
                .insert(USER_AGENT, HeaderValue::from_static(PRODUCT_USER_AGENT));

            let outcome = tokio::select! {
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = self.client.execute(attempt_request) => result,
            };
            match outcome {
                Ok(response) if response.status().as_u16() < 400 => return Ok(response),
                Ok(response) => {
                    warn!(
                        status = response.status().as_u16(),
                        url = %url,
                        attempt,
                        "request failed with HTTP error status"
                    );
                },
                Err(err) => {
                    warn!(error = %err, url = %url, attempt, "request failed in transport");
                },
            }
        }
        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            retries: self.retries,
        })
    }
}
