//! Live stream client.
//!
//! Opens the push connection over HTTP and pumps the response body into a
//! [`StreamManager`]. Connection establishment retries with exponential
//! backoff and jitter. Once frames are flowing, a drop is a transport
//! error for that stream, never a silent reconnect: replaying a
//! half-consumed turn would duplicate deltas in the assembled messages.

use std::time::Duration;

use futures::TryStreamExt;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::ClientOptions;
use crate::error::StreamError;
use crate::pipeline::StreamStats;
use crate::publish::StreamManager;

/// HTTP client for one stream endpoint.
pub struct StreamClient {
    http: reqwest::Client,
    options: ClientOptions,
}

impl StreamClient {
    pub fn new(options: ClientOptions) -> Result<Self, StreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(options.connect_timeout_ms))
            .build()?;
        Ok(Self { http, options })
    }

    /// Connect to `url` and stream it into `manager` until the server ends
    /// the stream or `token` fires.
    pub async fn run(
        &self,
        url: &str,
        manager: &StreamManager,
        token: &CancellationToken,
    ) -> Result<StreamStats, StreamError> {
        let Some(response) = self.connect(url, token).await? else {
            return Ok(StreamStats {
                cancelled: true,
                ..StreamStats::default()
            });
        };

        let bytes = response.bytes_stream().map_err(StreamError::from);
        manager.process(Box::pin(bytes), token).await
    }

    /// Establish the connection, retrying recoverable failures.
    ///
    /// `Ok(None)` means the token fired while waiting between attempts.
    async fn connect(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<Option<reqwest::Response>, StreamError> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_connect(url).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!("connected to {url} after {attempt} retries");
                    } else {
                        debug!("connected to {url}");
                    }
                    return Ok(Some(response));
                }
                Err(err) if attempt + 1 < self.options.max_connect_attempts
                    && is_recoverable(&err) =>
                {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!("connect attempt {attempt} to {url} failed ({err}); retrying in {delay}ms");
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_connect(&self, url: &str) -> Result<reqwest::Response, StreamError> {
        let response = self
            .http
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(StreamError::Status {
                status: status.as_u16(),
            })
        }
    }

    /// Exponential backoff with up to 20% jitter, capped.
    fn backoff(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(6);
        let delay = self
            .options
            .base_backoff_ms
            .saturating_mul(2u64.saturating_pow(exp));
        let jitter = (delay as f64 * 0.2 * rand::random::<f64>()) as u64;
        (delay + jitter).min(self.options.max_backoff_ms)
    }
}

/// Connection-phase failures worth another attempt: refused, reset,
/// timed out, or server-side congestion. Anything else is final.
fn is_recoverable(err: &StreamError) -> bool {
    match err {
        StreamError::Transport(err) => err.is_connect() || err.is_timeout(),
        StreamError::Status { status } => *status == 429 || *status >= 500,
        _ => false,
    }
}
