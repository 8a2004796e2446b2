//! Feed reader: turns a long-lived line-oriented HTTP stream into raw
//! payload strings, reconnecting forever on failure.

pub mod frame;
pub mod retry;

use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, trace, warn};

use crate::config::FeedConfig;
use crate::metrics::PipelineMetrics;

use self::frame::{split_frame, Frame, LineBuffer};
pub use self::retry::{ConnectionState, RetryPolicy};

/// Opens connections to the feed.
pub trait FeedConnector: Send + Sync + 'static {
    type Body: FeedBody;

    /// Open a new connection and return its body stream.
    fn connect(&self) -> impl Future<Output = Result<Self::Body>> + Send;
}

/// Body of an open feed connection.
pub trait FeedBody: Send + 'static {
    /// Read the next chunk. `Ok(None)` means the server closed the stream.
    fn chunk(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;
}

/// HTTP feed connector.
pub struct HttpFeed {
    http: reqwest::Client,
    url: String,
}

impl HttpFeed {
    /// Create a connector for the configured feed URL.
    ///
    /// Only connection establishment is bounded by a timeout; the body
    /// stream is expected to stay open indefinitely.
    pub fn new(cfg: &FeedConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(cfg.connect_timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            url: cfg.url.clone(),
        })
    }
}

impl FeedConnector for HttpFeed {
    type Body = HttpBody;

    async fn connect(&self) -> Result<HttpBody> {
        let response = self
            .http
            .get(&self.url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("unexpected status {} from {}", status, self.url);
        }

        Ok(HttpBody { response })
    }
}

/// Streaming body of an HTTP feed response.
pub struct HttpBody {
    response: reqwest::Response,
}

impl FeedBody for HttpBody {
    async fn chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let chunk = self
            .response
            .chunk()
            .await
            .context("reading feed body")?;
        Ok(chunk.map(|b| b.to_vec()))
    }
}

/// Yields one raw payload per non-blank feed line.
///
/// A failed connection attempt waits according to the retry policy before
/// trying again. A read failure or end of stream drops the connection and
/// reconnects immediately. Neither ever ends the reader.
pub struct FeedReader<C: FeedConnector> {
    connector: C,
    policy: RetryPolicy,
    prefix_len: usize,
    metrics: Arc<PipelineMetrics>,

    state: ConnectionState,
    body: Option<C::Body>,
    lines: LineBuffer,
}

impl<C: FeedConnector> FeedReader<C> {
    pub fn new(
        connector: C,
        policy: RetryPolicy,
        prefix_len: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            connector,
            policy,
            prefix_len,
            metrics,
            state: ConnectionState::Connecting,
            body: None,
            lines: LineBuffer::new(),
        }
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Waits for the next payload with the line prefix stripped.
    pub async fn next_payload(&mut self) -> String {
        let mut failures = 0u32;

        loop {
            while let Some(line) = self.lines.next_line() {
                match split_frame(&line, self.prefix_len) {
                    Frame::Blank => {}
                    Frame::Short => {
                        self.metrics.frames_skipped.inc();
                        trace!(line = %line, "skipping short feed line");
                    }
                    Frame::Payload(payload) => {
                        self.metrics.payloads_received.inc();
                        return payload.to_string();
                    }
                }
            }

            match self.state {
                ConnectionState::Failed { attempt } => {
                    tokio::time::sleep(self.policy.next(attempt.saturating_sub(1))).await;
                    failures = attempt;
                    self.state = ConnectionState::Connecting;
                }

                ConnectionState::Connecting => match self.connector.connect().await {
                    Ok(body) => {
                        info!("connected to feed");
                        self.body = Some(body);
                        self.lines.clear();
                        self.state = ConnectionState::Connected;
                        failures = 0;
                    }
                    Err(e) => {
                        let attempt = failures.saturating_add(1);
                        self.metrics.feed_reconnects.inc();
                        warn!(error = %e, attempt, "feed connection failed, retrying");
                        self.state = ConnectionState::Failed { attempt };
                    }
                },

                ConnectionState::Connected => {
                    let Some(body) = self.body.as_mut() else {
                        self.state = ConnectionState::Connecting;
                        continue;
                    };

                    match body.chunk().await {
                        Ok(Some(chunk)) => self.lines.push(&chunk),
                        Ok(None) => {
                            warn!("feed closed by server, reconnecting");
                            self.drop_connection();
                        }
                        Err(e) => {
                            warn!(error = %e, "feed read failed, reconnecting");
                            self.drop_connection();
                        }
                    }
                }
            }
        }
    }

    fn drop_connection(&mut self) {
        self.metrics.feed_reconnects.inc();
        self.body = None;
        self.lines.clear();
        self.state = ConnectionState::Connecting;
    }
}
