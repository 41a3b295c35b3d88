//! HTTP fetcher implementation
//!
//! This module owns every outbound request a source makes, including:
//! - Building HTTP clients bound to the current session identity and proxy
//! - Rotating the session after a configured number of requests
//! - Acquiring (and on failure replacing) proxies from the proxy pool
//! - Retry logic for transient failures and upstream rate limiting
//! - Streaming file downloads to disk
//!
//! Exhausted retries are not errors: [`Fetcher::execute`] returns `Ok(None)`
//! and the caller decides whether the page or detail is skippable. `Err` is
//! reserved for failures that make every later request impossible.

use crate::config::RequestConfig;
use crate::crawler::proxy::ProxyPool;
use crate::state::SessionState;
use crate::TrawlError;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Proxy, RequestBuilder, StatusCode};
use std::error::Error as StdError;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Size of the blocks written to disk during a download
pub const DOWNLOAD_CHUNK_SIZE: usize = 8192;

/// Timeout for a single download attempt
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Error text produced by certain upstream servers whose response headers
/// cannot be parsed even though the body arrives intact. Body read failures
/// do not qualify since they leave a truncated file.
const BENIGN_DOWNLOAD_MARKERS: &[&str] = &["HeaderParsingError", "NoBoundaryInMultipartDefect"];

/// A fully read upstream response
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Final URL after redirects
    pub url: String,
    pub status: StatusCode,
    /// Content-Type header value (empty if absent)
    pub content_type: String,
    pub body: String,
}

/// What the caller made of one response
#[derive(Debug)]
pub enum Attempt<T> {
    /// Usable result
    Done(T),
    /// Malformed or unexpected response; back off linearly and try again
    Retry(String),
    /// Upstream signalled rate limiting; wait the longer cooldown
    RateLimited(String),
    /// Definitive failure; retrying cannot help
    GiveUp(String),
}

/// Resilient HTTP adapter owned by one source
pub struct Fetcher {
    settings: RequestConfig,
    headers: HeaderMap,
    client: Client,
    session: SessionState,
    proxy_pool: Option<ProxyPool>,
}

impl Fetcher {
    /// Creates a fetcher with a fresh session
    ///
    /// # Arguments
    ///
    /// * `settings` - Request pacing and retry configuration
    /// * `headers` - Default headers sent with every request (Referer, Accept, ...)
    /// * `proxy_pool` - Optional proxy pool; None means direct connections only
    pub fn new(
        settings: RequestConfig,
        headers: HeaderMap,
        proxy_pool: Option<ProxyPool>,
    ) -> Result<Self, TrawlError> {
        let session = SessionState::new();
        let client = build_client(&settings, &headers, &session)?;

        if proxy_pool.is_some() {
            tracing::info!("Proxy rotation enabled");
        }

        Ok(Self {
            settings,
            headers,
            client,
            session,
            proxy_pool,
        })
    }

    /// Whether requests can be routed through the proxy pool
    pub fn has_proxy_support(&self) -> bool {
        self.proxy_pool.is_some()
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn settings(&self) -> &RequestConfig {
        &self.settings
    }

    /// Counts a logical request and rotates the session when due
    fn begin_request(&mut self) -> Result<(), TrawlError> {
        if self
            .session
            .record_request(self.settings.session_rotate_interval)
        {
            self.session.rotate();
            self.client = build_client(&self.settings, &self.headers, &self.session)?;
            tracing::debug!(
                "Session rotated (rotation #{}, user agent: {})",
                self.session.rotations,
                self.session.user_agent
            );
        }
        Ok(())
    }

    /// Makes sure the session is bound to a proxy when the pool is available
    ///
    /// `force_new` replaces the current proxy, which is what a retry wants.
    /// Pool failures fall back to a direct connection.
    async fn ensure_proxy(&mut self, force_new: bool) -> Result<(), TrawlError> {
        let Some(pool) = &self.proxy_pool else {
            return Ok(());
        };

        if !force_new && self.session.proxy.is_some() {
            return Ok(());
        }

        let next = match pool.fetch(1, "json").await {
            Ok(list) => list.into_iter().next(),
            Err(e) => {
                if force_new {
                    tracing::warn!("Failed to acquire proxy: {}", e);
                } else {
                    tracing::debug!("Failed to acquire proxy: {}", e);
                }
                None
            }
        };

        if next == self.session.proxy {
            return Ok(());
        }

        self.session.proxy = next;
        match build_client(&self.settings, &self.headers, &self.session) {
            Ok(client) => {
                match &self.session.proxy {
                    Some(proxy) => tracing::info!("Switching to proxy {}", proxy),
                    None => tracing::debug!("Continuing without proxy"),
                }
                self.client = client;
            }
            Err(e) => {
                let Some(proxy) = self.session.proxy.take() else {
                    return Err(e);
                };
                tracing::warn!("Unusable proxy '{}' from pool ({}), going direct", proxy, e);
                self.client = build_client(&self.settings, &self.headers, &self.session)?;
            }
        }

        Ok(())
    }

    /// Performs one logical request with retries
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Network error / timeout | Retry after `retry-delay * attempt` |
    /// | HTTP 5xx or other non-success | Retry after `retry-delay * attempt` |
    /// | HTTP 404 | Give up immediately |
    /// | HTTP 429 | Wait `rate-limit-delay * attempt`, retry |
    /// | `interpret` → Retry / RateLimited / GiveUp | as above |
    ///
    /// Every retry asks the proxy pool for a fresh proxy first.
    ///
    /// # Arguments
    ///
    /// * `label` - Short description used in log lines
    /// * `build` - Builds the request from the current client
    /// * `interpret` - Turns a successful response into an [`Attempt`]
    ///
    /// # Returns
    ///
    /// * `Ok(Some(T))` - The interpreted result
    /// * `Ok(None)` - Retries exhausted or the request was given up
    /// * `Err(TrawlError)` - The session could not be rebuilt
    pub async fn execute<T, B, I>(
        &mut self,
        label: &str,
        build: B,
        mut interpret: I,
    ) -> Result<Option<T>, TrawlError>
    where
        B: Fn(&Client) -> RequestBuilder,
        I: FnMut(&RawResponse) -> Attempt<T>,
    {
        self.begin_request()?;
        let max_attempts = self.settings.max_retries.max(1);

        for attempt in 1..=max_attempts {
            self.ensure_proxy(attempt > 1).await?;

            let outcome = match build(&self.client).send().await {
                Ok(response) => {
                    let status = response.status();
                    let url = response.url().to_string();
                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();

                    if status == StatusCode::NOT_FOUND {
                        Attempt::GiveUp(format!("HTTP {}", status.as_u16()))
                    } else if status == StatusCode::TOO_MANY_REQUESTS {
                        Attempt::RateLimited(format!("HTTP {}", status.as_u16()))
                    } else if !status.is_success() {
                        Attempt::Retry(format!("HTTP {}", status.as_u16()))
                    } else {
                        match response.text().await {
                            Ok(body) => interpret(&RawResponse {
                                url,
                                status,
                                content_type,
                                body,
                            }),
                            Err(e) => Attempt::Retry(format!("failed to read body: {}", e)),
                        }
                    }
                }
                Err(e) => Attempt::Retry(describe_request_error(&e)),
            };

            let last = attempt == max_attempts;
            match outcome {
                Attempt::Done(value) => return Ok(Some(value)),
                Attempt::GiveUp(reason) => {
                    tracing::warn!("{}: giving up ({})", label, reason);
                    return Ok(None);
                }
                Attempt::RateLimited(reason) => {
                    if last {
                        tracing::warn!("{}: still rate limited after {} attempts", label, attempt);
                        return Ok(None);
                    }
                    let wait = self.settings.rate_limit_backoff(attempt);
                    tracing::warn!(
                        "{}: rate limited ({}), waiting {:?} before attempt {}/{}",
                        label,
                        reason,
                        wait,
                        attempt + 1,
                        max_attempts
                    );
                    tokio::time::sleep(wait).await;
                }
                Attempt::Retry(reason) => {
                    if last {
                        tracing::warn!("{}: failed after {} attempts ({})", label, attempt, reason);
                        return Ok(None);
                    }
                    let wait = self.settings.retry_backoff(attempt);
                    tracing::warn!(
                        "{}: {} - retry {}/{} in {:?}",
                        label,
                        reason,
                        attempt,
                        max_attempts,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        Ok(None)
    }

    /// Streams a remote file to `dest`
    ///
    /// A download counts as successful when a non-empty file was written.
    /// Some upstream servers send headers the client cannot parse after the
    /// body has already arrived; those errors are accepted if the file on disk
    /// is non-empty.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - File written
    /// * `Ok(false)` - Download failed or produced an empty file
    /// * `Err(TrawlError)` - The session could not be rebuilt
    pub async fn download(&mut self, url: &str, dest: &Path) -> Result<bool, TrawlError> {
        self.begin_request()?;
        let max_attempts = self.settings.max_retries.max(1);

        for attempt in 1..=max_attempts {
            self.ensure_proxy(attempt > 1).await?;

            match self.stream_to_file(url, dest).await {
                Ok(written) if written > 0 => {
                    tracing::debug!("Downloaded {} bytes to {}", written, dest.display());
                    return Ok(true);
                }
                Ok(_) => {
                    tracing::error!("Download of {} produced an empty file", url);
                    return Ok(false);
                }
                Err(e) => {
                    let message = error_chain(&e);
                    if usable_after_error(&message, dest).await {
                        tracing::debug!("Ignoring benign download error for {}: {}", url, message);
                        return Ok(true);
                    }

                    if attempt == max_attempts {
                        tracing::error!("Download of {} failed: {}", url, message);
                        return Ok(false);
                    }

                    let wait = self.settings.retry_backoff(attempt);
                    tracing::warn!(
                        "Download of {} failed ({}) - retry {}/{} in {:?}",
                        url,
                        message,
                        attempt,
                        max_attempts,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        Ok(false)
    }

    async fn stream_to_file(&self, url: &str, dest: &Path) -> Result<u64, TrawlError> {
        let http_err = |source| TrawlError::Http {
            url: url.to_string(),
            source,
        };

        let mut response = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?;

        let file = tokio::fs::File::create(dest).await?;
        let mut writer = BufWriter::with_capacity(DOWNLOAD_CHUNK_SIZE, file);
        let mut written = 0u64;

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    writer.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                Ok(None) => break,
                Err(e) => {
                    // Keep what arrived so the caller can judge the error
                    writer.flush().await?;
                    return Err(http_err(e));
                }
            }
        }
        writer.flush().await?;

        Ok(written)
    }
}

/// Builds an HTTP client for the given session
fn build_client(
    settings: &RequestConfig,
    headers: &HeaderMap,
    session: &SessionState,
) -> Result<Client, TrawlError> {
    let timeout = settings.timeout();
    let mut builder = Client::builder()
        .user_agent(session.user_agent)
        .default_headers(headers.clone())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &session.proxy {
        let proxy = Proxy::all(format!("http://{}", proxy)).map_err(TrawlError::Client)?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(TrawlError::Client)
}

fn describe_request_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timeout".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    }
}

/// Flattens an error and its sources into one line
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Returns true for the header-parsing defect some file servers trigger
pub fn is_benign_download_error(message: &str) -> bool {
    BENIGN_DOWNLOAD_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Whether a failed download still left a complete file behind
///
/// Only the benign header defect qualifies, and only when bytes were written.
async fn usable_after_error(message: &str, dest: &Path) -> bool {
    is_benign_download_error(message) && file_has_content(dest).await
}

async fn file_has_content(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len() > 0)
        .unwrap_or(false)
}
