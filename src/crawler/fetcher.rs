//! HTTP fetcher implementation
//!
//! This module performs single network retrievals:
//! - Building HTTP clients with proper user agent strings
//! - HEAD probes returning validators (ETag, Last-Modified)
//! - GET requests returning content plus a checksum
//! - Classification of every failure into a small set of reasons
//!
//! The fetcher never retries and never sleeps. Pacing is the scheduler's job
//! and retries happen on a later run through backoff.

use crate::config::{FetcherConfig, UserAgentConfig};
use crate::url::content_checksum;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::{Client, Response, StatusCode};
use std::fmt;
use std::time::Duration;
use url::Url;

/// A successfully retrieved page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status: u16,
    /// Content-Type header value
    pub content_type: Option<String>,
    /// Raw body bytes
    pub body: Vec<u8>,
    /// ETag header value
    pub etag: Option<String>,
    /// Last-Modified header value
    pub last_modified: Option<String>,
    /// Hex SHA-256 of the body
    pub checksum: String,
}

/// Why a retrieval did not produce content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The request exceeded the configured timeout
    Timeout,
    /// Connection refused, reset, DNS failure or TLS failure
    Connection(String),
    /// The origin answered with a non-2xx status
    Status(u16),
    /// The response was not text-like content, or was too large
    ContentRejected(String),
    /// Anything else (redirect loops, malformed responses)
    Other(String),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Connection(e) => write!(f, "connection error: {}", e),
            Self::Status(code) => write!(f, "HTTP {}", code),
            Self::ContentRejected(reason) => write!(f, "content rejected: {}", reason),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

/// Validators returned by a header-only probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderProbe {
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Result of a HEAD probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The origin answered the probe
    Headers(HeaderProbe),
    /// The origin does not support HEAD (405 or 501)
    Unsupported,
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `fetcher` - Timeouts for every request made with this client
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    fetcher: &FetcherConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(Duration::from_secs(fetcher.timeout_secs))
        .connect_timeout(Duration::from_secs(fetcher.connect_timeout_secs))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Performs single GET and HEAD requests with a fixed timeout
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    accepted_content_types: Vec<String>,
    max_body_bytes: usize,
}

impl Fetcher {
    /// Creates a fetcher from configuration
    pub fn new(user_agent: &UserAgentConfig, config: &FetcherConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(user_agent, config)?,
            accepted_content_types: config
                .accepted_content_types
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Fetches a URL and returns its content or the reason it failed
    ///
    /// # Classification
    ///
    /// | Condition | Result |
    /// |-----------|--------|
    /// | 2xx with accepted Content-Type | `Ok(FetchedPage)` |
    /// | non-2xx | `FetchFailure::Status` |
    /// | Content-Type outside the accepted list | `FetchFailure::ContentRejected` |
    /// | body larger than the limit | `FetchFailure::ContentRejected` |
    /// | timeout | `FetchFailure::Timeout` |
    /// | connect / DNS / TLS error | `FetchFailure::Connection` |
    pub async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchFailure> {
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let content_type = header_string(&headers, CONTENT_TYPE.as_str());

        if let Some(ct) = &content_type {
            if !self.is_accepted(ct) {
                return Err(FetchFailure::ContentRejected(format!(
                    "content type {} not accepted",
                    ct
                )));
            }
        }

        if let Some(length) = header_string(&headers, CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if length > self.max_body_bytes {
                return Err(FetchFailure::ContentRejected(format!(
                    "body of {} bytes exceeds limit",
                    length
                )));
            }
        }

        let body = self.read_body(response).await?;

        Ok(FetchedPage {
            final_url,
            status: status.as_u16(),
            content_type,
            etag: header_string(&headers, ETAG.as_str()),
            last_modified: header_string(&headers, LAST_MODIFIED.as_str()),
            checksum: content_checksum(&body),
            body,
        })
    }

    /// Sends a HEAD request and returns the validators the origin reports
    ///
    /// A 405 or 501 answer is not an error: it only means the origin cannot
    /// be probed and the caller should fall through to a full retrieval.
    pub async fn probe(&self, url: &Url) -> Result<ProbeOutcome, FetchFailure> {
        tracing::debug!("HEAD {}", url);
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
            return Ok(ProbeOutcome::Unsupported);
        }
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        let headers = response.headers();
        Ok(ProbeOutcome::Headers(HeaderProbe {
            status: status.as_u16(),
            etag: header_string(headers, ETAG.as_str()),
            last_modified: header_string(headers, LAST_MODIFIED.as_str()),
        }))
    }

    /// Fetches a small text resource without content-type policy
    ///
    /// Used for robots.txt, where any 2xx body is meaningful. The body size
    /// limit still applies.
    pub async fn fetch_text(&self, url: &Url) -> Result<String, FetchFailure> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        let body = self.read_body(response).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Streams a body, giving up as soon as it grows past the size limit
    ///
    /// Chunked and compressed responses carry no usable Content-Length, so
    /// the limit is enforced on the bytes actually received.
    async fn read_body(&self, mut response: Response) -> Result<Vec<u8>, FetchFailure> {
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify_error)? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(FetchFailure::ContentRejected(format!(
                    "body exceeds limit of {} bytes",
                    self.max_body_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    fn is_accepted(&self, content_type: &str) -> bool {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.accepted_content_types
            .iter()
            .any(|accepted| mime.starts_with(accepted.as_str()))
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Maps a reqwest error onto a failure reason
fn classify_error(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::Timeout
    } else if e.is_connect() {
        FetchFailure::Connection(e.to_string())
    } else if let Some(status) = e.status() {
        FetchFailure::Status(status.as_u16())
    } else {
        FetchFailure::Other(e.to_string())
    }
}
