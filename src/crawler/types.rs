//! Records passed between the fetch stages

use crate::grouping::HostReference;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A URL with the score used to order fetches within one host
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredUrl {
    pub url: String,
    pub score: f32,
}

impl ScoredUrl {
    pub fn new(url: impl Into<String>, score: f32) -> Self {
        Self {
            url: url.into(),
            score,
        }
    }
}

/// Successful result of fetching one URL
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// URL that was requested
    pub base_url: String,

    /// URL after redirects
    pub final_url: String,

    /// HTTP status code
    pub status_code: u16,

    /// Content-Type header value, if any
    pub content_type: Option<String>,

    /// Response headers as name/value pairs
    pub headers: Vec<(String, String)>,

    /// Response body, truncated at the configured content size
    pub content: Vec<u8>,

    /// When the fetch started
    pub fetched_at: DateTime<Utc>,

    /// How long the fetch took
    pub elapsed: Duration,
}

impl FetchedPage {
    /// Number of body bytes received
    pub fn byte_count(&self) -> usize {
        self.content.len()
    }

    /// Average download rate in bytes per second
    pub fn response_rate(&self) -> u64 {
        let millis = self.elapsed.as_millis().max(1) as u64;
        (self.content.len() as u64).saturating_mul(1000) / millis
    }
}

/// Why a fetch was cut short by the fetcher itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    SlowResponseRate,
    InvalidMimeType,
    ContentSize,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SlowResponseRate => "slow response rate",
            Self::InvalidMimeType => "invalid mime type",
            Self::ContentSize => "content too large",
        };
        f.write_str(s)
    }
}

/// Categorized failure of a single fetch
///
/// These are per-URL outcomes, recorded in the status output rather than
/// propagated.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("Unknown host for {url}")]
    UnknownHost { url: String },

    #[error("IO error fetching {url}: {message}")]
    Io { url: String, message: String },

    #[error("HTTP status {status} for {url}")]
    Http {
        url: String,
        status: u16,
        headers: Vec<(String, String)>,
    },

    #[error("Fetch of {url} aborted: {reason}")]
    Aborted { url: String, reason: AbortReason },

    #[error("Too many redirects from {url}")]
    RedirectLimit { url: String },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            Self::InvalidUrl { url }
            | Self::UnknownHost { url }
            | Self::Io { url, .. }
            | Self::Http { url, .. }
            | Self::Aborted { url, .. }
            | Self::RedirectLimit { url } => url,
        }
    }
}

/// A run of URLs for one host, fetched back to back by one worker
#[derive(Debug, Clone)]
pub struct WorkBatch {
    /// Host the URLs belong to
    pub reference: HostReference,

    /// URLs in fetch order
    pub urls: Vec<ScoredUrl>,

    /// Minimum gap, counted from dispatch, before the next batch for the
    /// same host may start
    ///
    /// The host's crawl delay is also kept after the batch completes, so the
    /// next batch waits for whichever of the two ends later.
    pub fetch_delay: Duration,

    /// No further batches will be submitted for this host
    pub is_last: bool,
}

impl WorkBatch {
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(len: usize, elapsed_ms: u64) -> FetchedPage {
        FetchedPage {
            base_url: "http://example.com/".to_string(),
            final_url: "http://example.com/".to_string(),
            status_code: 200,
            content_type: Some("text/html".to_string()),
            headers: Vec::new(),
            content: vec![b'x'; len],
            fetched_at: Utc::now(),
            elapsed: Duration::from_millis(elapsed_ms),
        }
    }

    #[test]
    fn test_response_rate() {
        assert_eq!(page(2000, 1000).response_rate(), 2000);
        assert_eq!(page(500, 250).response_rate(), 2000);
    }

    #[test]
    fn test_response_rate_with_zero_elapsed() {
        assert_eq!(page(10, 0).response_rate(), 10_000);
    }

    #[test]
    fn test_fetch_error_url() {
        let err = FetchError::Aborted {
            url: "http://example.com/big".to_string(),
            reason: AbortReason::ContentSize,
        };
        assert_eq!(err.url(), "http://example.com/big");
        assert_eq!(
            err.to_string(),
            "Fetch of http://example.com/big aborted: content too large"
        );
    }
}
