/// Final status of each URL handed to the fetcher
///
/// Every URL that enters a fetch run leaves it with exactly one of these.
use crate::crawler::{AbortReason, FetchError};
use std::fmt;

/// Outcome recorded for one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlStatus {
    // ===== Success =====
    /// Page was fetched
    Fetched,

    // ===== Skipped before fetching =====
    /// robots.txt disallows the URL
    SkippedBlocked,

    /// Host name could not be resolved
    SkippedUnknownHost,

    /// URL could not be parsed
    SkippedInvalidUrl,

    /// Host was busy or its robots.txt could not be fetched; retry later
    SkippedDeferred,

    /// Scorer chose not to fetch the URL
    SkippedByScore,

    /// Crawl end time had passed
    SkippedTimeLimit,

    /// Fetch run was shut down before the URL was attempted
    SkippedInterrupted,

    // ===== Aborted by the fetcher =====
    /// Response was slower than the minimum rate
    AbortedSlowResponse,

    /// Content-Type was not in the accepted set
    AbortedInvalidMimeType,

    /// Body exceeded the maximum content size
    AbortedContentSize,

    // ===== Errors =====
    /// Server returned a non-success status
    HttpError,

    /// Redirect chain exceeded the limit
    RedirectLimit,

    /// Fetcher rejected the URL
    ErrorInvalidUrl,

    /// Host lookup failed during the fetch
    ErrorUnknownHost,

    /// Transport failure
    ErrorIo,
}

impl UrlStatus {
    /// Maps a fetch failure onto its status
    pub fn from_fetch_error(error: &FetchError) -> Self {
        match error {
            FetchError::InvalidUrl { .. } => Self::ErrorInvalidUrl,
            FetchError::UnknownHost { .. } => Self::ErrorUnknownHost,
            FetchError::Io { .. } => Self::ErrorIo,
            FetchError::Http { .. } => Self::HttpError,
            FetchError::RedirectLimit { .. } => Self::RedirectLimit,
            FetchError::Aborted { reason, .. } => match reason {
                AbortReason::SlowResponseRate => Self::AbortedSlowResponse,
                AbortReason::InvalidMimeType => Self::AbortedInvalidMimeType,
                AbortReason::ContentSize => Self::AbortedContentSize,
            },
        }
    }

    /// Returns true if the page was fetched
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Fetched)
    }

    /// Returns true if the URL never reached the fetcher
    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            Self::SkippedBlocked
                | Self::SkippedUnknownHost
                | Self::SkippedInvalidUrl
                | Self::SkippedDeferred
                | Self::SkippedByScore
                | Self::SkippedTimeLimit
                | Self::SkippedInterrupted
        )
    }

    /// Returns true if the fetch was attempted and failed
    pub fn is_error(&self) -> bool {
        !self.is_success() && !self.is_skipped()
    }

    /// Short name used in status output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetched => "fetched",
            Self::SkippedBlocked => "skipped_blocked",
            Self::SkippedUnknownHost => "skipped_unknown_host",
            Self::SkippedInvalidUrl => "skipped_invalid_url",
            Self::SkippedDeferred => "skipped_deferred",
            Self::SkippedByScore => "skipped_by_score",
            Self::SkippedTimeLimit => "skipped_time_limit",
            Self::SkippedInterrupted => "skipped_interrupted",
            Self::AbortedSlowResponse => "aborted_slow_response",
            Self::AbortedInvalidMimeType => "aborted_invalid_mime_type",
            Self::AbortedContentSize => "aborted_content_size",
            Self::HttpError => "http_error",
            Self::RedirectLimit => "redirect_limit",
            Self::ErrorInvalidUrl => "error_invalid_url",
            Self::ErrorUnknownHost => "error_unknown_host",
            Self::ErrorIo => "error_io",
        }
    }

    /// Parses a status from its short name
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_str_name(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|status| status.as_str() == s)
    }

    /// Returns all statuses
    pub fn all() -> Vec<Self> {
        vec![
            Self::Fetched,
            Self::SkippedBlocked,
            Self::SkippedUnknownHost,
            Self::SkippedInvalidUrl,
            Self::SkippedDeferred,
            Self::SkippedByScore,
            Self::SkippedTimeLimit,
            Self::SkippedInterrupted,
            Self::AbortedSlowResponse,
            Self::AbortedInvalidMimeType,
            Self::AbortedContentSize,
            Self::HttpError,
            Self::RedirectLimit,
            Self::ErrorInvalidUrl,
            Self::ErrorUnknownHost,
            Self::ErrorIo,
        ]
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_status_is_exactly_one_kind() {
        for status in UrlStatus::all() {
            let kinds = [status.is_success(), status.is_skipped(), status.is_error()];
            assert_eq!(kinds.iter().filter(|k| **k).count(), 1, "{}", status);
        }
    }

    #[test]
    fn test_skipped_statuses() {
        assert!(UrlStatus::SkippedTimeLimit.is_skipped());
        assert!(UrlStatus::SkippedInterrupted.is_skipped());
        assert!(!UrlStatus::Fetched.is_skipped());
        assert!(!UrlStatus::ErrorIo.is_skipped());
    }

    #[test]
    fn test_name_round_trip() {
        for status in UrlStatus::all() {
            assert_eq!(UrlStatus::from_str_name(status.as_str()), Some(status));
        }
        assert_eq!(UrlStatus::from_str_name("bogus"), None);
    }

    #[test]
    fn test_from_fetch_error() {
        let url = "http://example.com/".to_string();
        assert_eq!(
            UrlStatus::from_fetch_error(&FetchError::Http {
                url: url.clone(),
                status: 404,
                headers: Vec::new(),
            }),
            UrlStatus::HttpError
        );
        assert_eq!(
            UrlStatus::from_fetch_error(&FetchError::Aborted {
                url: url.clone(),
                reason: AbortReason::SlowResponseRate,
            }),
            UrlStatus::AbortedSlowResponse
        );
        assert_eq!(
            UrlStatus::from_fetch_error(&FetchError::Io {
                url,
                message: "connection reset".to_string(),
            }),
            UrlStatus::ErrorIo
        );
    }
}
