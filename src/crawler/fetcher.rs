//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests, including:
//! - Building HTTP clients with proper user agent strings
//! - Redirect limits
//! - Content-Type filtering
//! - Content size and response rate limits
//! - Error classification

use crate::config::{FetcherConfig, UserAgentConfig};
use crate::crawler::types::{AbortReason, FetchError, FetchedPage, ScoredUrl};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{redirect::Policy, Client, Response};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Responses are not checked against the minimum rate before this much time
const RATE_CHECK_GRACE: Duration = Duration::from_secs(1);

/// Some robots.txt files are larger than a typical page limit
const ROBOTS_MAX_CONTENT_SIZE: usize = 128 * 1024;
const ROBOTS_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches one URL
///
/// Implementations must be shareable between workers. Every failure is
/// returned as a categorized [`FetchError`]; nothing is retried.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &ScoredUrl) -> Result<FetchedPage, FetchError>;
}

/// Transport limits applied to every request
#[derive(Debug, Clone, PartialEq)]
pub struct FetchLimits {
    pub max_content_size: usize,
    pub max_redirects: u32,
    /// Minimum bytes per second, checked after a short grace period
    pub min_response_rate: Option<u64>,
    /// Accepted MIME types, lower-cased; None accepts anything
    pub valid_mime_types: Option<Vec<String>>,
    pub accept_language: String,
    pub request_timeout: Duration,
}

impl FetchLimits {
    pub fn from_config(config: &FetcherConfig) -> Self {
        Self {
            max_content_size: config.max_content_size,
            max_redirects: config.max_redirects,
            min_response_rate: config.min_response_rate,
            valid_mime_types: config
                .valid_mime_types
                .as_ref()
                .map(|types| types.iter().map(|t| t.trim().to_lowercase()).collect()),
            accept_language: config.accept_language.clone(),
            request_timeout: Duration::from_millis(config.request_timeout),
        }
    }

    /// Limits for robots.txt requests: larger body, shorter timeout
    pub fn for_robots(config: &FetcherConfig) -> Self {
        Self {
            max_content_size: ROBOTS_MAX_CONTENT_SIZE,
            min_response_rate: None,
            valid_mime_types: None,
            request_timeout: ROBOTS_TIMEOUT,
            ..Self::from_config(config)
        }
    }

    fn accepts_mime_type(&self, content_type: Option<&str>) -> bool {
        let (Some(valid), Some(content_type)) = (&self.valid_mime_types, content_type) else {
            return true;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        valid.iter().any(|v| *v == mime)
    }
}

/// Formats the User-Agent header value
///
/// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
pub fn user_agent_string(config: &UserAgentConfig) -> String {
    format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    )
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `limits` - Timeout and redirect limits
///
/// # Example
///
/// ```no_run
/// use sumi_fetch::config::{FetcherConfig, UserAgentConfig};
/// use sumi_fetch::crawler::{build_http_client, FetchLimits};
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiFetch".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
/// let limits = FetchLimits::from_config(&FetcherConfig::with_threads(4));
///
/// let client = build_http_client(&config, &limits).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    limits: &FetchLimits,
) -> Result<Client, reqwest::Error> {
    let redirects = if limits.max_redirects == 0 {
        Policy::none()
    } else {
        Policy::limited(limits.max_redirects as usize)
    };

    Client::builder()
        .user_agent(user_agent_string(config))
        .timeout(limits.request_timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(redirects)
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`Fetcher`] backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    limits: FetchLimits,
}

impl HttpFetcher {
    pub fn new(user_agent: &UserAgentConfig, limits: FetchLimits) -> Result<Self, reqwest::Error> {
        let client = build_http_client(user_agent, &limits)?;
        Ok(Self { client, limits })
    }

    /// Fetcher for page requests
    pub fn from_config(config: &crate::config::Config) -> Result<Self, reqwest::Error> {
        Self::new(&config.user_agent, FetchLimits::from_config(&config.fetcher))
    }

    /// Fetcher for robots.txt requests
    pub fn for_robots(config: &crate::config::Config) -> Result<Self, reqwest::Error> {
        Self::new(&config.user_agent, FetchLimits::for_robots(&config.fetcher))
    }

    pub fn limits(&self) -> &FetchLimits {
        &self.limits
    }

    async fn read_body(
        &self,
        url: &str,
        mut response: Response,
        started: Instant,
    ) -> Result<Vec<u8>, FetchError> {
        let mut content = Vec::new();
        loop {
            let chunk = response.chunk().await.map_err(|e| classify_error(url, &e))?;
            let Some(chunk) = chunk else {
                break;
            };

            let room = self.limits.max_content_size - content.len();
            if chunk.len() >= room {
                content.extend_from_slice(&chunk[..room]);
                tracing::trace!("Truncated {} at {} bytes", url, content.len());
                break;
            }
            content.extend_from_slice(&chunk);

            if let Some(min_rate) = self.limits.min_response_rate {
                let elapsed = started.elapsed();
                if elapsed > RATE_CHECK_GRACE {
                    let rate = (content.len() as u64).saturating_mul(1000)
                        / (elapsed.as_millis().max(1) as u64);
                    if rate < min_rate {
                        return Err(FetchError::Aborted {
                            url: url.to_string(),
                            reason: AbortReason::SlowResponseRate,
                        });
                    }
                }
            }
        }
        Ok(content)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &ScoredUrl) -> Result<FetchedPage, FetchError> {
        let url = request.url.as_str();
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
            });
        }

        let fetched_at = Utc::now();
        let started = Instant::now();
        let response = self
            .client
            .get(parsed)
            .header(ACCEPT_LANGUAGE, self.limits.accept_language.as_str())
            .send()
            .await
            .map_err(|e| classify_error(url, &e))?;

        let status = response.status();
        let headers = header_pairs(&response);
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
                headers,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !self.limits.accepts_mime_type(content_type.as_deref()) {
            return Err(FetchError::Aborted {
                url: url.to_string(),
                reason: AbortReason::InvalidMimeType,
            });
        }

        let declared_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared_length.is_some_and(|len| len > self.limits.max_content_size) {
            return Err(FetchError::Aborted {
                url: url.to_string(),
                reason: AbortReason::ContentSize,
            });
        }

        let final_url = response.url().to_string();
        let content = self.read_body(url, response, started).await?;

        Ok(FetchedPage {
            base_url: url.to_string(),
            final_url,
            status_code: status.as_u16(),
            content_type,
            headers,
            content,
            fetched_at,
            elapsed: started.elapsed(),
        })
    }
}

fn header_pairs(response: &Response) -> Vec<(String, String)> {
    response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Maps a transport error to its fetch error category
fn classify_error(url: &str, error: &reqwest::Error) -> FetchError {
    if error.is_redirect() {
        return FetchError::RedirectLimit {
            url: url.to_string(),
        };
    }
    if error.is_builder() {
        return FetchError::InvalidUrl {
            url: url.to_string(),
        };
    }
    if error.is_connect() && is_dns_failure(error) {
        return FetchError::UnknownHost {
            url: url.to_string(),
        };
    }

    let message = if error.is_timeout() {
        "Request timeout".to_string()
    } else if error.is_connect() {
        "Connection refused".to_string()
    } else {
        error.to_string()
    };
    FetchError::Io {
        url: url.to_string(),
        message,
    }
}

fn is_dns_failure(error: &reqwest::Error) -> bool {
    let mut source: Option<&dyn std::error::Error> = Some(error);
    while let Some(err) = source {
        let text = err.to_string().to_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("no such host")
        {
            return true;
        }
        source = err.source();
    }
    false
}
