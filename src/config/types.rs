use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Main configuration structure for Sumi-Fetch
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub fetcher: FetcherConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Fetch scheduling and transport limits
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Number of batches fetched concurrently
    #[serde(rename = "max-threads")]
    pub max_threads: u32,

    /// Upper bound on URLs fetched back to back from one host
    #[serde(rename = "max-urls-per-batch", default = "default_max_urls_per_batch")]
    pub max_urls_per_batch: u32,

    /// Crawl delay used when robots.txt gives none (milliseconds)
    #[serde(rename = "default-crawl-delay", default = "default_crawl_delay")]
    pub default_crawl_delay: u64,

    /// How far ahead one host's work is planned (milliseconds)
    #[serde(rename = "fetch-interval", default = "default_fetch_interval")]
    pub fetch_interval: u64,

    /// Batches admitted after this time are skipped (RFC 3339 string)
    #[serde(rename = "crawl-end-time", default)]
    pub crawl_end_time: Option<DateTime<Utc>>,

    /// Abort responses slower than this many bytes per second
    #[serde(rename = "min-response-rate", default)]
    pub min_response_rate: Option<u64>,

    /// Maximum body size in bytes
    #[serde(rename = "max-content-size", default = "default_max_content_size")]
    pub max_content_size: usize,

    /// Maximum redirects followed per fetch
    #[serde(rename = "max-redirects", default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Accepted Content-Type values; any type is accepted when absent
    #[serde(rename = "valid-mime-types", default)]
    pub valid_mime_types: Option<Vec<String>>,

    /// Value of the Accept-Language header
    #[serde(rename = "accept-language", default = "default_accept_language")]
    pub accept_language: String,

    /// Per-request timeout (milliseconds)
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Group hosts by registrable domain instead of resolved IP address
    #[serde(rename = "use-pld", default)]
    pub use_pld: bool,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler, also matched against robots.txt records
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Output configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// File for per-URL status lines; stdout when absent
    #[serde(rename = "status-path", default)]
    pub status_path: Option<String>,
}

fn default_max_urls_per_batch() -> u32 {
    50
}

fn default_crawl_delay() -> u64 {
    30_000
}

fn default_fetch_interval() -> u64 {
    5 * 60 * 1000
}

fn default_max_content_size() -> usize {
    64 * 1024
}

fn default_max_redirects() -> u32 {
    20
}

fn default_accept_language() -> String {
    "en-us,en-gb,en;q=0.7,*;q=0.3".to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

impl FetcherConfig {
    /// Configuration with every optional field at its default
    pub fn with_threads(max_threads: u32) -> Self {
        Self {
            max_threads,
            max_urls_per_batch: default_max_urls_per_batch(),
            default_crawl_delay: default_crawl_delay(),
            fetch_interval: default_fetch_interval(),
            crawl_end_time: None,
            min_response_rate: None,
            max_content_size: default_max_content_size(),
            max_redirects: default_max_redirects(),
            valid_mime_types: None,
            accept_language: default_accept_language(),
            request_timeout: default_request_timeout(),
            use_pld: false,
        }
    }
}
