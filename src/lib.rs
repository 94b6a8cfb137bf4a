//! Sumi-Fetch: a politeness-aware fetch scheduler
//!
//! This crate fetches a stream of URLs spread over many hosts while obeying
//! each host's robots.txt rules and crawl delay, never running two batches
//! against the same host at once, and bounding total work with a fixed
//! worker pool.

pub mod config;
pub mod crawler;
pub mod grouping;
pub mod output;
pub mod robots;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Fetch operations
///
/// Per-URL fetch failures are not errors at this level; they are reported
/// through the output sink as statuses.
#[derive(Debug, Error)]
pub enum SumiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Robots.txt error: {0}")]
    Robots(#[from] robots::RobotsError),

    #[error("Grouping key error: {0}")]
    GroupingKey(#[from] grouping::GroupingKeyError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Scheduler invariant violations and lifecycle errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Finished reference is not active: {0}")]
    NotActive(String),

    #[error("Reference is already active: {0}")]
    AlreadyActive(String),

    #[error("Scheduler has shut down")]
    Closed,
}

/// Result type alias for Sumi-Fetch operations
pub type Result<T> = std::result::Result<T, SumiError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for scheduler operations
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{FetchError, FetchedPage, ScoredUrl, WorkBatch};
pub use grouping::{GroupingKey, HostReference};
pub use robots::RuleSet;
pub use state::UrlStatus;
