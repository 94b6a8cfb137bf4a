//! Grouping keys and host references
//!
//! A grouping key is either a [`HostReference`], naming the host (or
//! registrable domain, or IP address) and crawl delay that a set of URLs must
//! be fetched under, or one of five sentinels for URLs that will never be
//! fetched.
//!
//! Text form:
//!
//! ```text
//! 000042-93.184.216.34-30000     42 URLs, crawl delay 30s
//! 000001-example.com-unset       1 URL, no crawl delay from robots.txt
//! GroupingKey-blocked            disallowed by robots.txt
//! ```

use crate::state::UrlStatus;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Prefix shared by all sentinel keys
pub const SPECIAL_KEY_PREFIX: &str = "GroupingKey-";

const UNSET_DELAY: &str = "unset";

static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{6,})-(.+)-(\d+|unset)$").expect("valid host reference pattern")
});

/// Errors from parsing a grouping key
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupingKeyError {
    #[error("Invalid grouping key: {0}")]
    Invalid(String),

    #[error("Unknown special grouping key: {0}")]
    UnknownSpecial(String),
}

/// Identity of a set of URLs that share one politeness budget
///
/// Equality covers all three parts, so the same host under a different
/// crawl delay is a different reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostReference {
    count: u32,
    host: String,
    crawl_delay: Option<Duration>,
}

impl HostReference {
    /// Creates a reference; the host is lower-cased
    pub fn new(count: u32, host: impl Into<String>, crawl_delay: Option<Duration>) -> Self {
        Self {
            count,
            host: host.into().to_lowercase(),
            crawl_delay,
        }
    }

    /// Number of URLs grouped under this reference
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Host name, registrable domain or IP address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Crawl delay from robots.txt, if one was given
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }

    /// Crawl delay, falling back to `default` when robots.txt gave none
    pub fn crawl_delay_or(&self, default: Duration) -> Duration {
        self.crawl_delay.unwrap_or(default)
    }

    /// Same host and delay with a different URL count
    pub fn with_count(&self, count: u32) -> Self {
        Self {
            count,
            host: self.host.clone(),
            crawl_delay: self.crawl_delay,
        }
    }
}

impl fmt::Display for HostReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.crawl_delay {
            Some(delay) => write!(f, "{:06}-{}-{}", self.count, self.host, delay.as_millis()),
            None => write!(f, "{:06}-{}-{}", self.count, self.host, UNSET_DELAY),
        }
    }
}

impl FromStr for HostReference {
    type Err = GroupingKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = REFERENCE_PATTERN
            .captures(s)
            .ok_or_else(|| GroupingKeyError::Invalid(s.to_string()))?;

        let count = caps[1]
            .parse::<u32>()
            .map_err(|_| GroupingKeyError::Invalid(s.to_string()))?;
        let crawl_delay = match &caps[3] {
            UNSET_DELAY => None,
            ms => Some(Duration::from_millis(
                ms.parse::<u64>()
                    .map_err(|_| GroupingKeyError::Invalid(s.to_string()))?,
            )),
        };

        Ok(Self::new(count, &caps[2], crawl_delay))
    }
}

/// Grouping key assigned to every URL before fetching
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupingKey {
    /// URL may be fetched under this reference
    Host(HostReference),

    /// robots.txt disallows the URL
    Blocked,

    /// The host name could not be resolved
    UnknownHost,

    /// robots.txt could not be fetched; try again later
    Deferred,

    /// The scorer chose not to fetch the URL
    Skipped,

    /// The URL could not be parsed
    InvalidUrl,
}

impl GroupingKey {
    /// Checks whether a key string is one of the sentinel keys
    pub fn is_special_key(key: &str) -> bool {
        key.starts_with(SPECIAL_KEY_PREFIX)
    }

    pub fn is_special(&self) -> bool {
        !matches!(self, Self::Host(_))
    }

    pub fn reference(&self) -> Option<&HostReference> {
        match self {
            Self::Host(reference) => Some(reference),
            _ => None,
        }
    }

    /// Status recorded for URLs that carry a sentinel key
    pub fn skip_status(&self) -> Option<UrlStatus> {
        match self {
            Self::Host(_) => None,
            Self::Blocked => Some(UrlStatus::SkippedBlocked),
            Self::UnknownHost => Some(UrlStatus::SkippedUnknownHost),
            Self::Deferred => Some(UrlStatus::SkippedDeferred),
            Self::Skipped => Some(UrlStatus::SkippedByScore),
            Self::InvalidUrl => Some(UrlStatus::SkippedInvalidUrl),
        }
    }

    fn special_suffix(&self) -> Option<&'static str> {
        match self {
            Self::Host(_) => None,
            Self::Blocked => Some("blocked"),
            Self::UnknownHost => Some("unknown"),
            Self::Deferred => Some("deferred"),
            Self::Skipped => Some("skipped"),
            Self::InvalidUrl => Some("invalid"),
        }
    }
}

impl fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(reference) => reference.fmt(f),
            special => write!(
                f,
                "{}{}",
                SPECIAL_KEY_PREFIX,
                special.special_suffix().unwrap_or_default()
            ),
        }
    }
}

impl FromStr for GroupingKey {
    type Err = GroupingKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(suffix) = s.strip_prefix(SPECIAL_KEY_PREFIX) {
            return match suffix {
                "blocked" => Ok(Self::Blocked),
                "unknown" => Ok(Self::UnknownHost),
                "deferred" => Ok(Self::Deferred),
                "skipped" => Ok(Self::Skipped),
                "invalid" => Ok(Self::InvalidUrl),
                _ => Err(GroupingKeyError::UnknownSpecial(s.to_string())),
            };
        }

        s.parse::<HostReference>().map(Self::Host)
    }
}
