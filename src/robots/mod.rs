//! Robots.txt handling module
//!
//! This module provides fetching, parsing and caching of robots.txt rules.
//! Hosts whose rules cannot be determined are deferred, never fetched.

mod cache;
mod parser;

pub use cache::{CachedRules, RobotsCache};
pub use parser::{RobotsError, RobotsRule, RuleSet, MAX_CRAWL_DELAY_MS, MAX_WARNINGS};

use crate::crawler::{FetchError, Fetcher, ScoredUrl};
use tracing::{debug, warn};
use url::Url;

/// Builds the robots.txt URL for the host of `url`
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_fetch::robots::robots_url;
///
/// let url = Url::parse("https://Example.com:8443/a/b?c=d").unwrap();
/// assert_eq!(
///     robots_url(&url).unwrap().as_str(),
///     "https://example.com:8443/robots.txt"
/// );
/// ```
pub fn robots_url(url: &Url) -> Result<Url, url::ParseError> {
    url.join("/robots.txt")
}

/// Fetches and parses the robots.txt rules for the host of `url`
///
/// Transport problems never fail this call; they produce rules that defer
/// the host.
///
/// # Arguments
///
/// * `fetcher` - Fetcher used for the robots.txt request
/// * `agent_name` - Name matched against `User-agent` lines
/// * `url` - Any URL on the host
///
/// # Returns
///
/// | Fetch outcome | Rules |
/// |---------------|-------|
/// | Success | Parsed from the body |
/// | HTTP status error | [`RuleSet::from_status_code`] |
/// | Too many redirects | Deferred |
/// | Anything else | Deferred |
pub async fn fetch_rules(fetcher: &dyn Fetcher, agent_name: &str, url: &Url) -> RuleSet {
    let robots = match robots_url(url) {
        Ok(robots) => robots,
        Err(e) => {
            debug!("Cannot build robots.txt URL for {}: {}", url, e);
            return RuleSet::deferred();
        }
    };

    let request = ScoredUrl::new(robots.as_str(), 1.0);
    let rules = match fetcher.fetch(&request).await {
        Ok(page) => RuleSet::parse_with_content_type(
            agent_name,
            &page.content,
            page.content_type.as_deref(),
        ),
        Err(FetchError::Http { status, .. }) => {
            debug!("robots.txt for {} returned status {}", url, status);
            // A 2xx here means the fetcher rejected the body; treat it as an error.
            RuleSet::from_status_code(status).unwrap_or_else(|_| RuleSet::deferred())
        }
        Err(FetchError::RedirectLimit { .. }) => RuleSet::deferred(),
        Err(e) => {
            debug!("Failed to fetch robots.txt for {}: {}", url, e);
            RuleSet::deferred()
        }
    };

    if rules.warning_count() > 0 {
        warn!(
            "Problem processing robots.txt for {}: {} warnings",
            robots,
            rules.warning_count()
        );
        for message in rules.warnings() {
            warn!("  {}", message);
        }
    }

    rules
}
