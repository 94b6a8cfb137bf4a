//! Grouping key generation
//!
//! Assigns each URL the key of the host it must be rate limited with, after
//! checking the host resolves and robots.txt allows the URL.

use crate::crawler::Fetcher;
use crate::grouping::{GroupingKey, HostReference};
use crate::robots::{fetch_rules, RobotsCache, RuleSet};
use crate::url::{extract_domain, paid_level_domain};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, trace};
use url::Url;

/// Computes the grouping key for a URL
#[async_trait]
pub trait GroupingKeyGenerator: Send + Sync {
    async fn grouping_key(&self, url: &str) -> GroupingKey;
}

/// Resolves the grouping address for a host name
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Returns the first address for `host`, or None if it does not resolve
    async fn resolve(&self, host: &str, port: u16) -> Option<IpAddr>;
}

/// Resolver backed by the system resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

#[async_trait]
impl HostResolver for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> Option<IpAddr> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip);
        }
        match tokio::net::lookup_host((host, port)).await {
            Ok(mut addrs) => addrs.next().map(|addr| addr.ip()),
            Err(e) => {
                debug!("Failed to resolve {}: {}", host, e);
                None
            }
        }
    }
}

/// Groups URLs by resolved IP address (or paid-level domain) and crawl delay
///
/// | Condition | Key |
/// |-----------|-----|
/// | URL does not parse or has no host | `GroupingKey-invalid` |
/// | Host does not resolve | `GroupingKey-unknown` |
/// | robots.txt could not be determined | `GroupingKey-deferred` |
/// | robots.txt disallows the path | `GroupingKey-blocked` |
/// | Otherwise | `000001-<ip or domain>-<crawl delay>` |
///
/// Host resolutions and robots.txt rules are cached, so each host is looked
/// up at most once per run (rules are refreshed after 24 hours). Concurrent
/// callers for the same host wait on the one lookup in flight.
pub struct SimpleGroupingKeyGenerator {
    robots_fetcher: Arc<dyn Fetcher>,
    resolver: Arc<dyn HostResolver>,
    agent_name: String,
    use_pld: bool,
    robots: RobotsCache,
    addresses: Mutex<HashMap<String, Arc<OnceCell<Option<IpAddr>>>>>,
}

impl SimpleGroupingKeyGenerator {
    /// Creates a generator
    ///
    /// # Arguments
    ///
    /// * `robots_fetcher` - Fetcher for robots.txt requests
    /// * `agent_name` - Name matched against robots.txt `User-agent` lines
    /// * `use_pld` - Group by paid-level domain instead of IP address
    pub fn new(
        robots_fetcher: Arc<dyn Fetcher>,
        agent_name: impl Into<String>,
        use_pld: bool,
    ) -> Self {
        Self::with_resolver(robots_fetcher, Arc::new(DnsResolver), agent_name, use_pld)
    }

    pub fn with_resolver(
        robots_fetcher: Arc<dyn Fetcher>,
        resolver: Arc<dyn HostResolver>,
        agent_name: impl Into<String>,
        use_pld: bool,
    ) -> Self {
        Self {
            robots_fetcher,
            resolver,
            agent_name: agent_name.into(),
            use_pld,
            robots: RobotsCache::default(),
            addresses: Mutex::new(HashMap::new()),
        }
    }

    /// Number of hosts with cached robots.txt rules
    pub fn cached_rules(&self) -> usize {
        self.robots.len()
    }

    #[cfg(test)]
    fn is_unknown(&self, host: &str) -> bool {
        self.addresses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(host)
            .and_then(|cell| cell.get())
            .is_some_and(Option::is_none)
    }

    async fn address_for(&self, host: &str, port: u16) -> Option<IpAddr> {
        let cell = Arc::clone(
            self.addresses
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(host.to_string())
                .or_default(),
        );
        let address = *cell
            .get_or_init(move || async move {
                let address = self.resolver.resolve(host, port).await;
                if address.is_none() {
                    debug!("Unknown host {}", host);
                }
                address
            })
            .await;
        address
    }

    async fn rules_for(&self, host: &str, url: &Url) -> Arc<RuleSet> {
        self.robots
            .get_or_fetch(host, move || {
                fetch_rules(self.robots_fetcher.as_ref(), &self.agent_name, url)
            })
            .await
    }
}

#[async_trait]
impl GroupingKeyGenerator for SimpleGroupingKeyGenerator {
    async fn grouping_key(&self, url: &str) -> GroupingKey {
        let Ok(parsed) = Url::parse(url) else {
            return GroupingKey::InvalidUrl;
        };
        let Some(host) = extract_domain(&parsed) else {
            return GroupingKey::InvalidUrl;
        };

        let address = if self.use_pld {
            paid_level_domain(&host)
        } else {
            let port = parsed.port_or_known_default().unwrap_or(80);
            match self.address_for(&host, port).await {
                Some(ip) => ip.to_string(),
                None => return GroupingKey::UnknownHost,
            }
        };

        let rules = self.rules_for(&host, &parsed).await;
        if rules.defer_visits() {
            trace!("Deferring {}", url);
            GroupingKey::Deferred
        } else if rules.is_allowed_url(&parsed) {
            GroupingKey::Host(HostReference::new(1, address, rules.crawl_delay()))
        } else {
            trace!("Blocked by robots.txt: {}", url);
            GroupingKey::Blocked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetcherConfig, UserAgentConfig};
    use crate::crawler::{FetchError, FetchLimits, FetchedPage, HttpFetcher, ScoredUrl};
    use chrono::Utc;
    use futures::stream::{self, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedResolver(Option<IpAddr>);

    #[async_trait]
    impl HostResolver for FixedResolver {
        async fn resolve(&self, _host: &str, _port: u16) -> Option<IpAddr> {
            self.0
        }
    }

    /// Counts resolutions; every host resolves to 10.0.0.1 after 20ms
    #[derive(Default)]
    struct CountingResolver(AtomicUsize);

    #[async_trait]
    impl HostResolver for CountingResolver {
        async fn resolve(&self, _host: &str, _port: u16) -> Option<IpAddr> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Some(IpAddr::from([10, 0, 0, 1]))
        }
    }

    /// Serves an empty robots.txt after 50ms, counting requests
    #[derive(Default)]
    struct CountingRobotsFetcher(AtomicUsize);

    #[async_trait]
    impl Fetcher for CountingRobotsFetcher {
        async fn fetch(&self, url: &ScoredUrl) -> Result<FetchedPage, FetchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(FetchedPage {
                base_url: url.url.clone(),
                final_url: url.url.clone(),
                status_code: 200,
                content_type: Some("text/plain".to_string()),
                headers: Vec::new(),
                content: b"User-agent: *\nCrawl-delay: 2\n".to_vec(),
                fetched_at: Utc::now(),
                elapsed: Duration::from_millis(50),
            })
        }
    }

    fn robots_fetcher() -> Arc<dyn Fetcher> {
        let user_agent = UserAgentConfig {
            crawler_name: "testbot".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        };
        let limits = FetchLimits::for_robots(&FetcherConfig::with_threads(1));
        Arc::new(HttpFetcher::new(&user_agent, limits).unwrap())
    }

    async fn server_with_robots(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_invalid_urls() {
        let generator = SimpleGroupingKeyGenerator::new(robots_fetcher(), "testbot", false);
        assert_eq!(generator.grouping_key("not a url").await, GroupingKey::InvalidUrl);
        assert_eq!(
            generator.grouping_key("mailto:someone@example.com").await,
            GroupingKey::InvalidUrl
        );
    }

    #[tokio::test]
    async fn test_unknown_host_is_cached() {
        let generator = SimpleGroupingKeyGenerator::with_resolver(
            robots_fetcher(),
            Arc::new(FixedResolver(None)),
            "testbot",
            false,
        );
        assert_eq!(
            generator.grouping_key("http://nowhere.invalid/").await,
            GroupingKey::UnknownHost
        );
        assert!(generator.is_unknown("nowhere.invalid"));
        assert_eq!(
            generator.grouping_key("http://nowhere.invalid/other").await,
            GroupingKey::UnknownHost
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_share_robots_and_dns() {
        let robots = Arc::new(CountingRobotsFetcher::default());
        let resolver = Arc::new(CountingResolver::default());
        let generator = SimpleGroupingKeyGenerator::with_resolver(
            robots.clone(),
            resolver.clone(),
            "testbot",
            false,
        );

        let keys: Vec<GroupingKey> = stream::iter(0..8)
            .map(|i| {
                let generator = &generator;
                async move {
                    generator
                        .grouping_key(&format!("http://example.com/page{}", i))
                        .await
                }
            })
            .buffered(8)
            .collect()
            .await;

        assert_eq!(robots.0.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.0.load(Ordering::SeqCst), 1);
        assert_eq!(generator.cached_rules(), 1);
        for key in keys {
            assert_eq!(key.to_string(), "000001-10.0.0.1-2000");
        }
    }

    #[tokio::test]
    async fn test_allowed_and_blocked_urls() {
        let server =
            server_with_robots(200, "User-agent: *\nDisallow: /private\nCrawl-delay: 5\n").await;
        let generator = SimpleGroupingKeyGenerator::new(robots_fetcher(), "testbot", false);

        let key = generator
            .grouping_key(&format!("{}/public/page", server.uri()))
            .await;
        let reference = key.reference().unwrap();
        assert_eq!(reference.count(), 1);
        assert_eq!(reference.host(), "127.0.0.1");
        assert_eq!(reference.crawl_delay(), Some(Duration::from_secs(5)));

        assert_eq!(
            generator
                .grouping_key(&format!("{}/private/page", server.uri()))
                .await,
            GroupingKey::Blocked
        );
        // Rules are fetched once per host
        assert_eq!(generator.cached_rules(), 1);
    }

    #[tokio::test]
    async fn test_server_error_defers_host() {
        let server = server_with_robots(503, "").await;
        let generator = SimpleGroupingKeyGenerator::new(robots_fetcher(), "testbot", false);

        assert_eq!(
            generator.grouping_key(&format!("{}/a", server.uri())).await,
            GroupingKey::Deferred
        );
        assert_eq!(
            generator.grouping_key(&format!("{}/b", server.uri())).await,
            GroupingKey::Deferred
        );
    }

    #[tokio::test]
    async fn test_missing_robots_allows_everything() {
        let server = server_with_robots(404, "").await;
        let generator = SimpleGroupingKeyGenerator::new(robots_fetcher(), "testbot", false);

        let key = generator.grouping_key(&format!("{}/x", server.uri())).await;
        assert_eq!(key.reference().and_then(|r| r.crawl_delay()), None);
        assert_eq!(key.to_string(), "000001-127.0.0.1-unset");
    }

    #[tokio::test]
    async fn test_pld_grouping_skips_resolution() {
        let server = server_with_robots(404, "").await;
        let generator = SimpleGroupingKeyGenerator::with_resolver(
            robots_fetcher(),
            Arc::new(FixedResolver(None)),
            "testbot",
            true,
        );

        // Resolution is never consulted in PLD mode
        let key = generator.grouping_key(&format!("{}/x", server.uri())).await;
        assert_eq!(key.reference().map(|r| r.host()), Some("127.0.0.1"));
    }
}
