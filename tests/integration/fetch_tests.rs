//! Integration tests for fetch runs
//!
//! These tests use wiremock to create mock HTTP servers and run URL lists
//! through the full pipeline: grouping keys, host queues, the scheduler and
//! the fetch workers.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_fetch::config::{parse_config, Config};
use sumi_fetch::crawler::{
    run_fetch, FetchError, FetchServices, FetchedPage, Fetcher, ScoredUrl,
};
use sumi_fetch::grouping::{
    FixedScoreGenerator, GroupingKey, GroupingKeyGenerator, HostReference, ScoreGenerator,
    SKIP_SCORE,
};
use sumi_fetch::output::{shared, FetchCounters, MemorySink};
use sumi_fetch::UrlStatus;
use tokio::sync::watch;
use tokio::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with extra `[fetcher]` lines
fn test_config(max_threads: u32, fetcher_lines: &str) -> Config {
    parse_config(&format!(
        r#"
[fetcher]
max-threads = {}
default-crawl-delay = 100
request-timeout = 5000
{}

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"
"#,
        max_threads, fetcher_lines
    ))
    .expect("test config should parse")
}

async fn mount_robots(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, page: &str, expected_hits: u64) {
    Mock::given(method("GET"))
        .and(path(page))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("<html><body>{}</body></html>", page))
                .insert_header("content-type", "text/html"),
        )
        .expect(expected_hits)
        .mount(server)
        .await;
}

/// Runs the default HTTP pipeline over `urls`
async fn fetch_all(config: &Config, urls: Vec<String>) -> (MemorySink, Arc<FetchCounters>) {
    let sink = MemorySink::new();
    let services = FetchServices::from_config(config, shared(sink.clone()))
        .expect("Failed to build services");
    let counters = Arc::clone(&services.counters);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = run_fetch(config, urls, services, shutdown_rx)
        .await
        .expect("Fetch run failed");
    assert_eq!(report.aborted_batches, 0);
    assert_eq!(report.dropped_batches, 0);

    (sink, counters)
}

#[tokio::test]
async fn test_empty_robots_allows_everything() {
    let server = MockServer::start().await;
    mount_robots(&server, 200, "").await;
    for page in ["/a", "/b", "/c"] {
        mount_page(&server, page, 1).await;
    }

    let config = test_config(2, "");
    let urls = ["/a", "/b", "/c"]
        .iter()
        .map(|p| format!("{}{}", server.uri(), p))
        .collect();
    let (sink, counters) = fetch_all(&config, urls).await;

    assert_eq!(sink.status_counts().get(&UrlStatus::Fetched), Some(&3));
    assert_eq!(sink.pages().len(), 3);
    let snap = counters.snapshot();
    assert_eq!(snap.urls_fetched, 3);
    assert_eq!(snap.urls_fetching, 0);
    assert_eq!(snap.domains_processing, 0);
}

#[tokio::test]
async fn test_wildcard_disallow_blocks_matching_paths() {
    let server = MockServer::start().await;
    mount_robots(&server, 200, "User-agent: *\nDisallow: /private\n").await;
    mount_page(&server, "/public", 1).await;
    mount_page(&server, "/private/page", 0).await;

    let config = test_config(2, "");
    let public = format!("{}/public", server.uri());
    let private = format!("{}/private/page", server.uri());
    let (sink, _) = fetch_all(&config, vec![public.clone(), private.clone()]).await;

    assert_eq!(sink.status_of(&public), Some(UrlStatus::Fetched));
    assert_eq!(sink.status_of(&private), Some(UrlStatus::SkippedBlocked));
}

#[tokio::test]
async fn test_agent_specific_block_wins_over_wildcard() {
    let server = MockServer::start().await;
    mount_robots(
        &server,
        200,
        "User-agent: TestBot\nDisallow: /a\n\nUser-agent: *\nDisallow: /b\n",
    )
    .await;
    mount_page(&server, "/a", 0).await;
    mount_page(&server, "/b", 1).await;

    let config = test_config(2, "");
    let a = format!("{}/a", server.uri());
    let b = format!("{}/b", server.uri());
    let (sink, _) = fetch_all(&config, vec![a.clone(), b.clone()]).await;

    assert_eq!(sink.status_of(&a), Some(UrlStatus::SkippedBlocked));
    assert_eq!(sink.status_of(&b), Some(UrlStatus::Fetched));
}

#[tokio::test]
async fn test_robots_server_error_defers_host() {
    let server = MockServer::start().await;
    mount_robots(&server, 503, "Service Unavailable").await;
    mount_page(&server, "/page", 0).await;

    let config = test_config(2, "");
    let url = format!("{}/page", server.uri());
    let (sink, counters) = fetch_all(&config, vec![url.clone()]).await;

    assert_eq!(sink.status_of(&url), Some(UrlStatus::SkippedDeferred));
    assert!(sink.pages().is_empty());
    assert_eq!(counters.snapshot().urls_skipped, 1);
}

#[tokio::test]
async fn test_past_deadline_skips_without_fetching() {
    let server = MockServer::start().await;
    mount_robots(&server, 200, "").await;
    mount_page(&server, "/one", 0).await;
    mount_page(&server, "/two", 0).await;

    let mut config = test_config(2, "");
    config.fetcher.crawl_end_time = Some(Utc::now() - ChronoDuration::seconds(10));
    let urls = vec![
        format!("{}/one", server.uri()),
        format!("{}/two", server.uri()),
    ];
    let (sink, counters) = fetch_all(&config, urls).await;

    assert_eq!(sink.status_counts().get(&UrlStatus::SkippedTimeLimit), Some(&2));
    assert_eq!(counters.snapshot().urls_fetched, 0);
}

#[tokio::test]
async fn test_large_host_split_into_batches() {
    let server = MockServer::start().await;
    mount_robots(&server, 200, "").await;
    let pages: Vec<String> = (0..5).map(|i| format!("/p{}", i)).collect();
    for page in &pages {
        mount_page(&server, page, 1).await;
    }

    let config = test_config(2, "max-urls-per-batch = 2");
    let urls = pages
        .iter()
        .map(|p| format!("{}{}", server.uri(), p))
        .collect();
    let (sink, _) = fetch_all(&config, urls).await;

    assert_eq!(sink.status_counts().get(&UrlStatus::Fetched), Some(&5));
}

#[tokio::test]
async fn test_invalid_and_mixed_urls() {
    let server = MockServer::start().await;
    mount_robots(&server, 200, "").await;
    mount_page(&server, "/ok", 1).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = test_config(2, "");
    let ok = format!("{}/ok", server.uri());
    let missing = format!("{}/missing", server.uri());
    let (sink, counters) = fetch_all(
        &config,
        vec![ok.clone(), "not a url".to_string(), missing.clone()],
    )
    .await;

    assert_eq!(sink.status_of(&ok), Some(UrlStatus::Fetched));
    assert_eq!(sink.status_of("not a url"), Some(UrlStatus::SkippedInvalidUrl));
    assert_eq!(sink.status_of(&missing), Some(UrlStatus::HttpError));
    assert_eq!(counters.snapshot().urls_done(), 3);
}

/// Groups URLs by host name with a fixed crawl delay, without any lookups
struct HostNameKeys {
    crawl_delay: Duration,
}

#[async_trait]
impl GroupingKeyGenerator for HostNameKeys {
    async fn grouping_key(&self, url: &str) -> GroupingKey {
        match url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) {
            Some(host) => GroupingKey::Host(HostReference::new(1, host, Some(self.crawl_delay))),
            None => GroupingKey::InvalidUrl,
        }
    }
}

/// Skips URLs containing "skip"
struct KeywordScorer;

#[async_trait]
impl ScoreGenerator for KeywordScorer {
    async fn score(&self, url: &str, _key: &GroupingKey) -> f32 {
        if url.contains("skip") {
            SKIP_SCORE
        } else {
            1.0
        }
    }
}

/// Records the start time of every fetch and the peak concurrency per host
#[derive(Default)]
struct RecordingFetcher {
    starts: Mutex<Vec<(String, Instant)>>,
    running: Mutex<HashMap<String, usize>>,
    max_running: Mutex<HashMap<String, usize>>,
}

impl RecordingFetcher {
    fn host_of(url: &str) -> String {
        url.split('/').nth(2).unwrap_or_default().to_string()
    }

    fn starts_for(&self, host: &str) -> Vec<Instant> {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, t)| *t)
            .collect()
    }
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn fetch(&self, url: &ScoredUrl) -> Result<FetchedPage, FetchError> {
        let host = Self::host_of(&url.url);
        self.starts.lock().unwrap().push((host.clone(), Instant::now()));
        {
            let mut running = self.running.lock().unwrap();
            let count = running.entry(host.clone()).or_insert(0);
            *count += 1;
            let mut max = self.max_running.lock().unwrap();
            let peak = max.entry(host.clone()).or_insert(0);
            *peak = (*peak).max(*count);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        *self.running.lock().unwrap().get_mut(&host).unwrap() -= 1;
        Ok(FetchedPage {
            base_url: url.url.clone(),
            final_url: url.url.clone(),
            status_code: 200,
            content_type: Some("text/html".to_string()),
            headers: Vec::new(),
            content: vec![b'x'; 10],
            fetched_at: Utc::now(),
            elapsed: Duration::from_millis(50),
        })
    }
}

fn recording_services(
    fetcher: Arc<RecordingFetcher>,
    sink: &MemorySink,
    scorer: Arc<dyn ScoreGenerator>,
) -> FetchServices {
    FetchServices {
        key_generator: Arc::new(HostNameKeys {
            crawl_delay: Duration::from_secs(1),
        }),
        scorer,
        fetcher,
        sink: shared(sink.clone()),
        counters: Arc::new(FetchCounters::new()),
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_concurrent_batches_and_spacing_per_host() {
    let config = test_config(4, "max-urls-per-batch = 2");
    let fetcher = Arc::new(RecordingFetcher::default());
    let sink = MemorySink::new();
    let services = recording_services(
        Arc::clone(&fetcher),
        &sink,
        Arc::new(FixedScoreGenerator::default()),
    );

    let hosts = ["alpha.test", "beta.test", "gamma.test"];
    let urls = hosts
        .iter()
        .flat_map(|h| (0..6).map(move |i| format!("http://{}/{}", h, i)))
        .collect();
    let (_tx, rx) = watch::channel(false);
    run_fetch(&config, urls, services, rx).await.unwrap();

    assert_eq!(sink.status_counts().get(&UrlStatus::Fetched), Some(&18));
    for host in hosts {
        assert_eq!(fetcher.max_running.lock().unwrap()[host], 1);

        let starts = fetcher.starts_for(host);
        assert_eq!(starts.len(), 6);
        // Batches of two URLs at a 1s crawl delay
        for pair in starts.chunks(2).collect::<Vec<_>>().windows(2) {
            assert!(pair[1][0] - pair[0][0] >= Duration::from_secs(2));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_worker_larger_queue_first() {
    let config = test_config(1, "");
    let fetcher = Arc::new(RecordingFetcher::default());
    let sink = MemorySink::new();
    let services = recording_services(
        Arc::clone(&fetcher),
        &sink,
        Arc::new(FixedScoreGenerator::default()),
    );

    let mut urls: Vec<String> = (0..10).map(|i| format!("http://host{}.test/", i)).collect();
    urls.extend((0..3).map(|i| format!("http://big.test/{}", i)));
    let (_tx, rx) = watch::channel(false);
    run_fetch(&config, urls, services, rx).await.unwrap();

    let starts = fetcher.starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 13);
    assert!(starts[..3].iter().all(|(h, _)| h == "big.test"));

    let mut hosts: Vec<_> = starts[3..].iter().map(|(h, _)| h.clone()).collect();
    hosts.sort();
    hosts.dedup();
    assert_eq!(hosts.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_scorer_can_skip_urls() {
    let config = test_config(2, "");
    let fetcher = Arc::new(RecordingFetcher::default());
    let sink = MemorySink::new();
    let services = recording_services(Arc::clone(&fetcher), &sink, Arc::new(KeywordScorer));

    let urls = vec![
        "http://a.test/keep".to_string(),
        "http://a.test/skip-me".to_string(),
    ];
    let (_tx, rx) = watch::channel(false);
    run_fetch(&config, urls, services, rx).await.unwrap();

    assert_eq!(sink.status_of("http://a.test/keep"), Some(UrlStatus::Fetched));
    assert_eq!(
        sink.status_of("http://a.test/skip-me"),
        Some(UrlStatus::SkippedByScore)
    );
    assert_eq!(fetcher.starts.lock().unwrap().len(), 1);
}
