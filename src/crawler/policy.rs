//! Batch sizing and deadline policy
//!
//! Decides how many URLs one host gets per batch and how long the host must
//! then rest, and tracks the optional end-of-crawl deadline.

use crate::config::FetcherConfig;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Size and spacing of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    /// URLs to take from the host's queue
    pub num_urls: usize,

    /// Earliest start for the host's following batch
    pub next_fetch_time: Instant,

    /// `next_fetch_time - now`
    pub fetch_delay: Duration,
}

/// Fetch pacing derived from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FetcherPolicy {
    crawl_end_time: Option<DateTime<Utc>>,
    default_crawl_delay: Duration,
    fetch_interval: Duration,
    max_requests_per_connection: usize,
}

impl FetcherPolicy {
    pub fn new(
        crawl_end_time: Option<DateTime<Utc>>,
        default_crawl_delay: Duration,
        fetch_interval: Duration,
        max_requests_per_connection: usize,
    ) -> Self {
        Self {
            crawl_end_time,
            default_crawl_delay,
            fetch_interval,
            max_requests_per_connection: max_requests_per_connection.max(1),
        }
    }

    pub fn from_config(config: &FetcherConfig) -> Self {
        Self::new(
            config.crawl_end_time,
            Duration::from_millis(config.default_crawl_delay),
            Duration::from_millis(config.fetch_interval),
            config.max_urls_per_batch as usize,
        )
    }

    pub fn crawl_end_time(&self) -> Option<DateTime<Utc>> {
        self.crawl_end_time
    }

    /// Delay used for hosts whose robots.txt sets none
    pub fn default_crawl_delay(&self) -> Duration {
        self.default_crawl_delay
    }

    /// Checks whether `now` is past the crawl deadline
    pub fn is_past_end(&self, now: DateTime<Utc>) -> bool {
        self.crawl_end_time.is_some_and(|end| now > end)
    }

    /// How many URLs one host could still be sent before the deadline
    ///
    /// Unbounded without a deadline or a crawl delay; zero once the deadline
    /// has passed.
    pub fn max_urls(&self, crawl_delay: Duration) -> usize {
        let Some(end) = self.crawl_end_time else {
            return usize::MAX;
        };
        if crawl_delay.is_zero() {
            return usize::MAX;
        }

        let remaining = end - Utc::now();
        match remaining.to_std() {
            Ok(remaining) if !remaining.is_zero() => {
                1 + (remaining.as_millis() / crawl_delay.as_millis().max(1)) as usize
            }
            _ => 0,
        }
    }

    /// Sizes the next batch for a host
    ///
    /// The batch holds at most `max_urls` URLs, no more than fit in one fetch
    /// interval at `crawl_delay`, and no more than the per-connection limit.
    /// The host then rests for `num_urls * crawl_delay`.
    pub fn fetch_request(
        &self,
        now: Instant,
        crawl_delay: Duration,
        max_urls: usize,
    ) -> FetchRequest {
        let mut num_urls = max_urls;
        if !crawl_delay.is_zero() {
            let per_interval = (self.fetch_interval.as_millis() / crawl_delay.as_millis().max(1))
                .max(1) as usize;
            num_urls = num_urls.min(per_interval);
        }
        num_urls = num_urls.min(self.max_requests_per_connection);

        let fetch_delay = crawl_delay.saturating_mul(num_urls as u32);
        FetchRequest {
            num_urls,
            next_fetch_time: now + fetch_delay,
            fetch_delay,
        }
    }
}

impl Default for FetcherPolicy {
    fn default() -> Self {
        Self::from_config(&FetcherConfig::with_threads(1))
    }
}
