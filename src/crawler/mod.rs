//! Crawler module for polite page fetching
//!
//! This module contains the core fetching logic, including:
//! - HTTP fetching with size, MIME type and response rate limits
//! - Per-host queues and batch sizing
//! - The scheduler that serializes batches per host and spaces them out
//! - The manager loop that feeds batches to the scheduler

mod fetcher;
mod manager;
mod policy;
mod pool;
mod queue;
mod scheduler;
mod task;
mod types;

pub use fetcher::{build_http_client, user_agent_string, FetchLimits, Fetcher, HttpFetcher};
pub use manager::{SchedulerManager, DEFAULT_TERMINATION_TIMEOUT};
pub use policy::{FetchRequest, FetcherPolicy};
pub use pool::{PoolLoad, PoolRejected, WorkerPool, WorkerSlot};
pub use queue::{HostQueues, NextQueue, QueueProvider};
pub use scheduler::{ReleasedReferences, SchedulerHandle, SchedulerStatus, ShutdownReport};
pub use task::{FetchTask, OnFinished};
pub use types::{AbortReason, FetchError, FetchedPage, ScoredUrl, WorkBatch};

use crate::config::Config;
use crate::grouping::{
    FixedScoreGenerator, GroupingKey, GroupingKeyGenerator, HostReference, ScoreGenerator,
    SimpleGroupingKeyGenerator, SKIP_SCORE,
};
use crate::output::{emit, FetchCounters, SharedSink, StatusRecord};
use crate::SumiError;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Concurrent grouping key lookups while preparing a run
const KEY_LOOKUP_CONCURRENCY: usize = 8;

/// Everything a fetch run talks to
#[derive(Clone)]
pub struct FetchServices {
    pub key_generator: Arc<dyn GroupingKeyGenerator>,
    pub scorer: Arc<dyn ScoreGenerator>,
    pub fetcher: Arc<dyn Fetcher>,
    pub sink: SharedSink,
    pub counters: Arc<FetchCounters>,
}

impl FetchServices {
    /// Builds the default HTTP fetchers, key generator and scorer
    pub fn from_config(config: &Config, sink: SharedSink) -> Result<Self, SumiError> {
        let fetcher = HttpFetcher::from_config(config)?;
        let robots_fetcher = HttpFetcher::for_robots(config)?;
        let key_generator = SimpleGroupingKeyGenerator::new(
            Arc::new(robots_fetcher),
            config.user_agent.crawler_name.clone(),
            config.fetcher.use_pld,
        );

        Ok(Self {
            key_generator: Arc::new(key_generator),
            scorer: Arc::new(FixedScoreGenerator::default()),
            fetcher: Arc::new(fetcher),
            sink,
            counters: Arc::new(FetchCounters::new()),
        })
    }
}

/// Fetches a list of URLs politely
///
/// This is the main entry point for a fetch run. It will:
/// 1. Compute a grouping key and score for every URL
/// 2. Record URLs with a sentinel key or the skip score as skipped
/// 3. Queue the remaining URLs per host, best score first
/// 4. Run the scheduler until every queue is drained or `shutdown` fires
///
/// # Arguments
///
/// * `config` - The fetcher configuration
/// * `urls` - URLs to fetch, in input order
/// * `services` - Fetchers, key generator, scorer, sink and counters
/// * `shutdown` - Stops the run early once it turns true
///
/// # Returns
///
/// * `Ok(ShutdownReport)` - What had to be cut short at the end
/// * `Err(SumiError)` - The scheduler failed
pub async fn run_fetch(
    config: &Config,
    urls: Vec<String>,
    services: FetchServices,
    shutdown: watch::Receiver<bool>,
) -> Result<ShutdownReport, SumiError> {
    let FetchServices {
        key_generator,
        scorer,
        fetcher,
        sink,
        counters,
    } = services;

    let total = urls.len();
    tracing::info!("Computing grouping keys for {} URLs", total);

    let keyed: Vec<(String, GroupingKey, f32)> = stream::iter(urls)
        .map(|url| {
            let key_generator = Arc::clone(&key_generator);
            let scorer = Arc::clone(&scorer);
            async move {
                let key = key_generator.grouping_key(&url).await;
                let score = match key {
                    GroupingKey::Host(_) => scorer.score(&url, &key).await,
                    _ => SKIP_SCORE,
                };
                (url, key, score)
            }
        })
        .buffered(KEY_LOOKUP_CONCURRENCY)
        .collect()
        .await;

    let policy = FetcherPolicy::from_config(&config.fetcher);
    let mut queues = HostQueues::new(policy.clone());
    let mut skipped = 0;
    for (reference, urls) in group_by_reference(keyed, &sink, &counters, &mut skipped) {
        queues.offer(reference, urls);
    }
    queues.close();

    tracing::info!(
        "Queued {} URLs for {} hosts ({} skipped)",
        queues.remaining_urls(),
        queues.queue_count(),
        skipped
    );

    let pool = WorkerPool::new(
        config.fetcher.max_threads as usize,
        Duration::from_millis(config.fetcher.request_timeout),
    );
    let (handle, released) = SchedulerHandle::spawn(
        pool,
        policy,
        fetcher,
        Arc::clone(&sink),
        Arc::clone(&counters),
    );

    let result = SchedulerManager::new(handle, released, queues, counters, shutdown)
        .stop_when_done(true)
        .run()
        .await;

    if let Err(e) = sink.lock().unwrap_or_else(|e| e.into_inner()).flush() {
        tracing::error!("Failed to flush output: {}", e);
    }

    Ok(result?)
}

/// Splits keyed URLs into per-host groups
///
/// URLs that will not be fetched are written to the sink right away. Each
/// group's reference carries the group size, and its URLs are ordered by
/// descending score.
fn group_by_reference(
    keyed: Vec<(String, GroupingKey, f32)>,
    sink: &SharedSink,
    counters: &FetchCounters,
    skipped: &mut usize,
) -> Vec<(HostReference, Vec<ScoredUrl>)> {
    let mut groups: Vec<(HostReference, Vec<ScoredUrl>)> = Vec::new();
    let mut index: HashMap<HostReference, usize> = HashMap::new();

    for (url, key, score) in keyed {
        let key = if score == SKIP_SCORE && !key.is_special() {
            GroupingKey::Skipped
        } else {
            key
        };

        let reference = match key {
            GroupingKey::Host(reference) => reference,
            special => {
                if let Some(status) = special.skip_status() {
                    tracing::trace!("Skipping {} ({})", url, special);
                    counters.record(status);
                    emit(sink, StatusRecord::skipped(url, status), None);
                    *skipped += 1;
                }
                continue;
            }
        };

        let slot = *index.entry(reference.clone()).or_insert_with(|| {
            groups.push((reference, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(ScoredUrl::new(url, score));
    }

    groups
        .into_iter()
        .map(|(reference, mut urls)| {
            urls.sort_by(|a, b| b.score.total_cmp(&a.score));
            (reference.with_count(urls.len() as u32), urls)
        })
        .collect()
}
