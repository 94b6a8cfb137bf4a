//! Fetch task: the unit of work run by one pool worker
//!
//! A task fetches the URLs of one batch in order, writes a status record for
//! each, and always reports completion, even when it is aborted mid-batch.

use crate::crawler::fetcher::Fetcher;
use crate::crawler::types::{FetchError, FetchedPage, ScoredUrl, WorkBatch};
use crate::grouping::HostReference;
use crate::output::{emit, FetchCounters, SharedSink, StatusRecord};
use crate::state::UrlStatus;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, trace};

/// Called exactly once when a task is done with its batch
pub type OnFinished = Box<dyn FnOnce(&HostReference) + Send>;

/// Fetches every URL of one batch
pub struct FetchTask {
    batch: WorkBatch,
    fetcher: Arc<dyn Fetcher>,
    sink: SharedSink,
    counters: Arc<FetchCounters>,
    on_finished: OnFinished,
}

impl FetchTask {
    pub fn new(
        batch: WorkBatch,
        fetcher: Arc<dyn Fetcher>,
        sink: SharedSink,
        counters: Arc<FetchCounters>,
        on_finished: OnFinished,
    ) -> Self {
        Self {
            batch,
            fetcher,
            sink,
            counters,
            on_finished,
        }
    }

    pub fn reference(&self) -> &HostReference {
        &self.batch.reference
    }

    /// Runs the batch to completion
    ///
    /// Dropping the returned future part way through reports every URL not
    /// yet attempted as interrupted.
    pub async fn run(self) {
        let FetchTask {
            batch,
            fetcher,
            sink,
            counters,
            on_finished,
        } = self;

        debug!(
            "Fetching {} URLs from {}",
            batch.urls.len(),
            batch.reference
        );
        let mut guard = FinishGuard {
            reference: batch.reference,
            urls: batch.urls,
            attempted: 0,
            sink,
            counters,
            on_finished: Some(on_finished),
        };

        while let Some(url) = guard.next_url() {
            trace!("Fetching {}", url.url);
            let result = AssertUnwindSafe(fetcher.fetch(&url))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(FetchError::Io {
                        url: url.url.clone(),
                        message: format!("fetch panicked: {}", panic_message(&*panic)),
                    })
                });
            guard.record(&url, result);
        }
    }
}

/// Reports per-URL results and completion for one batch
struct FinishGuard {
    reference: HostReference,
    urls: Vec<ScoredUrl>,
    attempted: usize,
    sink: SharedSink,
    counters: Arc<FetchCounters>,
    on_finished: Option<OnFinished>,
}

impl FinishGuard {
    fn next_url(&self) -> Option<ScoredUrl> {
        self.urls.get(self.attempted).cloned()
    }

    fn record(&mut self, url: &ScoredUrl, result: Result<FetchedPage, FetchError>) {
        self.attempted += 1;
        match result {
            Ok(page) => {
                trace!("Fetched {} ({} bytes)", url.url, page.byte_count());
                self.counters.record(UrlStatus::Fetched);
                self.counters
                    .add_fetched_bytes(page.byte_count(), page.elapsed.as_millis() as u64);
                emit(&self.sink, StatusRecord::fetched(&page), Some(&page));
            }
            Err(e) => {
                trace!("Failed to fetch {}: {}", url.url, e);
                self.counters.record(UrlStatus::from_fetch_error(&e));
                emit(&self.sink, StatusRecord::failed(url.url.as_str(), &e), None);
            }
        }
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        let unattempted = self.urls.len() - self.attempted;
        if unattempted > 0 {
            debug!(
                "Batch for {} interrupted with {} URLs left",
                self.reference, unattempted
            );
            for url in &self.urls[self.attempted..] {
                emit(
                    &self.sink,
                    StatusRecord::skipped(url.url.as_str(), UrlStatus::SkippedInterrupted),
                    None,
                );
            }
            self.counters
                .record_many(UrlStatus::SkippedInterrupted, unattempted);
        }
        self.counters.batch_finished(self.urls.len(), unattempted);

        if let Some(on_finished) = self.on_finished.take() {
            on_finished(&self.reference);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
