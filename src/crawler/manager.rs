//! Scheduler manager: the loop that feeds batches to the scheduler

use crate::crawler::queue::QueueProvider;
use crate::crawler::scheduler::{ReleasedReferences, SchedulerHandle, ShutdownReport};
use crate::output::FetchCounters;
use crate::{SchedulerError, SchedulerResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Sleep between polls when nothing is ready
const NO_URLS_SLEEP_TIME: Duration = Duration::from_millis(100);

const STATUS_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

const QUEUE_LOG_INTERVAL: Duration = Duration::from_secs(5 * 60);
const NUM_QUEUES_TO_LOG: usize = 100;

/// How long running batches get to finish once the manager stops
pub const DEFAULT_TERMINATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Drives a [`QueueProvider`] into a running scheduler
pub struct SchedulerManager<P: QueueProvider> {
    handle: SchedulerHandle,
    released: ReleasedReferences,
    provider: P,
    counters: Arc<FetchCounters>,
    shutdown: watch::Receiver<bool>,
    stop_when_done: bool,
    termination_timeout: Duration,
}

impl<P: QueueProvider> SchedulerManager<P> {
    /// Creates a manager that runs until `shutdown` turns true
    pub fn new(
        handle: SchedulerHandle,
        released: ReleasedReferences,
        provider: P,
        counters: Arc<FetchCounters>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handle,
            released,
            provider,
            counters,
            shutdown,
            stop_when_done: false,
            termination_timeout: DEFAULT_TERMINATION_TIMEOUT,
        }
    }

    /// Also stop once [`is_done`](Self::is_done) holds
    ///
    /// Only useful when the provider is closed; an open provider may still
    /// receive URLs after going empty.
    pub fn stop_when_done(mut self, stop: bool) -> Self {
        self.stop_when_done = stop;
        self
    }

    pub fn termination_timeout(mut self, timeout: Duration) -> Self {
        self.termination_timeout = timeout;
        self
    }

    /// No batch running or parked, and nothing left in the provider
    pub async fn is_done(&self) -> SchedulerResult<bool> {
        if !self.provider.is_empty() || self.handle.busy_workers() > 0 {
            return Ok(false);
        }
        let status = self.handle.status().await?;
        Ok(status.busy_workers == 0 && status.parked_batches == 0)
    }

    /// Runs until shut down, then drains the scheduler
    ///
    /// # Returns
    ///
    /// What had to be cut short during the drain, or the error that stopped
    /// the scheduler
    pub async fn run(mut self) -> SchedulerResult<ShutdownReport> {
        let mut next_status_time = Instant::now();
        let mut next_queue_log_time = Instant::now();
        let mut last_in_flight = None;

        loop {
            self.apply_releases();

            if *self.shutdown.borrow() {
                match self.is_done().await {
                    Ok(true) => info!("Fetch manager stopping"),
                    Ok(false) => warn!("Stopping fetch manager while URLs remain"),
                    Err(_) => {}
                }
                break;
            }

            if self.stop_when_done {
                match self.is_done().await {
                    Ok(true) => {
                        info!("All batches processed");
                        break;
                    }
                    Ok(false) => {}
                    Err(_) => break,
                }
            }

            let now = Instant::now();
            let snapshot = self.counters.snapshot();
            let in_flight = (snapshot.urls_fetching, snapshot.domains_processing);
            if last_in_flight != Some(in_flight) || now >= next_status_time {
                last_in_flight = Some(in_flight);
                info!("{}", self.status_line(in_flight, now));
                next_status_time = now + STATUS_UPDATE_INTERVAL;
            }

            if now >= next_queue_log_time {
                self.provider.log_pending_queues(NUM_QUEUES_TO_LOG);
                next_queue_log_time = now + QUEUE_LOG_INTERVAL;
            }

            let batch = if self.handle.has_idle_worker() {
                self.provider.poll(now)
            } else {
                None
            };

            match batch {
                Some(batch) => {
                    trace!(
                        "Submitting {} URLs for {}",
                        batch.len(),
                        batch.reference
                    );
                    let reference = batch.reference.clone();
                    if let Err(SchedulerError::Closed) = self.handle.submit(batch).await {
                        self.provider.release(&reference);
                        break;
                    }
                }
                None => {
                    trace!("Nothing to fetch, sleeping");
                    tokio::select! {
                        _ = tokio::time::sleep(NO_URLS_SLEEP_TIME) => {}
                        Ok(()) = self.shutdown.changed() => {}
                    }
                }
            }
        }

        debug!("Draining scheduler");
        let report = self.handle.shutdown(self.termination_timeout).await?;
        if report.aborted_batches > 0 {
            warn!("Had to do a hard termination of {} batches", report.aborted_batches);
        }
        Ok(report)
    }

    fn apply_releases(&mut self) {
        while let Ok(reference) = self.released.try_recv() {
            trace!("Released {}", reference);
            self.provider.release(&reference);
        }
    }

    fn status_line(&self, (urls_fetching, domains): (u64, u64), now: Instant) -> String {
        let remaining = self.provider.remaining_urls();
        if urls_fetching > 0 {
            return format!(
                "Fetching {} URLs from {} domains ({} URLs remaining)",
                urls_fetching, domains, remaining
            );
        }

        match self.provider.next_queue(now) {
            Some(next) => format!(
                "Nothing to fetch ({} URLs remaining, next host is {} with {} URLs in {} seconds)",
                remaining,
                next.reference.host(),
                next.urls,
                next.ready_in.as_secs()
            ),
            None => "Nothing to fetch (0 URLs remaining)".to_string(),
        }
    }
}
