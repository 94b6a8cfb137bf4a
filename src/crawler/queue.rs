//! Host queues
//!
//! Holds the URLs waiting to be fetched, one FIFO queue per host reference,
//! and cuts them into batches sized by the [`FetcherPolicy`].

use crate::crawler::policy::FetcherPolicy;
use crate::crawler::types::{ScoredUrl, WorkBatch};
use crate::grouping::HostReference;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// The queue that will become ready next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextQueue {
    pub reference: HostReference,
    pub urls: usize,
    pub ready_in: Duration,
}

/// Source of batches for the scheduler manager
pub trait QueueProvider: Send {
    /// Takes the next batch that may start at `now`
    fn poll(&mut self, now: Instant) -> Option<WorkBatch>;

    /// Marks the batch handed out for `reference` as done
    fn release(&mut self, reference: &HostReference);

    /// No queued URLs and no batch handed out but not yet released
    fn is_empty(&self) -> bool;

    /// URLs still queued
    fn remaining_urls(&self) -> usize;

    /// The queue that becomes ready soonest, ignoring queues with a batch out
    fn next_queue(&self, now: Instant) -> Option<NextQueue>;

    /// Logs the `max` largest queues
    fn log_pending_queues(&self, max: usize);
}

#[derive(Debug)]
struct HostQueue {
    urls: VecDeque<ScoredUrl>,
    next_fetch: Instant,
    in_flight: bool,
    arrival: u64,
}

impl HostQueue {
    fn is_ready(&self, now: Instant) -> bool {
        !self.in_flight && !self.urls.is_empty() && self.next_fetch <= now
    }
}

/// In-memory [`QueueProvider`]
///
/// `poll` picks the ready queue with the most URLs, breaking ties by arrival
/// order. A queue is not ready while a batch from it is out, or before the
/// rest period that batch earned has passed.
#[derive(Debug)]
pub struct HostQueues {
    queues: HashMap<HostReference, HostQueue>,
    policy: FetcherPolicy,
    closed: bool,
    next_arrival: u64,
}

impl HostQueues {
    pub fn new(policy: FetcherPolicy) -> Self {
        Self {
            queues: HashMap::new(),
            policy,
            closed: false,
            next_arrival: 0,
        }
    }

    /// Appends URLs to the queue for `reference`, in the order given
    pub fn offer(&mut self, reference: HostReference, urls: impl IntoIterator<Item = ScoredUrl>) {
        let arrival = self.next_arrival;
        let queue = self.queues.entry(reference).or_insert_with(|| HostQueue {
            urls: VecDeque::new(),
            next_fetch: Instant::now(),
            in_flight: false,
            arrival,
        });
        if queue.arrival == arrival {
            self.next_arrival += 1;
        }
        queue.urls.extend(urls);
    }

    /// No more URLs will be offered
    ///
    /// The final batch of each queue is then flagged as the last one.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Number of host queues, including empty ones with a batch out
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }
}

impl QueueProvider for HostQueues {
    fn poll(&mut self, now: Instant) -> Option<WorkBatch> {
        let reference = self
            .queues
            .iter()
            .filter(|(_, q)| q.is_ready(now))
            .max_by(|(_, a), (_, b)| {
                a.urls
                    .len()
                    .cmp(&b.urls.len())
                    .then_with(|| b.arrival.cmp(&a.arrival))
            })
            .map(|(reference, _)| reference.clone())?;

        let delay = reference.crawl_delay_or(self.policy.default_crawl_delay());
        let policy = &self.policy;
        let closed = self.closed;
        let queue = self.queues.get_mut(&reference)?;

        let max_urls = policy.max_urls(delay).min(queue.urls.len());
        let (urls, fetch_delay) = if max_urls == 0 {
            // Past the deadline; hand everything over so it is recorded as skipped
            (queue.urls.drain(..).collect::<Vec<_>>(), Duration::ZERO)
        } else {
            let request = policy.fetch_request(now, delay, max_urls);
            queue.next_fetch = request.next_fetch_time;
            (
                queue.urls.drain(..request.num_urls).collect(),
                request.fetch_delay,
            )
        };
        queue.in_flight = true;

        let is_last = closed && queue.urls.is_empty();
        debug!(
            "Polled {} URLs from {} ({} left{})",
            urls.len(),
            reference,
            queue.urls.len(),
            if is_last { ", last batch" } else { "" }
        );

        Some(WorkBatch {
            reference,
            urls,
            fetch_delay,
            is_last,
        })
    }

    fn release(&mut self, reference: &HostReference) {
        let Some(queue) = self.queues.get_mut(reference) else {
            return;
        };
        queue.in_flight = false;
        if self.closed && queue.urls.is_empty() {
            self.queues.remove(reference);
        }
    }

    fn is_empty(&self) -> bool {
        self.queues
            .values()
            .all(|q| q.urls.is_empty() && !q.in_flight)
    }

    fn remaining_urls(&self) -> usize {
        self.queues.values().map(|q| q.urls.len()).sum()
    }

    fn next_queue(&self, now: Instant) -> Option<NextQueue> {
        self.queues
            .iter()
            .filter(|(_, q)| !q.in_flight && !q.urls.is_empty())
            .min_by_key(|(_, q)| (q.next_fetch, q.arrival))
            .map(|(reference, q)| NextQueue {
                reference: reference.clone(),
                urls: q.urls.len(),
                ready_in: q.next_fetch.saturating_duration_since(now),
            })
    }

    fn log_pending_queues(&self, max: usize) {
        let now = Instant::now();
        let mut queues: Vec<_> = self
            .queues
            .iter()
            .filter(|(_, q)| !q.urls.is_empty())
            .collect();
        queues.sort_by(|(_, a), (_, b)| b.urls.len().cmp(&a.urls.len()));

        info!("{} host queues with pending URLs", queues.len());
        for (reference, queue) in queues.into_iter().take(max) {
            info!(
                "  {}: {} URLs, ready in {}s{}",
                reference,
                queue.urls.len(),
                queue.next_fetch.saturating_duration_since(now).as_secs(),
                if queue.in_flight { " (fetching)" } else { "" }
            );
        }
    }
}
