//! Politeness scheduler
//!
//! The scheduler runs as its own task and owns the table of active and
//! pending host references. Batches, completions, status requests and
//! shutdown all arrive as messages, so every state transition happens inside
//! one handler.
//!
//! Admission of a batch:
//!
//! | Condition | Action |
//! |-----------|--------|
//! | Past the crawl end time | Every URL skipped (time limit) |
//! | Reference has a batch running | Every URL skipped (deferred) |
//! | Reference pending until a later time | Batch parked until then, then re-admitted |
//! | No worker free within the acquire timeout | Every URL skipped (deferred) |
//! | Otherwise | Batch runs on a worker |

use crate::crawler::fetcher::Fetcher;
use crate::crawler::policy::FetcherPolicy;
use crate::crawler::pool::{PoolLoad, WorkerPool};
use crate::crawler::task::{FetchTask, OnFinished};
use crate::crawler::types::WorkBatch;
use crate::grouping::HostReference;
use crate::output::{emit, FetchCounters, SharedSink, StatusRecord};
use crate::state::{RefState, RefTable, UrlStatus};
use crate::{SchedulerError, SchedulerResult};
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Notifications of references whose submitted batch has been disposed of
pub type ReleasedReferences = mpsc::UnboundedReceiver<HostReference>;

/// Snapshot of the scheduler's state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub active_references: usize,
    pub pending_references: usize,
    pub parked_batches: usize,
    pub parked_urls: usize,
    pub busy_workers: usize,
}

/// What shutdown had to cut short
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Running batches aborted after the drain timeout
    pub aborted_batches: usize,

    /// Parked batches dropped before they could start
    pub dropped_batches: usize,
}

enum Command {
    Submit {
        batch: WorkBatch,
        admitted: oneshot::Sender<()>,
    },
    Finished {
        reference: HostReference,
        completed_at: Instant,
    },
    Status(oneshot::Sender<SchedulerStatus>),
    Shutdown {
        timeout: Duration,
        reply: oneshot::Sender<ShutdownReport>,
    },
}

/// A batch waiting for its reference's next fetch time
struct Parked {
    wake_at: Instant,
    seq: u64,
    batch: WorkBatch,
}

// BinaryHeap is a max-heap; the earliest wake time (then earliest arrival)
// must come out first
impl Ord for Parked {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wake_at
            .cmp(&self.wake_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Parked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Parked {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.seq == other.seq
    }
}

impl Eq for Parked {}

/// Client side of a running scheduler
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    load: PoolLoad,
    task: JoinHandle<SchedulerResult<()>>,
}

impl SchedulerHandle {
    /// Starts the scheduler task
    ///
    /// # Arguments
    ///
    /// * `pool` - Workers the batches run on
    /// * `policy` - Crawl end time and default crawl delay
    /// * `fetcher` - Fetches individual URLs
    /// * `sink` - Receives one status record per URL
    /// * `counters` - Run counters
    ///
    /// # Returns
    ///
    /// The handle, and a receiver that yields each batch's reference once the
    /// batch has finished or been skipped
    pub fn spawn(
        pool: WorkerPool,
        policy: FetcherPolicy,
        fetcher: Arc<dyn Fetcher>,
        sink: SharedSink,
        counters: Arc<FetchCounters>,
    ) -> (Self, ReleasedReferences) {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (released_tx, released_rx) = mpsc::unbounded_channel();
        let load = pool.load();

        let scheduler = Scheduler {
            inbox,
            outbox: commands.downgrade(),
            table: RefTable::new(),
            parked: BinaryHeap::new(),
            next_seq: 0,
            pool,
            policy,
            fetcher,
            sink,
            counters,
            released: released_tx,
        };
        let task = tokio::spawn(scheduler.run());

        (
            Self {
                commands,
                load,
                task,
            },
            released_rx,
        )
    }

    /// Hands a batch to the scheduler
    ///
    /// Resolves once the batch has been dispatched to a worker, parked or
    /// skipped, so a worker taken by the batch already shows as busy.
    pub async fn submit(&self, batch: WorkBatch) -> SchedulerResult<()> {
        let (admitted, response) = oneshot::channel();
        self.send(Command::Submit { batch, admitted })?;
        response.await.map_err(|_| SchedulerError::Closed)
    }

    pub async fn status(&self) -> SchedulerResult<SchedulerStatus> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Status(reply))?;
        response.await.map_err(|_| SchedulerError::Closed)
    }

    /// Number of workers running a batch
    pub fn busy_workers(&self) -> usize {
        self.load.busy()
    }

    pub fn has_idle_worker(&self) -> bool {
        self.load.has_idle_worker()
    }

    /// Stops the scheduler
    ///
    /// Running batches get `timeout` to finish before they are aborted.
    /// Returns the error that stopped the scheduler, if it stopped on its own.
    pub async fn shutdown(self, timeout: Duration) -> SchedulerResult<ShutdownReport> {
        let (reply, response) = oneshot::channel();
        let report = match self.commands.send(Command::Shutdown { timeout, reply }) {
            Ok(()) => response.await.unwrap_or_default(),
            Err(_) => ShutdownReport::default(),
        };

        match self.task.await {
            Ok(result) => result.map(|_| report),
            Err(e) => {
                error!("Scheduler task failed: {}", e);
                Err(SchedulerError::Closed)
            }
        }
    }

    fn send(&self, command: Command) -> SchedulerResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SchedulerError::Closed)
    }
}

struct Scheduler {
    inbox: mpsc::UnboundedReceiver<Command>,
    outbox: mpsc::WeakUnboundedSender<Command>,
    table: RefTable,
    parked: BinaryHeap<Parked>,
    next_seq: u64,
    pool: WorkerPool,
    policy: FetcherPolicy,
    fetcher: Arc<dyn Fetcher>,
    sink: SharedSink,
    counters: Arc<FetchCounters>,
    released: mpsc::UnboundedSender<HostReference>,
}

impl Scheduler {
    async fn run(mut self) -> SchedulerResult<()> {
        loop {
            let wake_at = self.parked.peek().map(|p| p.wake_at);
            let timer = sleep_until(
                wake_at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)),
            );

            tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(Command::Submit { batch, admitted }) => {
                        self.admit(batch).await;
                        let _ = admitted.send(());
                    }
                    Some(Command::Finished { reference, completed_at }) => {
                        if let Err(e) = self.finish(reference, completed_at) {
                            error!("Scheduler stopped: {}", e);
                            self.drop_parked();
                            return Err(e);
                        }
                    }
                    Some(Command::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    Some(Command::Shutdown { timeout, reply }) => {
                        let report = self.shutdown(timeout).await;
                        let _ = reply.send(report);
                        return Ok(());
                    }
                    None => {
                        self.shutdown(Duration::ZERO).await;
                        return Ok(());
                    }
                },
                _ = timer, if wake_at.is_some() => self.wake_parked().await,
                _ = self.pool.join_next(), if !self.pool.is_empty() => {}
            }
        }
    }

    async fn admit(&mut self, batch: WorkBatch) {
        if batch.is_empty() {
            self.release(batch.reference);
            return;
        }

        if self.policy.is_past_end(Utc::now()) {
            debug!("Crawl end time passed, skipping {} URLs for {}", batch.len(), batch.reference);
            self.skip(batch, UrlStatus::SkippedTimeLimit);
            return;
        }

        let now = Instant::now();
        match self.table.state(&batch.reference) {
            RefState::Active => {
                debug!("{} already has a batch running", batch.reference);
                self.skip(batch, UrlStatus::SkippedDeferred);
                return;
            }
            RefState::Pending(at) if at > now => {
                debug!(
                    "Parking {} URLs for {} for {:?}",
                    batch.len(),
                    batch.reference,
                    at - now
                );
                self.park(at, batch);
                return;
            }
            RefState::Pending(_) | RefState::Absent => {}
        }

        let slot = match self.pool.reserve().await {
            Ok(slot) => slot,
            Err(rejected) => {
                warn!("{}, deferring {} URLs for {}", rejected, batch.len(), batch.reference);
                self.skip(batch, UrlStatus::SkippedDeferred);
                return;
            }
        };

        let next_fetch = (!batch.is_last).then(|| Instant::now() + batch.fetch_delay);
        let gap = batch
            .reference
            .crawl_delay_or(self.policy.default_crawl_delay());
        if let Err(e) = self.table.make_active(&batch.reference, next_fetch, gap) {
            // State was checked above and nothing ran in between
            error!("{}", e);
            self.skip(batch, UrlStatus::SkippedDeferred);
            return;
        }

        debug!("Dispatching {} URLs for {}", batch.len(), batch.reference);
        self.counters.batch_started(batch.len());
        let task = FetchTask::new(
            batch,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.sink),
            Arc::clone(&self.counters),
            self.completion(),
        );
        self.pool.run(slot, task.run());
    }

    fn completion(&self) -> OnFinished {
        let outbox = self.outbox.clone();
        Box::new(move |reference: &HostReference| {
            if let Some(outbox) = outbox.upgrade() {
                let _ = outbox.send(Command::Finished {
                    reference: reference.clone(),
                    completed_at: Instant::now(),
                });
            }
        })
    }

    fn finish(&mut self, reference: HostReference, completed_at: Instant) -> SchedulerResult<()> {
        match self.table.finish(&reference, completed_at)? {
            Some(next) => debug!(
                "{} finished, next batch no sooner than {:?} from now",
                reference,
                next.saturating_duration_since(Instant::now())
            ),
            None => debug!("{} finished its last batch", reference),
        }
        self.release(reference);
        Ok(())
    }

    fn park(&mut self, wake_at: Instant, batch: WorkBatch) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.parked.push(Parked {
            wake_at,
            seq,
            batch,
        });
    }

    async fn wake_parked(&mut self) {
        let now = Instant::now();
        self.table.prune_expired(now);

        let mut ready = Vec::new();
        while self.parked.peek().is_some_and(|p| p.wake_at <= now) {
            if let Some(parked) = self.parked.pop() {
                ready.push(parked.batch);
            }
        }
        for batch in ready {
            self.admit(batch).await;
        }
    }

    /// Writes a skip status for every URL of a batch that will not run
    fn skip(&mut self, batch: WorkBatch, status: UrlStatus) {
        for url in &batch.urls {
            emit(&self.sink, StatusRecord::skipped(url.url.as_str(), status), None);
        }
        self.counters.record_many(status, batch.len());
        self.release(batch.reference);
    }

    fn release(&self, reference: HostReference) {
        // Nobody listening is fine; the provider may already be gone
        let _ = self.released.send(reference);
    }

    fn drop_parked(&mut self) -> usize {
        let parked = std::mem::take(&mut self.parked);
        let dropped = parked.len();
        for Parked { batch, .. } in parked.into_vec() {
            self.counters.add_lost(batch.len());
            self.skip(batch, UrlStatus::SkippedInterrupted);
        }
        dropped
    }

    async fn shutdown(&mut self, timeout: Duration) -> ShutdownReport {
        let dropped_batches = self.drop_parked();
        if dropped_batches > 0 {
            info!("Dropped {} parked batches at shutdown", dropped_batches);
        }
        let aborted_batches = self.pool.drain(timeout).await;
        ShutdownReport {
            aborted_batches,
            dropped_batches,
        }
    }

    fn status(&mut self) -> SchedulerStatus {
        self.table.prune_expired(Instant::now());
        SchedulerStatus {
            active_references: self.table.active_count(),
            pending_references: self.table.pending_count(),
            parked_batches: self.parked.len(),
            parked_urls: self.parked.iter().map(|p| p.batch.len()).sum(),
            busy_workers: self.pool.busy(),
        }
    }
}
