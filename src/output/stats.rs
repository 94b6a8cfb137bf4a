//! Fetch run counters
//!
//! Counters are updated by the fetch workers and the scheduler, and read by
//! the manager for its status line and by the CLI for the final summary.

use crate::state::UrlStatus;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one fetch run
#[derive(Debug, Default)]
pub struct FetchCounters {
    urls_fetching: AtomicU64,
    domains_processing: AtomicU64,
    urls_fetched: AtomicU64,
    urls_failed: AtomicU64,
    urls_skipped: AtomicU64,
    urls_lost: AtomicU64,
    bytes_fetched: AtomicU64,
    fetch_millis: AtomicU64,
}

/// Point-in-time copy of [`FetchCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// URLs in batches currently on a worker
    pub urls_fetching: u64,

    /// Host references currently on a worker
    pub domains_processing: u64,

    pub urls_fetched: u64,
    pub urls_failed: u64,
    pub urls_skipped: u64,

    /// URLs dropped because their batch was interrupted
    pub urls_lost: u64,

    pub bytes_fetched: u64,
    pub fetch_millis: u64,
}

impl CounterSnapshot {
    /// Total URLs with a final status
    pub fn urls_done(&self) -> u64 {
        self.urls_fetched + self.urls_failed + self.urls_skipped
    }
}

impl FetchCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch of `urls` URLs started on a worker
    pub fn batch_started(&self, urls: usize) {
        self.urls_fetching.fetch_add(urls as u64, Ordering::Relaxed);
        self.domains_processing.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch finished; `unprocessed` URLs were never attempted
    pub fn batch_finished(&self, urls: usize, unprocessed: usize) {
        self.urls_fetching.fetch_sub(urls as u64, Ordering::Relaxed);
        self.domains_processing.fetch_sub(1, Ordering::Relaxed);
        self.add_lost(unprocessed);
    }

    /// Counts URLs dropped without being attempted
    pub fn add_lost(&self, urls: usize) {
        self.urls_lost.fetch_add(urls as u64, Ordering::Relaxed);
    }

    /// Counts one URL under its final status
    pub fn record(&self, status: UrlStatus) {
        let counter = if status.is_success() {
            &self.urls_fetched
        } else if status.is_skipped() {
            &self.urls_skipped
        } else {
            &self.urls_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts `n` URLs under the same status
    pub fn record_many(&self, status: UrlStatus, n: usize) {
        for _ in 0..n {
            self.record(status);
        }
    }

    /// Adds the size and duration of a fetched page
    pub fn add_fetched_bytes(&self, bytes: usize, millis: u64) {
        self.bytes_fetched.fetch_add(bytes as u64, Ordering::Relaxed);
        self.fetch_millis.fetch_add(millis, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            urls_fetching: self.urls_fetching.load(Ordering::Relaxed),
            domains_processing: self.domains_processing.load(Ordering::Relaxed),
            urls_fetched: self.urls_fetched.load(Ordering::Relaxed),
            urls_failed: self.urls_failed.load(Ordering::Relaxed),
            urls_skipped: self.urls_skipped.load(Ordering::Relaxed),
            urls_lost: self.urls_lost.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            fetch_millis: self.fetch_millis.load(Ordering::Relaxed),
        }
    }
}

/// Prints a fetch summary to stdout
///
/// # Arguments
///
/// * `stats` - Counters at the end of the run
pub fn print_statistics(stats: &CounterSnapshot) {
    println!("=== Fetch Statistics ===\n");

    let total = stats.urls_done();
    println!("Overview:");
    println!("  URLs processed: {}", total);
    println!("  Fetched: {}", stats.urls_fetched);
    println!("  Failed: {}", stats.urls_failed);
    println!("  Skipped: {}", stats.urls_skipped);
    if stats.urls_lost > 0 {
        println!("  Interrupted: {}", stats.urls_lost);
    }
    println!();

    println!("Transfer:");
    println!("  Bytes fetched: {}", stats.bytes_fetched);
    if stats.fetch_millis > 0 {
        println!(
            "  Average rate: {:.1} KB/s",
            (stats.bytes_fetched as f64 / 1024.0) / (stats.fetch_millis as f64 / 1000.0)
        );
    }
    println!();

    let success_rate = if total > 0 {
        (stats.urls_fetched as f64 / total as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Success Rate: {:.1}% ({} / {} URLs fetched)",
        success_rate, stats.urls_fetched, total
    );
}
