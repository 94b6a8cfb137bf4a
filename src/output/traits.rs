//! Output sink trait and the records written to it

use crate::crawler::{FetchError, FetchedPage};
use crate::state::UrlStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while writing fetch output
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Final status of one URL
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    /// The URL as it was submitted
    pub url: String,

    /// What happened to it
    pub status: UrlStatus,

    /// HTTP status code, when a response was received
    pub status_code: Option<u16>,

    /// Error message for failed fetches
    pub detail: Option<String>,

    /// Body size for fetched pages
    pub byte_count: Option<usize>,

    /// Fetch duration for fetched pages
    pub elapsed: Option<Duration>,
}

impl StatusRecord {
    /// Record for a URL that never reached the fetcher
    pub fn skipped(url: impl Into<String>, status: UrlStatus) -> Self {
        Self {
            url: url.into(),
            status,
            status_code: None,
            detail: None,
            byte_count: None,
            elapsed: None,
        }
    }

    /// Record for a fetched page
    pub fn fetched(page: &FetchedPage) -> Self {
        Self {
            url: page.base_url.clone(),
            status: UrlStatus::Fetched,
            status_code: Some(page.status_code),
            detail: None,
            byte_count: Some(page.byte_count()),
            elapsed: Some(page.elapsed),
        }
    }

    /// Record for a failed fetch
    pub fn failed(url: impl Into<String>, error: &FetchError) -> Self {
        let status_code = match error {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        };
        Self {
            url: url.into(),
            status: UrlStatus::from_fetch_error(error),
            status_code,
            detail: Some(error.to_string()),
            byte_count: None,
            elapsed: None,
        }
    }
}

/// Destination for fetch results
///
/// Every URL gets exactly one status record. Fetched pages are also passed
/// to [`OutputSink::write_content`].
pub trait OutputSink: Send {
    /// Records the final status of one URL
    fn write_status(&mut self, record: &StatusRecord) -> OutputResult<()>;

    /// Records the content of a fetched page
    fn write_content(&mut self, _page: &FetchedPage) -> OutputResult<()> {
        Ok(())
    }

    /// Flushes buffered output
    fn flush(&mut self) -> OutputResult<()> {
        Ok(())
    }
}

/// Sink shared by all fetch workers; each write holds the lock
pub type SharedSink = Arc<Mutex<dyn OutputSink>>;

/// Wraps a sink for sharing between workers
pub fn shared<S: OutputSink + 'static>(sink: S) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Writes a status record (and content, for fetched pages)
///
/// Output failures are logged rather than returned, so one bad write never
/// stops a batch.
pub fn emit(sink: &SharedSink, record: StatusRecord, page: Option<&FetchedPage>) {
    let mut guard = sink.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(page) = page {
        if let Err(e) = guard.write_content(page) {
            tracing::error!("Failed to write content for {}: {}", page.base_url, e);
        }
    }
    if let Err(e) = guard.write_status(&record) {
        tracing::error!("Failed to write status for {}: {}", record.url, e);
    }
}
