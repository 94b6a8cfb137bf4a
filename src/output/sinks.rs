//! Output sink implementations

use crate::crawler::FetchedPage;
use crate::output::{OutputResult, OutputSink, StatusRecord};
use crate::state::UrlStatus;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MemoryRecords {
    statuses: Vec<StatusRecord>,
    pages: Vec<FetchedPage>,
}

/// Collects output in memory
///
/// Clones share the same storage, so a clone kept by the caller can read what
/// the fetch workers wrote.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryRecords>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All status records written so far, in write order
    pub fn statuses(&self) -> Vec<StatusRecord> {
        self.lock().statuses.clone()
    }

    /// All fetched pages written so far, in write order
    pub fn pages(&self) -> Vec<FetchedPage> {
        self.lock().pages.clone()
    }

    /// Status recorded for `url`, if any
    pub fn status_of(&self, url: &str) -> Option<UrlStatus> {
        self.lock()
            .statuses
            .iter()
            .find(|r| r.url == url)
            .map(|r| r.status)
    }

    /// Number of records per status
    pub fn status_counts(&self) -> HashMap<UrlStatus, usize> {
        let mut counts = HashMap::new();
        for record in &self.lock().statuses {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        counts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryRecords> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OutputSink for MemorySink {
    fn write_status(&mut self, record: &StatusRecord) -> OutputResult<()> {
        self.lock().statuses.push(record.clone());
        Ok(())
    }

    fn write_content(&mut self, page: &FetchedPage) -> OutputResult<()> {
        self.lock().pages.push(page.clone());
        Ok(())
    }
}

/// Writes one tab-separated line per status record
///
/// Columns: url, status, HTTP code, byte count, elapsed milliseconds, detail.
/// Missing values are written as `-`.
pub struct StatusLineSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> StatusLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

impl<W: Write + Send> OutputSink for StatusLineSink<W> {
    fn write_status(&mut self, record: &StatusRecord) -> OutputResult<()> {
        let detail = record
            .detail
            .as_deref()
            .map(|d| d.replace(['\t', '\n', '\r'], " "));
        writeln!(
            self.writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            record.url,
            record.status,
            or_dash(record.status_code),
            or_dash(record.byte_count),
            or_dash(record.elapsed.map(|e| e.as_millis())),
            or_dash(detail),
        )?;
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::FetchError;
    use std::time::Duration;

    #[test]
    fn test_memory_sink_clones_share_storage() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();

        writer
            .write_status(&StatusRecord::skipped(
                "http://a.com/",
                UrlStatus::SkippedBlocked,
            ))
            .unwrap();

        assert_eq!(sink.statuses().len(), 1);
        assert_eq!(
            sink.status_of("http://a.com/"),
            Some(UrlStatus::SkippedBlocked)
        );
        assert_eq!(sink.status_counts()[&UrlStatus::SkippedBlocked], 1);
    }

    #[test]
    fn test_status_line_format() {
        let mut sink = StatusLineSink::new(Vec::new());
        sink.write_status(&StatusRecord::skipped(
            "http://a.com/x",
            UrlStatus::SkippedTimeLimit,
        ))
        .unwrap();

        let error = FetchError::Http {
            url: "http://a.com/y".to_string(),
            status: 404,
            headers: Vec::new(),
        };
        sink.write_status(&StatusRecord::failed("http://a.com/y", &error))
            .unwrap();

        let mut fetched = StatusRecord::skipped("http://a.com/z", UrlStatus::Fetched);
        fetched.status_code = Some(200);
        fetched.byte_count = Some(512);
        fetched.elapsed = Some(Duration::from_millis(40));
        sink.write_status(&fetched).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "http://a.com/x\tskipped_time_limit\t-\t-\t-\t-");
        assert_eq!(
            lines[1],
            "http://a.com/y\thttp_error\t404\t-\t-\tHTTP status 404 for http://a.com/y"
        );
        assert_eq!(lines[2], "http://a.com/z\tfetched\t200\t512\t40\t-");
    }
}
