//! Output module for fetch results
//!
//! This module handles:
//! - The sink interface every fetch worker writes through
//! - In-memory and line-based sink implementations
//! - Run counters and the end-of-run summary

mod sinks;
pub mod stats;
mod traits;

pub use sinks::{MemorySink, StatusLineSink};
pub use stats::{print_statistics, CounterSnapshot, FetchCounters};
pub use traits::{emit, shared, OutputError, OutputResult, OutputSink, SharedSink, StatusRecord};
