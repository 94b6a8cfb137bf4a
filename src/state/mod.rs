//! State tracking for a fetch run
//!
//! # Components
//!
//! - `UrlStatus`: The final outcome recorded for each URL
//! - `RefTable`: Which host references are active or waiting out their crawl delay

mod ref_table;
mod url_status;

// Re-export main types
pub use ref_table::{RefState, RefTable};
pub use url_status::UrlStatus;
