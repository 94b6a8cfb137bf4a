//! URL handling module for Sumi-Fetch
//!
//! Host extraction and paid-level domain grouping.

mod domain;

pub use domain::{extract_domain, paid_level_domain};
