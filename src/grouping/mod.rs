//! URL grouping
//!
//! URLs are grouped by the host they will be fetched from so that one
//! politeness budget covers all of them. URLs that will never be fetched get
//! a sentinel key instead.

mod generator;
mod key;
mod score;

pub use generator::{DnsResolver, GroupingKeyGenerator, HostResolver, SimpleGroupingKeyGenerator};
pub use key::{GroupingKey, GroupingKeyError, HostReference, SPECIAL_KEY_PREFIX};
pub use score::{FixedScoreGenerator, ScoreGenerator, SKIP_SCORE};
