//! URL scoring
//!
//! Scores order URLs within one host; higher scores are fetched first.

use crate::grouping::GroupingKey;
use async_trait::async_trait;

/// Score that marks a URL as not worth fetching
pub const SKIP_SCORE: f32 = f32::MIN;

/// Assigns a fetch priority to a URL
#[async_trait]
pub trait ScoreGenerator: Send + Sync {
    /// Scores `url`, which has already been given `key`
    ///
    /// Returning [`SKIP_SCORE`] drops the URL with a skipped status.
    async fn score(&self, url: &str, key: &GroupingKey) -> f32;
}

/// Gives every URL the same score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedScoreGenerator {
    score: f32,
}

impl FixedScoreGenerator {
    pub fn new(score: f32) -> Self {
        Self { score }
    }
}

impl Default for FixedScoreGenerator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[async_trait]
impl ScoreGenerator for FixedScoreGenerator {
    async fn score(&self, _url: &str, _key: &GroupingKey) -> f32 {
        self.score
    }
}
