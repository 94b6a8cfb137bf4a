//! Per-host robots.txt rule cache
//!
//! Entries expire after 24 hours so changes made by site owners are picked
//! up by long-running fetches. Concurrent lookups for one host share a single
//! robots.txt request.

use crate::robots::RuleSet;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Rules fetched for one host, with the time they were fetched
#[derive(Debug, Clone)]
pub struct CachedRules {
    /// The parsed rules
    pub rules: Arc<RuleSet>,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRules {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: Arc::new(rules),
            fetched_at: Utc::now(),
        }
    }

    /// Returns how long ago the rules were fetched
    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }

    /// Checks whether the entry is older than `max_age`
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }
}

type Slot = Arc<OnceCell<CachedRules>>;

/// Thread-safe map from lower-cased host name to its rules
#[derive(Debug)]
pub struct RobotsCache {
    entries: Mutex<HashMap<String, Slot>>,
    max_age: Duration,
}

impl Default for RobotsCache {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

impl RobotsCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    /// Returns the rules for `host`, running `fetch` if there are none
    ///
    /// Callers that arrive while a fetch for the same host is running wait
    /// for its result instead of starting their own.
    pub async fn get_or_fetch<F, Fut>(&self, host: &str, fetch: F) -> Arc<RuleSet>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RuleSet>,
    {
        let slot = self.slot(host);
        let cached = slot
            .get_or_init(|| async move { CachedRules::new(fetch().await) })
            .await;
        Arc::clone(&cached.rules)
    }

    /// Number of hosts with rules, fetched or being fetched
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The entry for `host`, replaced with an empty one when stale
    fn slot(&self, host: &str) -> Slot {
        let mut entries = self.lock();
        let stale = entries
            .get(host)
            .and_then(|slot| slot.get())
            .is_some_and(|cached| cached.is_stale(self.max_age));
        if stale {
            tracing::debug!("Refreshing stale robots rules for {}", host);
            entries.remove(host);
        }
        Arc::clone(entries.entry(host.to_string()).or_default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
