//! Time-windowed sighting deduplication cache.
//!
//! The intel platform does not need to hear about the same indicator from
//! the same endpoint more than once per cooldown window. This module tracks
//! `(source, value) -> last-reported` in memory and filters candidate values
//! before they are reported.
//!
//! The cache is ephemeral: it is rebuilt empty on restart, which at worst
//! causes one redundant sighting per live pair. Entries are only ever
//! overwritten, never deleted, by normal operation; [`SightingCache::sweep_older_than`]
//! exists so long-lived daemons can bound memory.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-source map of indicator value to last-reported time.
///
/// Mutated only by the single pipeline consumer, so it carries no internal
/// locking. Callers that add consumer-side concurrency must serialize
/// access themselves.
#[derive(Debug, Default)]
pub struct SightingCache {
    sources: HashMap<String, HashMap<String, Instant>>,
}

impl SightingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the candidates worth reporting now.
    ///
    /// A candidate survives if it has never been recorded for `source`, or
    /// if more than `cooldown` has elapsed since it was last recorded.
    /// Candidate order is preserved and candidates are not deduplicated
    /// against each other within one call.
    pub fn filter(&self, source: &str, candidates: Vec<String>, cooldown: Duration) -> Vec<String> {
        self.filter_at(source, candidates, cooldown, Instant::now())
    }

    /// [`filter`](Self::filter) with an explicit notion of "now".
    pub fn filter_at(
        &self,
        source: &str,
        candidates: Vec<String>,
        cooldown: Duration,
        now: Instant,
    ) -> Vec<String> {
        let Some(source_cache) = self.sources.get(source) else {
            return candidates;
        };
        candidates
            .into_iter()
            .filter(|value| match source_cache.get(value) {
                Some(last) => now.duration_since(*last) > cooldown,
                None => true,
            })
            .collect()
    }

    /// Record values as reported for `source`.
    ///
    /// Must be called only after the downstream report succeeded; on a
    /// failed report the cache stays untouched so the same value is
    /// retried on its next occurrence.
    pub fn record(&mut self, source: &str, values: &[String]) {
        self.record_at(source, values, Instant::now());
    }

    /// [`record`](Self::record) with an explicit notion of "now".
    pub fn record_at(&mut self, source: &str, values: &[String], now: Instant) {
        let source_cache = self.sources.entry(source.to_string()).or_default();
        for value in values {
            source_cache.insert(value.clone(), now);
        }
    }

    /// Drop entries last reported more than `age` ago.
    ///
    /// Returns the number of entries removed. Removing an entry can only
    /// re-enable a report the cooldown check would have re-enabled anyway,
    /// so this never changes filtering semantics for `age >= cooldown`.
    pub fn sweep_older_than(&mut self, age: Duration) -> usize {
        self.sweep_older_than_at(age, Instant::now())
    }

    /// [`sweep_older_than`](Self::sweep_older_than) with an explicit notion
    /// of "now".
    pub fn sweep_older_than_at(&mut self, age: Duration, now: Instant) -> usize {
        let mut removed = 0;
        for source_cache in self.sources.values_mut() {
            let before = source_cache.len();
            source_cache.retain(|_, last| now.duration_since(*last) <= age);
            removed += before - source_cache.len();
        }
        self.sources.retain(|_, cache| !cache.is_empty());
        removed
    }

    /// Total entries across all sources.
    pub fn len(&self) -> usize {
        self.sources.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
