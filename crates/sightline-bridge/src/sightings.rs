//! Per-event sighting handler.
//!
//! For each event drained from the pipeline: gate on the telemetry
//! channel, extract candidate indicator values, filter them through the
//! cooldown cache, and report the survivors to the intel platform. The
//! cache is only updated after the report succeeds, so a failed POST is
//! naturally retried the next time the same value fires.

use crate::client::IntelRepository;
use crate::dedupe::SightingCache;
use crate::error::Result;
use crate::extract::extract_sightings;
use metrics::{counter, gauge};
use sightline_core::{Event, Sighting};
use std::sync::Mutex;
use std::time::Duration;

/// Turns pipeline events into deduplicated sighting reports.
///
/// The cache sits behind a mutex so a periodic sweeper task can share the
/// updater with the single drain-loop consumer; the lock is never held
/// across an await.
pub struct SightingsUpdater<R: IntelRepository> {
    intel: R,
    cache: Mutex<SightingCache>,
    cooldown: Duration,
    channel: String,
}

impl<R: IntelRepository> SightingsUpdater<R> {
    pub fn new(intel: R, cooldown: Duration, channel: impl Into<String>) -> Self {
        Self {
            intel,
            cache: Mutex::new(SightingCache::new()),
            cooldown,
            channel: channel.into(),
        }
    }

    /// Handle one event from the pipeline.
    ///
    /// Returns the number of values reported (0 when everything was
    /// filtered or the event was off-channel).
    pub async fn handle_event(&self, event: &Event) -> Result<usize> {
        let candidates = extract_sightings(event, &self.channel);
        if candidates.is_empty() {
            return Ok(0);
        }
        counter!("sighting_values_extracted_total").increment(candidates.len() as u64);

        let source = event.source_identity();
        let candidate_count = candidates.len();
        let surviving = self
            .cache
            .lock()
            .unwrap()
            .filter(&source, candidates, self.cooldown);
        let suppressed = candidate_count - surviving.len();
        if suppressed > 0 {
            counter!("sighting_values_filtered_total").increment(suppressed as u64);
        }
        if surviving.is_empty() {
            return Ok(0);
        }

        let sighting = Sighting::new(&source, surviving.clone());
        self.intel.add_sighting(&sighting).await.inspect_err(|_| {
            // Cache untouched: the same values are retried on their next
            // occurrence.
            counter!("sighting_report_failures_total").increment(1);
        })?;

        let entries = {
            let mut cache = self.cache.lock().unwrap();
            cache.record(&source, &surviving);
            cache.len()
        };
        counter!("sighting_reports_total").increment(1);
        gauge!("sighting_cache_entries").set(entries as f64);
        tracing::debug!(
            source = %source,
            values = surviving.len(),
            "Reported sighting batch"
        );
        Ok(surviving.len())
    }

    /// Drop cache entries older than `age`. See
    /// [`SightingCache::sweep_older_than`].
    pub fn sweep_cache(&self, age: Duration) -> usize {
        let mut cache = self.cache.lock().unwrap();
        let removed = cache.sweep_older_than(age);
        if removed > 0 {
            gauge!("sighting_cache_entries").set(cache.len() as f64);
            tracing::debug!("Swept {} stale dedup cache entries", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use serde_json::json;
    use sightline_core::SYSMON_CHANNEL;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockIntel {
        sightings: Mutex<Vec<Sighting>>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl IntelRepository for &MockIntel {
        async fn search_index(
            &self,
            _query: &crate::client::IndexQuery,
        ) -> Result<Vec<crate::client::RecordRef>> {
            unimplemented!("not used by the sighting handler")
        }

        async fn get_record(
            &self,
            _record: &crate::client::RecordRef,
        ) -> Result<crate::client::IntelRecord> {
            unimplemented!("not used by the sighting handler")
        }

        async fn add_sighting(&self, sighting: &Sighting) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(Error::Api("sighting rejected".into()));
            }
            self.sightings.lock().unwrap().push(sighting.clone());
            Ok(())
        }
    }

    fn sysmon_event(image: &str) -> Event {
        Event::from_value(json!({
            "Event": {
                "System": { "Channel": SYSMON_CHANNEL },
                "EventData": { "Image": image },
                "EdrData": {
                    "Endpoint": { "UUID": "u-1", "Hostname": "host-1" }
                }
            }
        }))
    }

    const COOLDOWN: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_reports_and_suppresses_within_cooldown() {
        let intel = MockIntel::default();
        let updater = SightingsUpdater::new(&intel, COOLDOWN, SYSMON_CHANNEL);
        let event = sysmon_event("C:\\evil.exe");

        assert_eq!(updater.handle_event(&event).await.unwrap(), 1);
        // Immediately again: filtered by the cache, no second report.
        assert_eq!(updater.handle_event(&event).await.unwrap(), 0);

        let sightings = intel.sightings.lock().unwrap();
        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].source, "u-1|host-1");
        assert_eq!(sightings[0].values, vec!["C:\\evil.exe"]);
        assert_eq!(sightings[0].filters.to_ids, 1);
    }

    #[tokio::test]
    async fn test_failed_report_leaves_cache_for_retry() {
        let intel = MockIntel::default();
        intel.fail_next.store(true, Ordering::SeqCst);
        let updater = SightingsUpdater::new(&intel, COOLDOWN, SYSMON_CHANNEL);
        let event = sysmon_event("C:\\evil.exe");

        assert!(updater.handle_event(&event).await.is_err());
        assert!(intel.sightings.lock().unwrap().is_empty());

        // Same value on the next occurrence goes through.
        assert_eq!(updater.handle_event(&event).await.unwrap(), 1);
        assert_eq!(intel.sightings.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_off_channel_event_ignored() {
        let intel = MockIntel::default();
        let updater = SightingsUpdater::new(&intel, COOLDOWN, SYSMON_CHANNEL);
        let event = Event::from_value(json!({
            "Event": {
                "System": { "Channel": "Security" },
                "EventData": { "Image": "C:\\evil.exe" }
            }
        }));

        assert_eq!(updater.handle_event(&event).await.unwrap(), 0);
        assert!(intel.sightings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sources_tracked_independently() {
        let intel = MockIntel::default();
        let updater = SightingsUpdater::new(&intel, COOLDOWN, SYSMON_CHANNEL);

        updater.handle_event(&sysmon_event("C:\\evil.exe")).await.unwrap();

        let other = Event::from_value(json!({
            "Event": {
                "System": { "Channel": SYSMON_CHANNEL },
                "EventData": { "Image": "C:\\evil.exe" },
                "EdrData": { "Endpoint": { "UUID": "u-2", "Hostname": "host-2" } }
            }
        }));
        assert_eq!(updater.handle_event(&other).await.unwrap(), 1);
        assert_eq!(intel.sightings.lock().unwrap().len(), 2);
    }
}
