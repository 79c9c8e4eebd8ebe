//! Incremental indicator reconciliation.
//!
//! Pulls indicator-bearing records from the intel platform since a
//! watermark, classifies every attribute as add or delete, and applies the
//! diff to the EDR indicator store. The index-level watermark filter is
//! coarser than per-attribute staleness, so each matching record's full
//! attribute set is re-read and attributes older than the watermark are
//! skipped individually.
//!
//! Store add/delete are idempotent, so re-running a cycle with the same
//! watermark and repository state is safe and produces the same diff.

use crate::client::{IndexQuery, IndicatorStore, IntelAttribute, IntelRepository};
use crate::error::Result;
use chrono::{DateTime, Utc};
use metrics::counter;
use sightline_core::{Ioc, IocType};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Parameters of one reconciliation cycle.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Source name stamped on indicators pulled from the platform.
    pub source: String,
    /// Watermark; `None` means all records.
    pub since: Option<DateTime<Utc>>,
    /// Include unpublished records. When false only published records
    /// are considered.
    pub include_unpublished: bool,
}

/// The diff computed and applied by a cycle.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub added: Vec<Ioc>,
    pub deleted: Vec<Ioc>,
    /// Individual add/delete operations that failed after the batch and
    /// per-item retries. The rest of the batch still went through.
    pub apply_failures: usize,
}

/// Run one reconciliation cycle: query, classify, apply.
///
/// Deletions are applied before additions so a value toggled within the
/// same window ends up present, not absent.
pub async fn reconcile<R, S>(
    repo: &R,
    store: &S,
    options: &ReconcileOptions,
) -> Result<ReconcileOutcome>
where
    R: IntelRepository,
    S: IndicatorStore,
{
    let query = IndexQuery {
        published: if options.include_unpublished {
            None
        } else {
            Some(true)
        },
        timestamp: options.since,
    };

    let refs = repo.search_index(&query).await?;
    tracing::debug!("Index search matched {} records", refs.len());

    let mut outcome = ReconcileOutcome::default();
    for record_ref in &refs {
        let record = repo.get_record(record_ref).await?;
        for attr in &record.attributes {
            if let Some(since) = options.since {
                if attr.timestamp < since {
                    continue;
                }
            }
            let Some(ioc_type) = allowed_type(attr) else {
                // Outside the allow-list: dropped regardless of the
                // actionable flag.
                continue;
            };
            let ioc = Ioc::new(
                attr.uuid.clone(),
                record.uuid.clone(),
                options.source.clone(),
                attr.value.clone(),
                ioc_type,
            );
            if attr.to_ids {
                tracing::info!("+ {}", ioc);
                outcome.added.push(ioc);
            } else {
                tracing::info!("- {}", ioc);
                outcome.deleted.push(ioc);
            }
        }
    }

    // Deletes first: a same-window delete/add toggle must end present.
    let delete_ids: Vec<String> = outcome.deleted.iter().map(|i| i.uuid.clone()).collect();
    outcome.apply_failures += apply_batch(
        || store.delete_iocs(&delete_ids),
        delete_ids.iter().map(|uuid| {
            let uuid = uuid.clone();
            move || async move { store.delete_iocs(&[uuid]).await }
        }),
        "delete",
    )
    .await;

    outcome.apply_failures += apply_batch(
        || store.add_iocs(&outcome.added),
        outcome.added.iter().map(|ioc| {
            let ioc = ioc.clone();
            move || async move { store.add_iocs(&[ioc]).await }
        }),
        "add",
    )
    .await;

    counter!("sync_cycles_total").increment(1);
    counter!("sync_iocs_added_total").increment(outcome.added.len() as u64);
    counter!("sync_iocs_deleted_total").increment(outcome.deleted.len() as u64);
    tracing::info!(
        added = outcome.added.len(),
        deleted = outcome.deleted.len(),
        failures = outcome.apply_failures,
        "Reconciliation cycle complete"
    );

    Ok(outcome)
}

/// Run reconciliation cycles on a fixed interval until `running` clears.
///
/// Cycles never overlap: each one fully completes (including applying the
/// diff) before the interval sleep starts.
pub async fn run_service<R, S>(
    repo: &R,
    store: &S,
    options: &ReconcileOptions,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> Result<()>
where
    R: IntelRepository,
    S: IndicatorStore,
{
    while running.load(Ordering::SeqCst) {
        if let Err(e) = reconcile(repo, store, options).await {
            // A failed cycle is logged and retried on the next tick.
            tracing::error!("Reconciliation cycle failed: {}", e);
        }

        let mut slept = Duration::ZERO;
        while slept < interval && running.load(Ordering::SeqCst) {
            let step = Duration::from_secs(1).min(interval - slept);
            tokio::time::sleep(step).await;
            slept += step;
        }
    }
    Ok(())
}

/// Classify an attribute's type against the EDR allow-list.
fn allowed_type(attr: &IntelAttribute) -> Option<IocType> {
    IocType::from_str(&attr.attr_type).ok()
}

/// Apply a batch operation; on batch failure fall back to per-item
/// application so one bad entry does not abort the rest.
///
/// Returns the number of items that still failed.
async fn apply_batch<B, BFut, I, F, Fut>(batch: B, items: I, what: &str) -> usize
where
    B: FnOnce() -> BFut,
    BFut: std::future::Future<Output = Result<()>>,
    I: Iterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    match batch().await {
        Ok(()) => 0,
        Err(e) => {
            tracing::warn!("Batch {} failed ({}), retrying per item", what, e);
            let mut failures = 0;
            for item in items {
                if let Err(e) = item().await {
                    failures += 1;
                    counter!("sync_apply_failures_total").increment(1);
                    tracing::warn!("{} failed: {}", what, e);
                }
            }
            failures
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{IntelRecord, RecordRef};
    use crate::error::Error;
    use async_trait::async_trait;
    use sightline_core::Sighting;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct MockRepo {
        records: Vec<IntelRecord>,
        queries: Mutex<Vec<IndexQuery>>,
    }

    impl MockRepo {
        fn new(records: Vec<IntelRecord>) -> Self {
            Self {
                records,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IntelRepository for MockRepo {
        async fn search_index(&self, query: &IndexQuery) -> Result<Vec<RecordRef>> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(self
                .records
                .iter()
                .map(|r| RecordRef {
                    uuid: r.uuid.clone(),
                })
                .collect())
        }

        async fn get_record(&self, record: &RecordRef) -> Result<IntelRecord> {
            Ok(self
                .records
                .iter()
                .find(|r| r.uuid == record.uuid)
                .cloned()
                .expect("unknown record"))
        }

        async fn add_sighting(&self, _sighting: &Sighting) -> Result<()> {
            unimplemented!("not used by reconciliation")
        }
    }

    #[derive(Default)]
    struct MockStore {
        // Operation log: ("add"|"delete", value-or-uuid).
        ops: Mutex<Vec<(&'static str, String)>>,
        fail_uuids: HashSet<String>,
        present: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl IndicatorStore for MockStore {
        async fn list_iocs(&self) -> Result<Vec<Ioc>> {
            Ok(Vec::new())
        }

        async fn add_iocs(&self, iocs: &[Ioc]) -> Result<()> {
            for ioc in iocs {
                if self.fail_uuids.contains(&ioc.uuid) {
                    return Err(Error::Api(format!("add {} rejected", ioc.uuid)));
                }
            }
            let mut present = self.present.lock().unwrap();
            let mut ops = self.ops.lock().unwrap();
            for ioc in iocs {
                ops.push(("add", ioc.value.clone()));
                present.insert(ioc.value.clone());
            }
            Ok(())
        }

        async fn delete_iocs(&self, uuids: &[String]) -> Result<()> {
            for uuid in uuids {
                if self.fail_uuids.contains(uuid) {
                    return Err(Error::Api(format!("delete {uuid} rejected")));
                }
            }
            let mut ops = self.ops.lock().unwrap();
            for uuid in uuids {
                ops.push(("delete", uuid.clone()));
            }
            Ok(())
        }
    }

    fn attr(uuid: &str, value: &str, attr_type: &str, to_ids: bool, epoch: i64) -> IntelAttribute {
        IntelAttribute {
            uuid: uuid.into(),
            value: value.into(),
            attr_type: attr_type.into(),
            to_ids,
            timestamp: DateTime::<Utc>::from_timestamp(epoch, 0).unwrap(),
        }
    }

    fn options() -> ReconcileOptions {
        ReconcileOptions {
            source: "misp".into(),
            since: None,
            include_unpublished: false,
        }
    }

    #[tokio::test]
    async fn test_classification_by_flag_and_allow_list() {
        let repo = MockRepo::new(vec![IntelRecord {
            uuid: "rec-1".into(),
            attributes: vec![
                attr("a1", "aaa", "md5", true, 1000),
                attr("a2", "evil.example.com", "domain", false, 1000),
                attr("a3", "https://evil", "unsupported", true, 1000),
            ],
        }]);
        let store = MockStore::default();

        let outcome = reconcile(&repo, &store, &options()).await.unwrap();

        assert_eq!(outcome.added.len(), 1);
        assert_eq!(outcome.added[0].value, "aaa");
        assert_eq!(outcome.added[0].ioc_type, IocType::Md5);
        assert_eq!(outcome.added[0].guuid, "rec-1");
        assert_eq!(outcome.deleted.len(), 1);
        assert_eq!(outcome.deleted[0].value, "evil.example.com");
        assert_eq!(outcome.apply_failures, 0);
    }

    #[tokio::test]
    async fn test_published_only_unless_all_requested() {
        let repo = MockRepo::new(Vec::new());
        let store = MockStore::default();

        reconcile(&repo, &store, &options()).await.unwrap();
        let mut all = options();
        all.include_unpublished = true;
        reconcile(&repo, &store, &all).await.unwrap();

        let queries = repo.queries.lock().unwrap();
        assert_eq!(queries[0].published, Some(true));
        assert_eq!(queries[1].published, None);
    }

    #[tokio::test]
    async fn test_watermark_skips_stale_attributes() {
        let since = DateTime::<Utc>::from_timestamp(2000, 0).unwrap();
        let repo = MockRepo::new(vec![IntelRecord {
            uuid: "rec-1".into(),
            attributes: vec![
                attr("a1", "old-value", "md5", true, 1000),
                attr("a2", "new-value", "md5", true, 3000),
            ],
        }]);
        let store = MockStore::default();

        let mut opts = options();
        opts.since = Some(since);
        let outcome = reconcile(&repo, &store, &opts).await.unwrap();

        assert_eq!(outcome.added.len(), 1);
        assert_eq!(outcome.added[0].value, "new-value");
        assert_eq!(repo.queries.lock().unwrap()[0].timestamp, Some(since));
    }

    #[tokio::test]
    async fn test_deletes_applied_before_adds() {
        let repo = MockRepo::new(vec![IntelRecord {
            uuid: "rec-1".into(),
            attributes: vec![
                // Same value toggled within the window: must end present.
                attr("a1", "toggled", "sha256", true, 1000),
                attr("a2", "toggled", "sha256", false, 1000),
            ],
        }]);
        let store = MockStore::default();

        reconcile(&repo, &store, &options()).await.unwrap();

        let ops = store.ops.lock().unwrap();
        assert_eq!(ops[0].0, "delete");
        assert_eq!(ops[1].0, "add");
        assert!(store.present.lock().unwrap().contains("toggled"));
    }

    #[tokio::test]
    async fn test_idempotent_across_runs() {
        let repo = MockRepo::new(vec![IntelRecord {
            uuid: "rec-1".into(),
            attributes: vec![
                attr("a1", "aaa", "md5", true, 1000),
                attr("a2", "evil.example.com", "domain", false, 1000),
            ],
        }]);
        let store = MockStore::default();

        let first = reconcile(&repo, &store, &options()).await.unwrap();
        let second = reconcile(&repo, &store, &options()).await.unwrap();

        assert_eq!(first.added, second.added);
        assert_eq!(first.deleted, second.deleted);
        assert_eq!(second.apply_failures, 0);
    }

    #[tokio::test]
    async fn test_one_bad_item_does_not_abort_batch() {
        let repo = MockRepo::new(vec![IntelRecord {
            uuid: "rec-1".into(),
            attributes: vec![
                attr("a1", "good-one", "md5", true, 1000),
                attr("a2", "bad-one", "sha1", true, 1000),
                attr("a3", "good-two", "sha256", true, 1000),
            ],
        }]);
        let mut store = MockStore::default();
        store.fail_uuids.insert("a2".into());

        let outcome = reconcile(&repo, &store, &options()).await.unwrap();

        assert_eq!(outcome.apply_failures, 1);
        let present = store.present.lock().unwrap();
        assert!(present.contains("good-one"));
        assert!(present.contains("good-two"));
        assert!(!present.contains("bad-one"));
    }
}
