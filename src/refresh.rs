use crate::adapters::SourceAdapter;
use crate::cache::CacheStore;
use crate::errors::AppResult;
use crate::models::SourceKind;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

const NOT_CONFIGURED: &str = "not configured";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceUpdate {
    pub source: SourceKind,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFailure {
    pub source: SourceKind,
    pub message: String,
}

/// Outcome of one refresh cycle, in canonical source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub updated: Vec<SourceUpdate>,
    pub failed: Vec<SourceFailure>,
    pub total_records: usize,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for RefreshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for update in &self.updated {
            writeln!(f, "{}: updated ({} records)", update.source, update.records)?;
        }
        for failure in &self.failed {
            writeln!(f, "{}: failed ({})", failure.source, failure.message)?;
        }
        write!(f, "cache now holds {} records", self.total_records)
    }
}

pub struct RefreshWorkflow {
    store: CacheStore,
    adapters: Vec<Box<dyn SourceAdapter>>,
    lock_timeout: Duration,
}

impl RefreshWorkflow {
    pub fn new(store: CacheStore, adapters: Vec<Box<dyn SourceAdapter>>, lock_timeout: Duration) -> Self {
        Self {
            store,
            adapters,
            lock_timeout,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Refreshes the selected sources under the cache lock.
    ///
    /// An empty selection means every source. A failing adapter keeps its
    /// previous slice and is listed in the report; only lock acquisition and
    /// saving can fail the whole cycle.
    pub fn refresh(&self, selected: &[SourceKind]) -> AppResult<RefreshReport> {
        let selected: Vec<SourceKind> = SourceKind::ALL
            .into_iter()
            .filter(|kind| selected.is_empty() || selected.contains(kind))
            .collect();

        self.store.with_lock(self.lock_timeout, |store| {
            let mut cache = store.load();
            let mut report = RefreshReport::default();

            for kind in selected {
                let Some(adapter) = self.adapters.iter().find(|adapter| adapter.kind() == kind) else {
                    tracing::warn!(source = %kind, "source is not configured; keeping cached records");
                    report.failed.push(SourceFailure {
                        source: kind,
                        message: NOT_CONFIGURED.to_string(),
                    });
                    continue;
                };
                match adapter.fetch() {
                    Ok(batch) => {
                        let records = batch.len();
                        cache.replace(batch);
                        tracing::info!(source = %kind, records, "source refreshed");
                        report.updated.push(SourceUpdate { source: kind, records });
                    }
                    Err(error) => {
                        tracing::warn!(
                            source = %kind,
                            error = %error,
                            kept = cache.slice_len(kind),
                            "source refresh failed; keeping cached records"
                        );
                        report.failed.push(SourceFailure {
                            source: kind,
                            message: error.to_string(),
                        });
                    }
                }
            }

            store.save(&cache)?;
            report.total_records = cache.len();
            Ok(report)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::models::{EventRecord, HealthRecord, SourceBatch};
    use chrono::{NaiveDate, NaiveDateTime};
    use indexmap::IndexMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 2, day)
            .and_then(|date| date.and_hms_opt(10, 0, 0))
            .expect("valid date")
    }

    struct FixedEvents {
        count: usize,
        calls: Arc<AtomicUsize>,
    }

    impl SourceAdapter for FixedEvents {
        fn kind(&self) -> SourceKind {
            SourceKind::Event
        }

        fn fetch(&self) -> AppResult<SourceBatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SourceBatch::Events(
                (0..self.count)
                    .map(|index| EventRecord::new(format!("e{index}"), format!("Event {index}"), at(1)))
                    .collect(),
            ))
        }
    }

    struct FailingHealth;

    impl SourceAdapter for FailingHealth {
        fn kind(&self) -> SourceKind {
            SourceKind::Health
        }

        fn fetch(&self) -> AppResult<SourceBatch> {
            Err(AppError::source_fetch(SourceKind::Health, "export unreadable"))
        }
    }

    fn store_in(root: &std::path::Path) -> CacheStore {
        CacheStore::new(root.join("cache.json"), root.join("cache.lock"))
    }

    fn workflow(store: CacheStore, adapters: Vec<Box<dyn SourceAdapter>>) -> RefreshWorkflow {
        RefreshWorkflow::new(store, adapters, Duration::from_secs(2))
    }

    #[test]
    fn successful_adapter_replaces_its_slice() {
        let root = tempfile::tempdir().expect("temp root");
        let calls = Arc::new(AtomicUsize::new(0));
        let refresh = workflow(
            store_in(root.path()),
            vec![Box::new(FixedEvents {
                count: 3,
                calls: calls.clone(),
            })],
        );

        let report = refresh.refresh(&[SourceKind::Event]).expect("refresh");
        assert_eq!(
            report.updated,
            vec![SourceUpdate {
                source: SourceKind::Event,
                records: 3
            }]
        );
        assert!(report.is_clean());
        assert_eq!(report.total_records, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(refresh.store().load().events.len(), 3);
    }

    #[test]
    fn failing_adapter_keeps_previous_slice() {
        let root = tempfile::tempdir().expect("temp root");
        let store = store_in(root.path());
        let mut seeded = crate::models::Cache::default();
        seeded.replace(SourceBatch::Health(vec![HealthRecord::new(at(3), IndexMap::new())]));
        store.save(&seeded).expect("seed cache");

        let refresh = workflow(store, vec![Box::new(FailingHealth)]);
        let report = refresh.refresh(&[SourceKind::Health]).expect("refresh survives adapter failure");
        assert!(report.updated.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].message.contains("export unreadable"));
        assert_eq!(refresh.store().load().health.len(), 1);
    }

    #[test]
    fn unselected_and_unconfigured_sources_are_handled_separately() {
        let root = tempfile::tempdir().expect("temp root");
        let calls = Arc::new(AtomicUsize::new(0));
        let refresh = workflow(
            store_in(root.path()),
            vec![Box::new(FixedEvents {
                count: 1,
                calls: calls.clone(),
            })],
        );

        let report = refresh.refresh(&[SourceKind::Note]).expect("refresh");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            report.failed,
            vec![SourceFailure {
                source: SourceKind::Note,
                message: NOT_CONFIGURED.to_string()
            }]
        );

        let report = refresh.refresh(&[]).expect("refresh all");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.updated.len(), 1);
        assert_eq!(report.failed.len(), 4);
        assert!(report.to_string().contains("event: updated (1 records)"));
    }

    #[test]
    fn refreshing_twice_yields_identical_cache() {
        let root = tempfile::tempdir().expect("temp root");
        let refresh = workflow(
            store_in(root.path()),
            vec![Box::new(FixedEvents {
                count: 2,
                calls: Arc::new(AtomicUsize::new(0)),
            })],
        );
        refresh.refresh(&[]).expect("first refresh");
        let first = std::fs::read(refresh.store().cache_path()).expect("read cache");
        refresh.refresh(&[]).expect("second refresh");
        let second = std::fs::read(refresh.store().cache_path()).expect("read cache");
        assert_eq!(first, second);
    }
}
