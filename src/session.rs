use crate::cache::CacheStore;
use crate::models::Record;
use std::sync::Arc;

/// Caller-owned snapshot of cached records.
///
/// Records are read from disk on first use and memoized until `reload` or
/// `invalidate` is called; a refresh in another process is not picked up
/// implicitly.
#[derive(Debug, Clone)]
pub struct QuerySession {
    store: CacheStore,
    records: Option<Arc<Vec<Record>>>,
}

impl QuerySession {
    pub fn new(store: CacheStore) -> Self {
        Self { store, records: None }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn is_loaded(&self) -> bool {
        self.records.is_some()
    }

    pub fn records(&mut self) -> Arc<Vec<Record>> {
        if let Some(records) = &self.records {
            return records.clone();
        }
        self.reload()
    }

    pub fn reload(&mut self) -> Arc<Vec<Record>> {
        let records = Arc::new(self.store.load().records());
        tracing::debug!(records = records.len(), "query session loaded cache snapshot");
        self.records = Some(records.clone());
        records
    }

    pub fn invalidate(&mut self) {
        self.records = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cache, EventRecord, SourceBatch};
    use chrono::NaiveDate;

    fn store_with_events(root: &std::path::Path, count: usize) -> CacheStore {
        let store = CacheStore::new(root.join("cache.json"), root.join("cache.lock"));
        let start = NaiveDate::from_ymd_opt(2025, 3, 1)
            .and_then(|date| date.and_hms_opt(8, 0, 0))
            .expect("valid start");
        let events = (0..count)
            .map(|index| EventRecord::new(format!("uid-{index}"), format!("Event {index}"), start))
            .collect();
        let mut cache = Cache::default();
        cache.replace(SourceBatch::Events(events));
        store.save(&cache).expect("save cache");
        store
    }

    #[test]
    fn records_are_memoized_until_reload() {
        let root = tempfile::tempdir().expect("temp root");
        let store = store_with_events(root.path(), 1);
        let mut session = QuerySession::new(store.clone());
        assert!(!session.is_loaded());
        assert_eq!(session.records().len(), 1);
        assert!(session.is_loaded());

        store_with_events(root.path(), 3);
        assert_eq!(session.records().len(), 1);
        assert_eq!(session.reload().len(), 3);
    }

    #[test]
    fn invalidate_forces_a_fresh_read() {
        let root = tempfile::tempdir().expect("temp root");
        let store = store_with_events(root.path(), 2);
        let mut session = QuerySession::new(store);
        assert_eq!(session.records().len(), 2);

        store_with_events(root.path(), 0);
        session.invalidate();
        assert!(!session.is_loaded());
        assert!(session.records().is_empty());
    }
}
